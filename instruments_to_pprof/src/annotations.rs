//! Free-form text attached to processes by pid.
//!
//! Annotations are given as `<pid>:<text>` and show up as a `[text]` suffix
//! on the matching process frame, which makes profiles of multi-process
//! applications easier to read ("renderer", "gpu", ...).

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("annotation {0:?} is not of the form <pid>:<text>")]
    MissingSeparator(String),

    #[error("invalid pid {pid:?} in annotation {annotation:?}")]
    InvalidPid { annotation: String, pid: String },

    #[error("duplicate annotation for pid {pid}, already annotated as {existing:?}")]
    Duplicate { pid: u64, existing: String },
}

/// Map from pid to annotation text, ordered by pid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessAnnotations {
    by_pid: BTreeMap<u64, String>,
}

impl ProcessAnnotations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every `<pid>:<text>` argument. Any malformed or repeated pid fails
    /// the whole set.
    pub fn from_args<I, S>(args: I) -> Result<Self, AnnotationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut annotations = Self::new();
        for arg in args {
            annotations.add_arg(arg.as_ref())?;
        }
        Ok(annotations)
    }

    /// Add one `<pid>:<text>` argument. The text may itself contain colons.
    pub fn add_arg(&mut self, arg: &str) -> Result<(), AnnotationError> {
        let (pid, text) = arg
            .split_once(':')
            .ok_or_else(|| AnnotationError::MissingSeparator(arg.to_string()))?;
        let pid = pid.trim().parse().map_err(|_| AnnotationError::InvalidPid {
            annotation: arg.to_string(),
            pid: pid.to_string(),
        })?;
        self.insert(pid, text)
    }

    pub fn insert(&mut self, pid: u64, text: impl Into<String>) -> Result<(), AnnotationError> {
        if let Some(existing) = self.by_pid.get(&pid) {
            return Err(AnnotationError::Duplicate {
                pid,
                existing: existing.clone(),
            });
        }
        self.by_pid.insert(pid, text.into());
        Ok(())
    }

    pub fn get(&self, pid: u64) -> Option<&str> {
        self.by_pid.get(&pid).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    /// Annotations in pid order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.by_pid.iter().map(|(&pid, text)| (pid, text.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pid_and_text() {
        let annotations =
            ProcessAnnotations::from_args(["123:renderer", "7:gpu: main"]).unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations.get(123), Some("renderer"));
        assert_eq!(annotations.get(7), Some("gpu: main"));
        assert_eq!(annotations.get(8), None);

        let pids: Vec<u64> = annotations.iter().map(|(pid, _)| pid).collect();
        assert_eq!(pids, vec![7, 123]);
    }

    #[test]
    fn duplicate_pid_is_an_error() {
        let err = ProcessAnnotations::from_args(["1:a", "1:b"]).unwrap_err();
        assert_eq!(
            err,
            AnnotationError::Duplicate {
                pid: 1,
                existing: "a".into()
            }
        );
    }

    #[test]
    fn malformed_arguments() {
        assert_eq!(
            ProcessAnnotations::from_args(["renderer"]),
            Err(AnnotationError::MissingSeparator("renderer".into()))
        );
        assert!(matches!(
            ProcessAnnotations::from_args(["abc:renderer"]),
            Err(AnnotationError::InvalidPid { .. })
        ));
        assert!(matches!(
            ProcessAnnotations::from_args(["-1:renderer"]),
            Err(AnnotationError::InvalidPid { .. })
        ));
    }

    #[test]
    fn empty_by_default() {
        assert!(ProcessAnnotations::default().is_empty());
        assert!(ProcessAnnotations::from_args(Vec::<String>::new())
            .unwrap()
            .is_empty());
    }
}
