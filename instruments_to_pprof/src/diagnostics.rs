//! Non-fatal conditions reported next to a successful parse or conversion.

use std::fmt;

/// A condition the caller should surface but that doesn't stop the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A process header didn't have the `<name> (<pid>)` shape.
    UnparsedProcessLabel { line: usize, label: String },

    /// A thread header didn't have the `<name>  0x<tid>` shape.
    UnparsedThreadLabel { line: usize, label: String },

    /// The label had the right shape but its id doesn't fit in 64 bits.
    UnparsedId { line: usize, label: String },

    /// `sample` reported a period other than 1 millisecond.
    UnsupportedSamplePeriod { period: String, unit: String },

    /// Annotated pids that never showed up in the profile, by pid.
    UnusedAnnotations(Vec<(u64, String)>),

    /// Annotations were supplied but process frames are excluded.
    AnnotationsIgnored,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnparsedProcessLabel { line, label } => write!(
                f,
                "line {line}: could not parse process name and pid from {label:?}, using 0 as the pid"
            ),
            Warning::UnparsedThreadLabel { line, label } => write!(
                f,
                "line {line}: could not parse thread name and tid from {label:?}, using 0 as the tid"
            ),
            Warning::UnparsedId { line, label } => {
                write!(f, "line {line}: id in {label:?} is out of range, using 0")
            }
            Warning::UnsupportedSamplePeriod { period, unit } => write!(
                f,
                "sample period is {period} {unit}, only 1 millisecond is supported; weights assume 1 millisecond per sample"
            ),
            Warning::UnusedAnnotations(unused) => {
                write!(f, "annotations were not used for pids:")?;
                for (pid, text) in unused {
                    write!(f, " {pid} ({text:?})")?;
                }
                Ok(())
            }
            Warning::AnnotationsIgnored => write!(
                f,
                "process annotations are ignored because process frames are excluded from the stack"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unused_annotations_list_every_pid() {
        let warning = Warning::UnusedAnnotations(vec![(1, "one".into()), (22, "two".into())]);
        assert_eq!(
            warning.to_string(),
            "annotations were not used for pids: 1 (\"one\") 22 (\"two\")"
        );
    }

    #[test]
    fn label_warnings_name_the_line() {
        let warning = Warning::UnparsedThreadLabel {
            line: 4,
            label: "worker".into(),
        };
        assert!(warning.to_string().starts_with("line 4:"));
    }
}
