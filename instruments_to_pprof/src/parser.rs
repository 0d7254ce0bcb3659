//! Input format selection.

use crate::collapsed::CollapsedParser;
use crate::deep_copy::DeepCopyParser;
use crate::diagnostics::Warning;
use crate::error::Result;
use crate::sample::SampleParser;
use crate::time_profile::TimeProfile;
use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::str::FromStr;
use thiserror::Error;

/// A parsed call tree plus the warnings raised while reading it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    pub profile: TimeProfile,
    pub warnings: Vec<Warning>,
}

/// Reads one complete input into a [`TimeProfile`].
pub trait ProfileParser {
    fn parse_profile(&self, reader: &mut dyn BufRead) -> Result<Parsed>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("invalid input format {0:?}, expected one of: sample, instruments, collapsed")]
    Unknown(String),
}

/// Supported input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputFormat {
    /// Report written by the macOS `sample` command.
    Sample,
    /// "Deep Copy" of an Instruments Time Profiler call tree.
    #[default]
    Instruments,
    /// One `a;b;c <count>` stack per line.
    Collapsed,
}

impl InputFormat {
    pub fn name(self) -> &'static str {
        match self {
            InputFormat::Sample => "sample",
            InputFormat::Instruments => "instruments",
            InputFormat::Collapsed => "collapsed",
        }
    }

    pub fn parser(self) -> Box<dyn ProfileParser> {
        match self {
            InputFormat::Sample => Box::new(SampleParser::new()),
            InputFormat::Instruments => Box::new(DeepCopyParser::new()),
            InputFormat::Collapsed => Box::new(CollapsedParser::new()),
        }
    }

    /// Parse `reader` with this format's parser.
    pub fn parse<R: Read>(self, reader: R) -> Result<Parsed> {
        let mut reader = BufReader::new(reader);
        self.parser().parse_profile(&mut reader)
    }
}

impl FromStr for InputFormat {
    type Err = FormatError;

    fn from_str(s: &str) -> std::result::Result<Self, FormatError> {
        match s {
            "sample" => Ok(InputFormat::Sample),
            "instruments" => Ok(InputFormat::Instruments),
            "collapsed" => Ok(InputFormat::Collapsed),
            other => Err(FormatError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
