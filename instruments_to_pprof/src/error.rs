//! Fatal errors raised while reading profiler output.

use crate::depth_tree::TreeError;
use thiserror::Error;

/// Errors that can occur while parsing any of the supported input formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}: {text:?}")]
    MalformedLine {
        line: usize,
        message: String,
        text: String,
    },

    #[error("structure error at line {line}: {source}")]
    Structure {
        line: usize,
        #[source]
        source: TreeError,
    },

    #[error("unexpected process header at line {line}, processes must be separated by a blank line: {text:?}")]
    UnexpectedProcess { line: usize, text: String },

    #[error("frame at line {line} appears before any thread")]
    FrameOutsideThread { line: usize },

    #[error("could not find the 'Call graph' line")]
    MissingCallGraph,

    #[error("no 'Process:' line found before the call graph")]
    MissingProcess,

    #[error("more than one 'Process:' line (second at line {line}), corrupt sample file")]
    MultipleProcesses { line: usize },

    #[error("report version was {0}, only report version 7 is supported")]
    UnsupportedReportVersion(i64),

    #[error("frame {symbol:?} has negative self weight {weight_ns} ns, weights are corrupt")]
    CorruptWeights { symbol: String, weight_ns: i64 },
}

impl ParseError {
    pub(crate) fn malformed(line: usize, message: impl Into<String>, text: &str) -> Self {
        ParseError::MalformedLine {
            line,
            message: message.into(),
            text: text.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParseError>;
