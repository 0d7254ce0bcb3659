//! Convert macOS profiler output to pprof.
//!
//! Every input format is first parsed into a [`TimeProfile`], a tree of
//! processes, threads and frames with self weights in nanoseconds. The
//! [`convert`] step then flattens that tree into a deduplicated
//! [`pprof_parse::Profile`].
//!
//! # Input Formats
//!
//! - [`deep_copy`] - Instruments Time Profiler "Deep Copy"
//! - [`sample`] - reports written by the `sample` command
//! - [`collapsed`] - collapsed stacks, `a;b;c <count>`
//!
//! # Example
//!
//! ```no_run
//! use instruments_to_pprof::{ConverterConfig, InputFormat, convert};
//! use std::fs::File;
//!
//! let input = File::open("deep_copy.txt").unwrap();
//! let parsed = InputFormat::Instruments.parse(input).unwrap();
//!
//! let converted = convert(&parsed.profile, &ConverterConfig::default());
//! converted
//!     .profile
//!     .write(File::create("profile.pb.gz").unwrap())
//!     .unwrap();
//! ```

pub mod annotations;
pub mod collapsed;
pub mod convert;
pub mod deep_copy;
pub mod depth_tree;
pub mod diagnostics;
pub mod error;
pub mod parser;
pub mod sample;
pub mod time_profile;

pub use annotations::{AnnotationError, ProcessAnnotations};
pub use convert::{Converted, ConverterConfig, convert};
pub use depth_tree::TreeError;
pub use diagnostics::Warning;
pub use error::{ParseError, Result};
pub use parser::{FormatError, InputFormat, Parsed, ProfileParser};
pub use time_profile::{Frame, FrameId, Process, Thread, TimeProfile};

// Re-export pprof_parse for convenience
pub use pprof_parse;
