//! Parse an Instruments Time Profiler "Deep Copy".
//!
//! Selecting the call tree in Instruments and choosing Edit > Deep Copy puts a
//! tab separated tree on the clipboard:
//!
//! ```text
//! Weight	Self Weight		Symbol Name
//! 10.0 s  100%	0 s	 	Main Process (123)
//! 5.0 s  50%	0 s	 	 Thread 1  0x1ee7
//! 5.0 s  50%	5.0 s	 	  spin
//! ```
//!
//! The indentation of the last column is the depth: 0 for a process, 1 for a
//! thread and 2 or more for frames. Processes are separated by blank lines.
//! Older Instruments versions emit only three columns, with one extra space
//! of indentation.

use crate::depth_tree::DepthTreeBuilder;
use crate::diagnostics::Warning;
use crate::error::{ParseError, Result};
use crate::parser::{Parsed, ProfileParser};
use crate::time_profile::{Frame, Process, Thread, TimeProfile};
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;

const COLUMN_TITLES: [&str; 2] = [
    "Weight\tSelf Weight\t\tSymbol Name",
    "Weight\tSelf Weight\tSymbol Names",
];

const PROCESS_DEPTH: usize = 0;
const THREAD_DEPTH: usize = 1;
const FRAME_ROOT_DEPTH: usize = 2;

static PROCESS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\s\((\d+)\)$").unwrap());
static THREAD_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\s\s0x([0-9a-f]+)$").unwrap());

/// One row of the deep copy.
#[derive(Debug, Clone, PartialEq)]
struct Row<'a> {
    depth: usize,
    self_weight_ns: i64,
    label: &'a str,
}

/// Parser for Instruments deep copies.
#[derive(Debug, Clone, Default)]
pub struct DeepCopyParser;

impl DeepCopyParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a complete deep copy.
    pub fn parse<R: BufRead>(&self, reader: R) -> Result<Parsed> {
        let mut profile = TimeProfile::default();
        let mut warnings = Vec::new();
        let mut builder = DepthTreeBuilder::new(FRAME_ROOT_DEPTH);
        let mut current: Option<Process> = None;

        for (index, line) in reader.lines().enumerate() {
            let line_num = index + 1;
            let line = line?;
            let line = line.trim();

            if line.is_empty() {
                profile.processes.extend(current.take());
                builder.reset();
                continue;
            }

            let Some(process) = current.as_mut() else {
                if COLUMN_TITLES.contains(&line) {
                    continue;
                }
                let row = parse_row(line, line_num)?;
                if row.depth != PROCESS_DEPTH {
                    return Err(ParseError::malformed(
                        line_num,
                        format!(
                            "first line of a process must have depth {PROCESS_DEPTH}, found {}",
                            row.depth
                        ),
                        line,
                    ));
                }
                current = Some(parse_process_label(row.label, line_num, &mut warnings));
                continue;
            };

            let row = parse_row(line, line_num)?;
            if process.threads.is_empty() && row.depth != THREAD_DEPTH {
                return Err(ParseError::malformed(
                    line_num,
                    format!(
                        "line after a process header must be a thread at depth {THREAD_DEPTH}, found {}",
                        row.depth
                    ),
                    line,
                ));
            }

            match row.depth {
                PROCESS_DEPTH => {
                    return Err(ParseError::UnexpectedProcess {
                        line: line_num,
                        text: line.to_string(),
                    });
                }
                THREAD_DEPTH => {
                    process
                        .threads
                        .push(parse_thread_label(row.label, line_num, &mut warnings));
                    builder.reset();
                }
                depth => {
                    let thread = process
                        .threads
                        .last_mut()
                        .ok_or(ParseError::FrameOutsideThread { line: line_num })?;
                    builder
                        .attach(thread, Frame::new(row.label, row.self_weight_ns, depth))
                        .map_err(|source| ParseError::Structure {
                            line: line_num,
                            source,
                        })?;
                }
            }
        }
        profile.processes.extend(current);

        log::debug!(
            "parsed deep copy: {} processes, {} threads, {} frames",
            profile.processes.len(),
            profile.thread_count(),
            profile.frame_count()
        );
        Ok(Parsed { profile, warnings })
    }
}

impl ProfileParser for DeepCopyParser {
    fn parse_profile(&self, reader: &mut dyn BufRead) -> Result<Parsed> {
        self.parse(reader)
    }
}

fn parse_row(line: &str, line_num: usize) -> Result<Row<'_>> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 3 && fields.len() != 4 {
        return Err(ParseError::malformed(
            line_num,
            format!("expected 3 or 4 tab separated fields, found {}", fields.len()),
            line,
        ));
    }

    let self_weight_ns = parse_weight(fields[1])
        .map_err(|message| ParseError::malformed(line_num, message, line))?;

    let symbol_field = fields[fields.len() - 1];
    let label = symbol_field.trim_start_matches(' ');
    let indent = symbol_field.len() - label.len();
    let depth = if fields.len() == 3 {
        indent.checked_sub(1).ok_or_else(|| {
            ParseError::malformed(line_num, "symbol column is missing its indentation", line)
        })?
    } else {
        indent
    };

    Ok(Row {
        depth,
        self_weight_ns,
        label,
    })
}

/// Convert a `"<value> <unit>"` weight to whole nanoseconds.
fn parse_weight(text: &str) -> std::result::Result<i64, String> {
    let parts: Vec<&str> = text.split(' ').collect();
    let [value, unit] = parts.as_slice() else {
        return Err(format!("weight {text:?} is not of the form '<value> <unit>'"));
    };

    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid weight value {value:?}"))?;
    let scale = match *unit {
        "s" => 1e9,
        "ms" => 1e6,
        "µs" | "μs" => 1e3,
        "ns" => 1.0,
        other => return Err(format!("unknown weight unit {other:?}")),
    };

    let ns = (value * scale).round();
    if !ns.is_finite() || ns < 0.0 || ns >= i64::MAX as f64 {
        return Err(format!("weight {text:?} is out of range"));
    }
    Ok(ns as i64)
}

fn parse_process_label(label: &str, line: usize, warnings: &mut Vec<Warning>) -> Process {
    match PROCESS_LABEL.captures(label) {
        Some(caps) => {
            let pid = caps[2].parse().unwrap_or_else(|_| {
                warnings.push(Warning::UnparsedId {
                    line,
                    label: label.to_string(),
                });
                0
            });
            Process::new(&caps[1], pid)
        }
        None => {
            warnings.push(Warning::UnparsedProcessLabel {
                line,
                label: label.to_string(),
            });
            Process::new(label, 0)
        }
    }
}

fn parse_thread_label(label: &str, line: usize, warnings: &mut Vec<Warning>) -> Thread {
    match THREAD_LABEL.captures(label) {
        Some(caps) => {
            let tid = u64::from_str_radix(&caps[2], 16).unwrap_or_else(|_| {
                warnings.push(Warning::UnparsedId {
                    line,
                    label: label.to_string(),
                });
                0
            });
            Thread::new(&caps[1], tid)
        }
        None => {
            warnings.push(Warning::UnparsedThreadLabel {
                line,
                label: label.to_string(),
            });
            Thread::new(label, 0)
        }
    }
}
