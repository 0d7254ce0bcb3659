//! Parse reports written by the macOS `sample` command.
//!
//! A report starts with a header block (`Process:`, `Report Version:`, ...)
//! and continues with a `Call graph:` section where each line carries a
//! cumulative sample count:
//!
//! ```text
//! Call graph:
//!     4 Thread1 DispatchQueue1: com.apple.main-thread  (serial)
//!     + 4 start
//!     +   4 eatLunch
//!     +   : 3 makeSandwich
//! ```
//!
//! The `+ ! : |` prefix marks the depth, two characters per level. Depth 0
//! lines are threads. Counts are converted to nanoseconds using the sampling
//! period and turned into self weights once the whole graph is read.

use crate::depth_tree::DepthTreeBuilder;
use crate::diagnostics::Warning;
use crate::error::{ParseError, Result};
use crate::parser::{Parsed, ProfileParser};
use crate::time_profile::{Frame, Process, Thread, TimeProfile};
use regex::Regex;
use std::io::BufRead;
use std::sync::LazyLock;

/// Nanoseconds per sample at the only supported rate of one per millisecond.
const SAMPLE_PERIOD_NS: i64 = 1_000_000;
const SUPPORTED_REPORT_VERSION: i64 = 7;
const FRAME_ROOT_DEPTH: usize = 1;

static CALL_GRAPH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+\s!:|]*)(\d+)\s+(.*)$").unwrap());
static PROCESS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\s\[(\d+)\]").unwrap());

/// Parser for `sample` reports.
#[derive(Debug, Clone, Default)]
pub struct SampleParser;

impl SampleParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a complete report.
    pub fn parse<R: BufRead>(&self, reader: R) -> Result<Parsed> {
        let mut warnings = Vec::new();
        let mut process: Option<Process> = None;
        let mut found_call_graph = false;
        let mut lines = reader.lines().enumerate();

        for (index, line) in lines.by_ref() {
            let line_num = index + 1;
            let line = line?;
            let line = line.trim();

            if line.starts_with("Analysis of sampling") {
                warnings.extend(check_sample_period(line));
            } else if line.starts_with("Report Version") {
                check_report_version(line, line_num)?;
            } else if let Some(label) = line.strip_prefix("Process:") {
                if process.is_some() {
                    return Err(ParseError::MultipleProcesses { line: line_num });
                }
                process = Some(parse_process_label(label.trim(), line_num)?);
            } else if line.starts_with("Call graph") {
                found_call_graph = true;
                break;
            }
        }

        if !found_call_graph {
            return Err(ParseError::MissingCallGraph);
        }
        let mut process = process.ok_or(ParseError::MissingProcess)?;
        log::debug!(
            "sample report for {} [{}], {} ns per sample",
            process.name,
            process.pid,
            SAMPLE_PERIOD_NS
        );

        let mut builder = DepthTreeBuilder::new(FRAME_ROOT_DEPTH);
        for (index, line) in lines {
            let line_num = index + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                break;
            }

            let entry = parse_call_graph_line(line, line_num)?;
            if entry.depth == 0 {
                process.threads.push(Thread::new(entry.symbol, 0));
                builder.reset();
                continue;
            }

            let thread = process
                .threads
                .last_mut()
                .ok_or(ParseError::FrameOutsideThread { line: line_num })?;
            let weight = entry.count.checked_mul(SAMPLE_PERIOD_NS).ok_or_else(|| {
                ParseError::malformed(line_num, "sample count is too large", line)
            })?;
            builder
                .attach(thread, Frame::new(entry.symbol, weight, entry.depth))
                .map_err(|source| ParseError::Structure {
                    line: line_num,
                    source,
                })?;
        }

        for thread in &mut process.threads {
            fix_self_weights(thread)?;
        }

        let profile = TimeProfile {
            processes: vec![process],
        };
        log::debug!(
            "parsed sample report: {} threads, {} frames",
            profile.thread_count(),
            profile.frame_count()
        );
        Ok(Parsed { profile, warnings })
    }
}

impl ProfileParser for SampleParser {
    fn parse_profile(&self, reader: &mut dyn BufRead) -> Result<Parsed> {
        self.parse(reader)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CallGraphEntry<'a> {
    depth: usize,
    count: i64,
    symbol: &'a str,
}

fn parse_call_graph_line(line: &str, line_num: usize) -> Result<CallGraphEntry<'_>> {
    let caps = CALL_GRAPH_LINE.captures(line).ok_or_else(|| {
        ParseError::malformed(line_num, "could not parse call graph line", line)
    })?;
    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let count = caps[2]
        .parse()
        .map_err(|_| ParseError::malformed(line_num, "sample count is too large", line))?;
    let symbol = caps.get(3).map_or("", |m| m.as_str());

    Ok(CallGraphEntry {
        depth: prefix.len() / 2,
        count,
        symbol,
    })
}

/// `Analysis of sampling <name> (pid N) every 1 millisecond`
fn check_sample_period(line: &str) -> Option<Warning> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (period, unit) = match tokens.as_slice() {
        [.., period, unit] => (*period, *unit),
        _ => ("", ""),
    };
    if period == "1" && unit == "millisecond" {
        None
    } else {
        Some(Warning::UnsupportedSamplePeriod {
            period: period.to_string(),
            unit: unit.to_string(),
        })
    }
}

fn check_report_version(line: &str, line_num: usize) -> Result<()> {
    let version = line
        .split_once(':')
        .and_then(|(_, value)| value.trim().parse::<i64>().ok())
        .ok_or_else(|| ParseError::malformed(line_num, "could not parse report version", line))?;
    if version != SUPPORTED_REPORT_VERSION {
        return Err(ParseError::UnsupportedReportVersion(version));
    }
    Ok(())
}

fn parse_process_label(label: &str, line_num: usize) -> Result<Process> {
    let malformed = || ParseError::malformed(line_num, "could not parse process name and pid", label);
    let caps = PROCESS_LABEL.captures(label).ok_or_else(malformed)?;
    let pid = caps[2].parse().map_err(|_| malformed())?;
    Ok(Process::new(&caps[1], pid))
}

/// Turn cumulative weights into self weights.
///
/// Pre-order visits a parent before its children, so each child still holds
/// its cumulative weight when the parent subtracts it.
fn fix_self_weights(thread: &mut Thread) -> Result<()> {
    let order: Vec<_> = thread.walk().collect();
    for id in order {
        let children_total: i64 = thread
            .frame(id)
            .children()
            .iter()
            .map(|&child| thread.frame(child).self_weight_ns)
            .sum();
        let frame = thread.frame_mut(id);
        frame.self_weight_ns -= children_total;
        if frame.self_weight_ns < 0 {
            return Err(ParseError::CorruptWeights {
                symbol: frame.symbol_name.clone(),
                weight_ns: frame.self_weight_ns,
            });
        }
    }
    Ok(())
}
