//! Parse collapsed stacks, one `root;child;leaf <count>` line per stack.
//!
//! Collapsed output carries no process or thread information, so every stack
//! becomes a root of a single unnamed thread in a single unnamed process.
//! Lines that don't end in a non-negative count are skipped.

use crate::error::Result;
use crate::parser::{Parsed, ProfileParser};
use crate::time_profile::{Frame, Process, Thread, TimeProfile};
use std::io::BufRead;

/// Parser for collapsed stacks.
#[derive(Debug, Clone, Default)]
pub struct CollapsedParser;

impl CollapsedParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse every line of `reader`.
    pub fn parse<R: BufRead>(&self, reader: R) -> Result<Parsed> {
        let mut thread = Thread::new("", 0);
        let mut skipped = 0usize;

        for line in reader.lines() {
            let line = line?;
            let Some((frames, count)) = parse_line(&line) else {
                skipped += 1;
                continue;
            };
            add_stack(&mut thread, frames, count);
        }

        if skipped > 0 {
            log::debug!("skipped {skipped} collapsed lines without a stack and count");
        }
        log::debug!(
            "parsed {} collapsed stacks into {} frames",
            thread.roots().len(),
            thread.frame_count()
        );

        let mut process = Process::new("", 0);
        process.threads.push(thread);
        Ok(Parsed {
            profile: TimeProfile {
                processes: vec![process],
            },
            warnings: Vec::new(),
        })
    }
}

impl ProfileParser for CollapsedParser {
    fn parse_profile(&self, reader: &mut dyn BufRead) -> Result<Parsed> {
        self.parse(reader)
    }
}

/// Split a line into its frames and count.
fn parse_line(line: &str) -> Option<(std::str::Split<'_, char>, i64)> {
    let (stack, count) = line.trim_end().rsplit_once(' ')?;
    let count: i64 = count.parse().ok()?;
    if stack.is_empty() || count < 0 {
        return None;
    }
    Some((stack.split(';'), count))
}

/// Add one stack as a new root chain; the leaf carries `count`.
fn add_stack<'a>(thread: &mut Thread, mut frames: impl Iterator<Item = &'a str>, count: i64) {
    let Some(root) = frames.next() else {
        return;
    };
    let mut last = thread.add_root(Frame::new(root, 0, 0));
    for (depth, name) in frames.enumerate() {
        last = thread.add_child(last, Frame::new(name, 0, depth + 1));
    }
    thread.frame_mut(last).self_weight_ns = count;
}
