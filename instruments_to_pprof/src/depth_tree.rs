//! Rebuild a call tree from a flat, depth-annotated sequence of frames.
//!
//! Both the Instruments deep copy and the `sample` call graph list frames in
//! pre-order with an indentation depth. [`DepthTreeBuilder`] remembers the
//! most recently attached frame and uses it to decide where the next one goes.

use crate::time_profile::{Frame, FrameId, Thread};
use thiserror::Error;

/// Inconsistent depth sequences.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("first frame in thread has wrong depth: expected {expected}, found {found}")]
    FirstFrameWrongDepth { expected: usize, found: usize },

    #[error("skipped a depth level: previous frame at depth {previous}, this one at {found}")]
    SkippedDepth { previous: usize, found: usize },

    #[error("frame at depth {depth} is shallower than the thread root depth {root_depth}")]
    AboveRoot { depth: usize, root_depth: usize },

    #[error("ancestor not found: no frame at depth {} above this frame", .depth - 1)]
    AncestorNotFound { depth: usize },
}

/// Attaches frames to a [`Thread`] according to their depth.
#[derive(Debug, Clone)]
pub struct DepthTreeBuilder {
    root_depth: usize,
    last: Option<FrameId>,
}

impl DepthTreeBuilder {
    /// `root_depth` is the depth at which a frame starts a new root.
    pub fn new(root_depth: usize) -> Self {
        Self {
            root_depth,
            last: None,
        }
    }

    /// Forget the last frame. Call this whenever a new thread starts.
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Attach `frame` to `thread` and return its id.
    pub fn attach(&mut self, thread: &mut Thread, frame: Frame) -> Result<FrameId, TreeError> {
        let depth = frame.depth;
        if depth < self.root_depth {
            return Err(TreeError::AboveRoot {
                depth,
                root_depth: self.root_depth,
            });
        }

        let id = if depth == self.root_depth {
            thread.add_root(frame)
        } else {
            let last = self.last.ok_or(TreeError::FirstFrameWrongDepth {
                expected: self.root_depth,
                found: depth,
            })?;
            let last_depth = thread.frame(last).depth;

            if depth == last_depth + 1 {
                thread.add_child(last, frame)
            } else if depth > last_depth {
                return Err(TreeError::SkippedDepth {
                    previous: last_depth,
                    found: depth,
                });
            } else {
                let parent = thread
                    .ancestors(last)
                    .find(|(_, f)| f.depth + 1 == depth)
                    .map(|(id, _)| id)
                    .ok_or(TreeError::AncestorNotFound { depth })?;
                thread.add_child(parent, frame)
            }
        };

        self.last = Some(id);
        Ok(id)
    }
}
