//! The normalized call-tree model produced by every input parser.
//!
//! A [`TimeProfile`] owns processes, a [`Process`] owns threads and a
//! [`Thread`] owns every [`Frame`] recorded for it. Frames live in a
//! per-thread arena and refer to their parent and children by [`FrameId`],
//! so walking up to the root never needs a second owner.

use serde::Serialize;
use serde::ser::{SerializeSeq, SerializeStruct, Serializer};

/// Index of a frame inside its thread's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

/// One call-stack entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub symbol_name: String,
    /// Time spent in this frame excluding its children, in nanoseconds.
    pub self_weight_ns: i64,
    pub depth: usize,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
}

impl Frame {
    pub fn new(symbol_name: impl Into<String>, self_weight_ns: i64, depth: usize) -> Self {
        Self {
            symbol_name: symbol_name.into(),
            self_weight_ns,
            depth,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<FrameId> {
        self.parent
    }

    pub fn children(&self) -> &[FrameId] {
        &self.children
    }
}

/// A thread and the call stacks sampled on it.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub name: String,
    /// Thread id, 0 when the input doesn't carry one.
    pub tid: u64,
    frames: Vec<Frame>,
    roots: Vec<FrameId>,
}

impl Thread {
    pub fn new(name: impl Into<String>, tid: u64) -> Self {
        Self {
            name: name.into(),
            tid,
            frames: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Append a new root frame.
    pub fn add_root(&mut self, mut frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len());
        frame.parent = None;
        self.frames.push(frame);
        self.roots.push(id);
        id
    }

    /// Append `frame` as the last child of `parent`.
    pub fn add_child(&mut self, parent: FrameId, mut frame: Frame) -> FrameId {
        let id = FrameId(self.frames.len());
        frame.parent = Some(parent);
        self.frames.push(frame);
        self.frames[parent.0].children.push(id);
        id
    }

    pub fn frame(&self, id: FrameId) -> &Frame {
        &self.frames[id.0]
    }

    pub(crate) fn frame_mut(&mut self, id: FrameId) -> &mut Frame {
        &mut self.frames[id.0]
    }

    pub fn roots(&self) -> &[FrameId] {
        &self.roots
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The frame itself followed by each of its ancestors up to the root.
    pub fn ancestors(&self, id: FrameId) -> Ancestors<'_> {
        Ancestors {
            thread: self,
            next: Some(id),
        }
    }

    /// Depth-first pre-order walk over every root in order.
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            thread: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    fn subtree_eq(&self, id: FrameId, other: &Thread, other_id: FrameId) -> bool {
        let a = self.frame(id);
        let b = other.frame(other_id);
        a.symbol_name == b.symbol_name
            && a.self_weight_ns == b.self_weight_ns
            && a.depth == b.depth
            && a.children.len() == b.children.len()
            && a.children
                .iter()
                .zip(&b.children)
                .all(|(&x, &y)| self.subtree_eq(x, other, y))
    }
}

/// Threads compare by name, id and the shape of their call trees, not by
/// arena layout.
impl PartialEq for Thread {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.tid == other.tid
            && self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(&a, &b)| self.subtree_eq(a, other, b))
    }
}

impl Eq for Thread {}

pub struct Ancestors<'a> {
    thread: &'a Thread,
    next: Option<FrameId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = (FrameId, &'a Frame);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let frame = self.thread.frame(id);
        self.next = frame.parent;
        Some((id, frame))
    }
}

pub struct Walk<'a> {
    thread: &'a Thread,
    stack: Vec<FrameId>,
}

impl Iterator for Walk<'_> {
    type Item = FrameId;

    fn next(&mut self) -> Option<FrameId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.thread.frame(id).children.iter().rev().copied());
        Some(id)
    }
}

/// A process and its threads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Process {
    pub name: String,
    /// Process id, 0 when unknown.
    pub pid: u64,
    pub threads: Vec<Thread>,
}

impl Process {
    pub fn new(name: impl Into<String>, pid: u64) -> Self {
        Self {
            name: name.into(),
            pid,
            threads: Vec::new(),
        }
    }
}

/// Every process parsed from one input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TimeProfile {
    pub processes: Vec<Process>,
}

impl TimeProfile {
    pub fn thread_count(&self) -> usize {
        self.processes.iter().map(|p| p.threads.len()).sum()
    }

    pub fn frame_count(&self) -> usize {
        self.processes
            .iter()
            .flat_map(|p| &p.threads)
            .map(Thread::frame_count)
            .sum()
    }
}

// ============================================================================
// Nested serialization
// ============================================================================

impl Serialize for Thread {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Thread", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("tid", &self.tid)?;
        state.serialize_field(
            "frames",
            &FrameList {
                thread: self,
                ids: &self.roots,
            },
        )?;
        state.end()
    }
}

struct FrameList<'a> {
    thread: &'a Thread,
    ids: &'a [FrameId],
}

impl Serialize for FrameList<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.ids.len()))?;
        for &id in self.ids {
            seq.serialize_element(&FrameNode {
                thread: self.thread,
                id,
            })?;
        }
        seq.end()
    }
}

struct FrameNode<'a> {
    thread: &'a Thread,
    id: FrameId,
}

impl Serialize for FrameNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let frame = self.thread.frame(self.id);
        let mut state = serializer.serialize_struct("Frame", 4)?;
        state.serialize_field("name", &frame.symbol_name)?;
        state.serialize_field("self_weight_ns", &frame.self_weight_ns)?;
        state.serialize_field("depth", &frame.depth)?;
        state.serialize_field(
            "children",
            &FrameList {
                thread: self.thread,
                ids: &frame.children,
            },
        )?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_thread() -> Thread {
        let mut thread = Thread::new("main", 7);
        let main = thread.add_root(Frame::new("main", 0, 1));
        let work = thread.add_child(main, Frame::new("work", 5, 2));
        thread.add_child(work, Frame::new("leaf", 3, 3));
        thread.add_child(main, Frame::new("idle", 1, 2));
        thread.add_root(Frame::new("signal", 2, 1));
        thread
    }

    #[test]
    fn walk_is_depth_first_pre_order() {
        let thread = sample_thread();
        let names: Vec<&str> = thread
            .walk()
            .map(|id| thread.frame(id).symbol_name.as_str())
            .collect();
        assert_eq!(names, vec!["main", "work", "leaf", "idle", "signal"]);
    }

    #[test]
    fn ancestors_start_at_the_frame_and_end_at_the_root() {
        let thread = sample_thread();
        let leaf = thread
            .walk()
            .find(|&id| thread.frame(id).symbol_name == "leaf")
            .unwrap();
        let names: Vec<&str> = thread
            .ancestors(leaf)
            .map(|(_, f)| f.symbol_name.as_str())
            .collect();
        assert_eq!(names, vec!["leaf", "work", "main"]);
    }

    #[test]
    fn threads_compare_by_tree_shape() {
        let a = sample_thread();

        // Same tree, frames inserted in a different arena order.
        let mut b = Thread::new("main", 7);
        let main = b.add_root(Frame::new("main", 0, 1));
        b.add_root(Frame::new("signal", 2, 1));
        let work = b.add_child(main, Frame::new("work", 5, 2));
        b.add_child(main, Frame::new("idle", 1, 2));
        b.add_child(work, Frame::new("leaf", 3, 3));
        assert_eq!(a, b);

        let mut c = sample_thread();
        let root = c.roots()[1];
        c.frame_mut(root).self_weight_ns = 9;
        assert_ne!(a, c);
    }

    #[test]
    fn counts() {
        let mut process = Process::new("app", 12);
        process.threads.push(sample_thread());
        process.threads.push(Thread::new("idle", 8));
        let profile = TimeProfile {
            processes: vec![process],
        };
        assert_eq!(profile.thread_count(), 2);
        assert_eq!(profile.frame_count(), 5);
    }

    #[test]
    fn serializes_as_nested_tree() {
        let mut thread = Thread::new("main", 1);
        let root = thread.add_root(Frame::new("main", 0, 1));
        thread.add_child(root, Frame::new("work", 4, 2));

        let json = serde_json::to_value(&thread).unwrap();
        assert_eq!(json["name"], "main");
        assert_eq!(json["frames"][0]["name"], "main");
        assert_eq!(json["frames"][0]["children"][0]["name"], "work");
        assert_eq!(json["frames"][0]["children"][0]["self_weight_ns"], 4);
        assert_eq!(json["frames"][0]["children"][0]["depth"], 2);
    }
}
