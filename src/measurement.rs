//! Transient measurements and the open-scope chain
//!
//! A [`Measurement`] records one activation of an instrumented scope. Open
//! measurements form a single path from the root scope to the innermost open
//! scope — the implicit call stack — held as parent/child links inside a small
//! arena owned by the profiler. Nodes are appended when a scope opens and
//! released in LIFO order as soon as the scope has been folded into the
//! statistics tree, so a measurement never outlives one compile cycle.

use std::time::{Duration, Instant};

use crate::build_id::BuildFingerprint;
use crate::results::NodeId;

/// One open or just-closed scope activation.
#[derive(Debug, Clone)]
pub struct Measurement {
    name: String,
    build: BuildFingerprint,
    start: Instant,
    end: Option<Instant>,
    parent: Option<usize>,
    child: Option<usize>,
    /// Back-reference to the statistics node this measurement resolves to,
    /// populated on the first root-to-leaf descent and consulted before any
    /// further descent.
    resolved: Option<NodeId>,
}

impl Measurement {
    fn new(name: String, build: BuildFingerprint, parent: Option<usize>) -> Self {
        Measurement {
            name,
            build,
            start: Instant::now(),
            end: None,
            parent,
            child: None,
            resolved: None,
        }
    }

    /// Scope name, usually the function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fingerprint of the build this sample is being taken under.
    pub fn build(&self) -> BuildFingerprint {
        self.build
    }

    /// A measurement is running until its guard stops it.
    pub fn is_running(&self) -> bool {
        self.end.is_none()
    }

    /// Completed duration, or `None` while still running.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }

    /// Time elapsed so far (final duration once stopped).
    pub fn elapsed(&self) -> Duration {
        match self.end {
            Some(end) => end - self.start,
            None => self.start.elapsed(),
        }
    }

    pub(crate) fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub(crate) fn child(&self) -> Option<usize> {
        self.child
    }

    pub(crate) fn resolved(&self) -> Option<NodeId> {
        self.resolved
    }

    pub(crate) fn set_resolved(&mut self, id: NodeId) {
        self.resolved = Some(id);
    }

    /// Record the end timestamp. Idempotent.
    pub(crate) fn stop(&mut self) {
        if self.end.is_none() {
            self.end = Some(Instant::now());
        }
    }
}

/// The arena holding the currently open measurement path.
///
/// Because scopes close strictly LIFO, the arena doubles as a stack: the last
/// node is always the deepest one, and releasing a completed leaf pops it.
/// Parent/child links are kept explicit anyway so that the single-active-path
/// invariant can be checked where it is established.
#[derive(Debug, Default)]
pub struct MeasurementChain {
    nodes: Vec<Measurement>,
}

impl MeasurementChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, index: usize) -> &Measurement {
        &self.nodes[index]
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> &mut Measurement {
        &mut self.nodes[index]
    }

    /// Open the root measurement. The chain must be empty.
    pub fn start_root(&mut self, name: String, build: BuildFingerprint) -> usize {
        debug_assert!(self.nodes.is_empty());
        self.nodes.push(Measurement::new(name, build, None));
        0
    }

    /// Index of the innermost open measurement, following child links from
    /// the root.
    pub fn deepest_open(&self) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut index = 0;
        while let Some(child) = self.nodes[index].child {
            index = child;
        }
        Some(index)
    }

    /// Attach a new measurement under `parent`.
    ///
    /// A node may never already have a child when a new one is attached: an
    /// occupied child slot means a second concurrent scope is being opened at
    /// the same position (overlapping or cross-thread instrumentation), and
    /// that aborts rather than corrupt the statistics.
    pub fn attach_child(&mut self, parent: usize, name: String, build: BuildFingerprint) -> usize {
        if let Some(open) = self.nodes[parent].child {
            let open_name = self.nodes[open].name.clone();
            let parent_name = self.nodes[parent].name.clone();
            tracing::error!(
                scope = %name,
                open_child = %open_name,
                parent = %parent_name,
                "second concurrent child scope opened at the same position"
            );
            panic!(
                "profiler invariant violated: scope '{name}' opened under '{parent_name}' \
                 while child '{open_name}' is still open"
            );
        }

        let index = self.nodes.len();
        self.nodes.push(Measurement::new(name, build, Some(parent)));
        self.nodes[parent].child = Some(index);
        index
    }

    /// Remove a fully compiled leaf, freeing the parent's child slot for the
    /// next sibling at that position.
    pub(crate) fn release(&mut self, index: usize) -> Measurement {
        debug_assert_eq!(index, self.nodes.len() - 1, "chain must release LIFO");
        debug_assert!(self.nodes[index].child.is_none());

        let removed = self.nodes.pop().expect("release on empty chain");
        if let Some(parent) = removed.parent {
            self.nodes[parent].child = None;
        }
        removed
    }

    /// Discard the whole chain after a completed root cycle.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }
}
