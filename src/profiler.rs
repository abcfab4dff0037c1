//! Profiler state: the singleton driving the start/compile/report cycle
//!
//! One [`Profiler`] exists per thread of control, reached through the free
//! functions [`start`], [`configure`] and [`finish`]. The design assumes a
//! single logical path of open scopes at any instant; no locking is performed
//! internally, and concurrent instrumentation of one chain is an invariant
//! violation rather than a supported mode. A multi-threaded host simply gets
//! an independent chain per thread.
//!
//! The hot path is [`ScopeGuard`]'s drop: it stops its measurement and folds
//! it into the statistics tree. The first compile at a tree position pays one
//! root-to-leaf descent and caches the resolved statistics node on each
//! measurement along the way; every later compile at that position reuses the
//! cache instead of descending again.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::time::Instant;

use fnv::FnvHashSet;

use crate::build_id::BuildFingerprint;
use crate::config::ProfilerConfig;
use crate::measurement::MeasurementChain;
use crate::report;
use crate::results::{NodeId, ResultForest};

thread_local! {
    static PROFILER: RefCell<Profiler> = RefCell::new(Profiler::new(ProfilerConfig::default()));
}

/// Install a configuration on the calling thread's profiler and restart the
/// report-interval clock.
pub fn configure(config: ProfilerConfig) {
    PROFILER.with(|p| p.borrow_mut().configure(config));
}

/// Begin a scoped measurement.
///
/// The returned guard stops the measurement and compiles it into the
/// statistics tree when dropped, on every exit path. The first call opens the
/// root measurement; nested calls append to the innermost open scope.
/// Re-entering the scope that is already innermost and open, with the same
/// name and build, yields an inert guard instead of a duplicate measurement.
pub fn start(name: impl Into<String>, build: BuildFingerprint) -> ScopeGuard {
    let slot = PROFILER.with(|p| p.borrow_mut().start(name.into(), build));
    ScopeGuard {
        slot,
        _not_send: PhantomData,
    }
}

/// Flush the aggregated statistics to the configured report file now.
///
/// Also happens automatically when a root cycle completes, periodically per
/// the configured interval, and at profiler teardown.
pub fn finish() {
    PROFILER.with(|p| p.borrow_mut().flush());
}

/// Run `f` against the calling thread's profiler state.
///
/// Read-only; useful for inspecting aggregated statistics in tests or for
/// host-side health checks.
pub fn with_profiler<R>(f: impl FnOnce(&Profiler) -> R) -> R {
    PROFILER.with(|p| f(&p.borrow()))
}

/// Auto-stopper returned by [`start`]; the only path by which a measurement
/// transitions to "stopped".
#[must_use = "the scope is measured until this guard is dropped"]
#[derive(Debug)]
pub struct ScopeGuard {
    slot: Option<usize>,
    // Guards belong to the thread whose chain they index into.
    _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
    /// An inert guard measures nothing and compiles nothing on release.
    pub fn is_inert(&self) -> bool {
        self.slot.is_none()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            PROFILER.with(|p| p.borrow_mut().stop_and_compile(slot));
        }
    }
}

/// Per-thread profiler state: the open measurement chain, the persistent
/// statistics forest, and the set of builds that contributed samples during
/// the current compile cycle.
#[derive(Debug)]
pub struct Profiler {
    chain: MeasurementChain,
    forest: ResultForest,
    active_builds: FnvHashSet<BuildFingerprint>,
    config: ProfilerConfig,
    last_output: Instant,
}

impl Profiler {
    pub fn new(config: ProfilerConfig) -> Self {
        Profiler {
            chain: MeasurementChain::new(),
            forest: ResultForest::new(),
            active_builds: FnvHashSet::default(),
            config,
            last_output: Instant::now(),
        }
    }

    /// Aggregated statistics collected so far.
    pub fn forest(&self) -> &ResultForest {
        &self.forest
    }

    /// Builds that produced a completed sample during the current cycle.
    pub fn active_builds(&self) -> &FnvHashSet<BuildFingerprint> {
        &self.active_builds
    }

    /// Number of scopes currently open on this thread.
    pub fn open_scopes(&self) -> usize {
        self.chain.len()
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    fn configure(&mut self, config: ProfilerConfig) {
        self.config = config;
        self.last_output = Instant::now();
    }

    /// Open a measurement, returning its chain slot, or `None` when the call
    /// collapses into the already-open innermost scope.
    fn start(&mut self, name: String, build: BuildFingerprint) -> Option<usize> {
        if self.chain.is_empty() {
            // First measurement is the root of the cycle.
            return Some(self.chain.start_root(name, build));
        }

        let deepest = self
            .chain
            .deepest_open()
            .expect("non-empty chain has a deepest open scope");
        let innermost = self.chain.get(deepest);
        if innermost.is_running() && innermost.name() == name && innermost.build() == build {
            // Immediate recursive re-entry at the same position; measuring it
            // again would double-count the same activation.
            tracing::debug!(scope = %name, "collapsing recursive re-entry");
            return None;
        }

        Some(self.chain.attach_child(deepest, name, build))
    }

    /// Close the scope at `slot` and fold it into the statistics tree.
    fn stop_and_compile(&mut self, slot: usize) {
        if let Some(open) = self.chain.get(slot).child() {
            let scope = self.chain.get(slot).name().to_string();
            let child = self.chain.get(open).name().to_string();
            tracing::error!(
                scope = %scope,
                open_child = %child,
                "scope closed while a child scope is still open"
            );
            panic!(
                "profiler invariant violated: scope '{scope}' closed while child \
                 '{child}' is still open"
            );
        }

        self.chain.get_mut(slot).stop();

        match self.chain.get(slot).parent() {
            None => self.compile_root(slot),
            Some(_) => self.compile_child(slot),
        }
    }

    fn compile_root(&mut self, slot: usize) {
        let id = match self.chain.get(slot).resolved() {
            Some(id) => id,
            None => {
                let (name, build) = {
                    let m = self.chain.get(slot);
                    (m.name().to_string(), m.build())
                };
                self.forest.resolve_root(&name, build)
            }
        };

        let measurement = self.chain.release(slot);
        self.forest.integrate_sample(id, &measurement);
        self.active_builds.insert(measurement.build());

        // End of the root cycle: flush, then reset for the next cycle.
        self.dump();
        self.last_output = Instant::now();
        self.active_builds.clear();
        self.chain.clear();
    }

    fn compile_child(&mut self, slot: usize) {
        let id = self.resolve(slot);

        let measurement = self.chain.release(slot);
        self.forest.integrate_sample(id, &measurement);
        self.active_builds.insert(measurement.build());

        self.maybe_dump();
    }

    /// Resolve the statistics node for the scope at `slot`.
    ///
    /// Fast paths first: the measurement's own cached node, then a lookup
    /// under the parent's cached node. Only the first compile at a branch
    /// pays the full descent.
    fn resolve(&mut self, slot: usize) -> NodeId {
        if let Some(id) = self.chain.get(slot).resolved() {
            return id;
        }

        if let Some(parent) = self.chain.get(slot).parent() {
            if let Some(parent_id) = self.chain.get(parent).resolved() {
                let (name, build) = {
                    let m = self.chain.get(slot);
                    (m.name().to_string(), m.build())
                };
                let id = self.forest.resolve_child(parent_id, &name, build);
                self.chain.get_mut(slot).set_resolved(id);
                return id;
            }
        }

        self.resolve_descent(slot)
    }

    /// First compile along this branch: descend from the root measurement,
    /// resolving and caching statistics nodes level by level. Still-running
    /// ancestors contribute their provisional elapsed time on the way down.
    fn resolve_descent(&mut self, slot: usize) -> NodeId {
        let mut index = 0;
        let mut parent_id: Option<NodeId> = None;

        loop {
            let (name, build, running, resolved) = {
                let m = self.chain.get(index);
                (m.name().to_string(), m.build(), m.is_running(), m.resolved())
            };

            let id = match resolved {
                Some(id) => id,
                None => {
                    let id = match parent_id {
                        None => self.forest.resolve_root(&name, build),
                        Some(parent) => self.forest.resolve_child(parent, &name, build),
                    };
                    self.chain.get_mut(index).set_resolved(id);
                    id
                }
            };

            if index == slot {
                return id;
            }

            if running {
                self.forest.integrate_partial(id, self.chain.get(index));
            }

            parent_id = Some(id);
            index = self
                .chain
                .get(index)
                .child()
                .expect("open path must reach the compiled scope");
        }
    }

    fn maybe_dump(&mut self) {
        if self.config.report_interval.is_zero() {
            return;
        }
        if self.last_output.elapsed() >= self.config.report_interval {
            self.last_output = Instant::now();
            self.dump();
        }
    }

    fn flush(&mut self) {
        self.dump();
        self.last_output = Instant::now();
    }

    fn dump(&self) {
        let path = &self.config.output_path;
        if let Err(error) = report::write_report(&self.forest, &self.active_builds, path) {
            // A failed report write must never affect measurement correctness.
            tracing::warn!(
                path = %path.display(),
                "skipping report write: {error:#}"
            );
        }
    }
}

impl Drop for Profiler {
    fn drop(&mut self) {
        // Teardown flush; stay quiet if nothing was ever measured.
        if !self.forest.is_empty() {
            self.dump();
        }
    }
}
