//! Persistent statistics tree and incremental sample integration
//!
//! Every compiled measurement is folded into a [`ResultNode`] keyed by scope
//! name and build fingerprint at its position in the tree. Nodes keep running
//! statistics only — sample count, min, max, incremental mean, cumulative
//! total — never raw sample history, so integrating one more sample is O(1).
//!
//! Nodes live in an arena owned by [`ResultForest`]; a [`NodeId`] is the
//! stable handle measurements cache to skip repeated tree descent. Nodes are
//! never deleted: the tree grows lazily as new (name, build) pairs are seen
//! and persists across root cycles.

use std::time::Duration;

use fnv::FnvHashMap;

use crate::build_id::BuildFingerprint;
use crate::measurement::Measurement;

/// Stable handle to a node in the result arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Aggregated statistics for one (scope name, build fingerprint) pair at one
/// tree position.
///
/// While `samples == 0` the node stands for a scope that is currently running
/// with no completed sample yet; only the provisional `total` is meaningful.
#[derive(Debug)]
pub struct ResultNode {
    pub name: String,
    pub build: BuildFingerprint,
    /// Completed samples folded into this node.
    pub samples: u64,
    pub min: Duration,
    pub max: Duration,
    /// Incremental mean over completed samples.
    pub average: Duration,
    /// Cumulative duration across completed samples (elapsed-so-far while
    /// `samples == 0`).
    pub total: Duration,

    parent: Option<NodeId>,
    children: FnvHashMap<String, FnvHashMap<BuildFingerprint, NodeId>>,
}

impl ResultNode {
    fn new(name: String, build: BuildFingerprint, parent: Option<NodeId>) -> Self {
        ResultNode {
            name,
            build,
            samples: 0,
            min: Duration::ZERO,
            max: Duration::ZERO,
            average: Duration::ZERO,
            total: Duration::ZERO,
            parent,
            children: FnvHashMap::default(),
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// The persistent statistics forest: one tree per root scope name/build.
#[derive(Debug, Default)]
pub struct ResultForest {
    nodes: Vec<ResultNode>,
    roots: FnvHashMap<String, FnvHashMap<BuildFingerprint, NodeId>>,
}

impl ResultForest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ResultNode {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut ResultNode {
        &mut self.nodes[id.0]
    }

    /// Locate or lazily create the root node for `(name, build)`.
    pub fn resolve_root(&mut self, name: &str, build: BuildFingerprint) -> NodeId {
        if let Some(id) = self.roots.get(name).and_then(|builds| builds.get(&build)) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(ResultNode::new(name.to_string(), build, None));
        self.roots
            .entry(name.to_string())
            .or_default()
            .insert(build, id);
        id
    }

    /// Locate or lazily create the child of `parent` for `(name, build)`.
    pub fn resolve_child(&mut self, parent: NodeId, name: &str, build: BuildFingerprint) -> NodeId {
        let existing = self.nodes[parent.0]
            .children
            .get(name)
            .and_then(|builds| builds.get(&build));
        if let Some(id) = existing {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(ResultNode::new(name.to_string(), build, Some(parent)));
        self.nodes[parent.0]
            .children
            .entry(name.to_string())
            .or_default()
            .insert(build, id);
        id
    }

    /// Root node for `(name, build)`, if one has been compiled.
    pub fn root(&self, name: &str, build: BuildFingerprint) -> Option<&ResultNode> {
        self.root_id(name, build).map(|id| self.node(id))
    }

    pub fn root_id(&self, name: &str, build: BuildFingerprint) -> Option<NodeId> {
        self.roots
            .get(name)
            .and_then(|builds| builds.get(&build))
            .copied()
    }

    /// Child of `parent` for `(name, build)`, if one has been compiled.
    pub fn child_id(&self, parent: NodeId, name: &str, build: BuildFingerprint) -> Option<NodeId> {
        self.nodes[parent.0]
            .children
            .get(name)
            .and_then(|builds| builds.get(&build))
            .copied()
    }

    /// Root ids grouped by name, then by build fingerprint, in sorted order.
    ///
    /// Storage is hash-keyed; ordering happens at render time.
    pub fn roots_sorted(&self) -> Vec<NodeId> {
        Self::sorted_ids(&self.roots)
    }

    /// Child ids of `parent` grouped by name, then build, in sorted order.
    pub fn children_sorted(&self, parent: NodeId) -> Vec<NodeId> {
        Self::sorted_ids(&self.nodes[parent.0].children)
    }

    fn sorted_ids(map: &FnvHashMap<String, FnvHashMap<BuildFingerprint, NodeId>>) -> Vec<NodeId> {
        let mut names: Vec<&String> = map.keys().collect();
        names.sort();

        let mut ids = Vec::new();
        for name in names {
            let builds = &map[name];
            let mut keyed: Vec<(&BuildFingerprint, &NodeId)> = builds.iter().collect();
            keyed.sort_by_key(|(build, _)| **build);
            ids.extend(keyed.into_iter().map(|(_, id)| *id));
        }
        ids
    }

    /// Fold one completed sample into `id`.
    ///
    /// Rejects a measurement that is still running: settled min/max/mean must
    /// never be perturbed by a scope that has not finished.
    pub(crate) fn integrate_sample(&mut self, id: NodeId, measurement: &Measurement) {
        let Some(duration) = measurement.duration() else {
            tracing::error!(
                scope = measurement.name(),
                "cannot integrate a measurement that is still running"
            );
            return;
        };
        self.integrate_duration(id, duration);
    }

    /// Fold a still-running measurement's partial progress into `id`.
    ///
    /// Only the provisional total of a node with no completed sample is
    /// updated; once real samples exist the running child leaves the
    /// statistics untouched.
    pub(crate) fn integrate_partial(&mut self, id: NodeId, measurement: &Measurement) {
        let node = self.node_mut(id);
        if node.samples == 0 {
            node.total = measurement.elapsed();
        }
    }

    pub(crate) fn integrate_duration(&mut self, id: NodeId, duration: Duration) {
        let node = self.node_mut(id);
        if node.samples == 0 {
            node.min = duration;
            node.max = duration;
            node.average = duration;
            node.total = duration;
            node.samples = 1;
            return;
        }

        node.samples += 1;

        // Incremental mean in integer nanoseconds; no sample history exists
        // to recompute from.
        let n = u128::from(node.samples);
        let mean = (node.average.as_nanos() * (n - 1) + duration.as_nanos()) / n;
        node.average = Duration::from_nanos(mean as u64);

        if duration < node.min {
            node.min = duration;
        }
        if duration > node.max {
            node.max = duration;
        }
        node.total += duration;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn build() -> BuildFingerprint {
        BuildFingerprint::current()
    }

    #[test]
    fn test_first_sample_initializes_all_stats() {
        let mut forest = ResultForest::new();
        let id = forest.resolve_root("main", build());
        forest.integrate_duration(id, ms(10));

        let node = forest.node(id);
        assert_eq!(node.samples, 1);
        assert_eq!(node.min, ms(10));
        assert_eq!(node.max, ms(10));
        assert_eq!(node.average, ms(10));
        assert_eq!(node.total, ms(10));
    }

    #[test]
    fn test_three_samples_report_exact_stats() {
        let mut forest = ResultForest::new();
        let id = forest.resolve_root("main", build());
        for v in [10, 20, 30] {
            forest.integrate_duration(id, ms(v));
        }

        let node = forest.node(id);
        assert_eq!(node.samples, 3);
        assert_eq!(node.min, ms(10));
        assert_eq!(node.max, ms(30));
        assert_eq!(node.average, ms(20));
        assert_eq!(node.total, ms(60));
    }

    #[test]
    fn test_total_is_cumulative_not_derived() {
        let mut forest = ResultForest::new();
        let id = forest.resolve_root("main", build());
        forest.integrate_duration(id, ms(7));
        forest.integrate_duration(id, ms(10));

        let node = forest.node(id);
        assert_eq!(node.total, ms(17));
        // 17 / 2 truncates in nanoseconds; the mean is tracked on its own.
        assert_eq!(node.average, Duration::from_nanos(8_500_000));
    }

    #[test]
    fn test_same_name_different_builds_do_not_mix() {
        let mut forest = ResultForest::new();
        let debugish = build().with(crate::build_id::Property::DebugAssertions);
        let releaseish = debugish.without(crate::build_id::Property::DebugAssertions);

        let a = forest.resolve_root("main", debugish);
        let b = forest.resolve_root("main", releaseish);
        assert_ne!(a, b);

        forest.integrate_duration(a, ms(10));
        let slow = forest.node(a);
        let fast = forest.node(b);
        assert_eq!(slow.samples, 1);
        assert_eq!(fast.samples, 0);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let mut forest = ResultForest::new();
        let a = forest.resolve_root("main", build());
        let b = forest.resolve_root("main", build());
        assert_eq!(a, b);

        let child_a = forest.resolve_child(a, "inner", build());
        let child_b = forest.resolve_child(a, "inner", build());
        assert_eq!(child_a, child_b);
        assert_eq!(forest.node(child_a).parent(), Some(a));
    }

    #[test]
    fn test_partial_integration_only_touches_fresh_nodes() {
        let mut forest = ResultForest::new();
        let id = forest.resolve_root("main", build());

        let mut chain = crate::measurement::MeasurementChain::new();
        let m = chain.start_root("main".into(), build());

        // No completed sample yet: provisional total tracks elapsed time.
        forest.integrate_partial(id, chain.get(m));
        assert_eq!(forest.node(id).samples, 0);

        // Once a real sample exists, a running child must not perturb it.
        forest.integrate_duration(id, ms(5));
        forest.integrate_partial(id, chain.get(m));
        let node = forest.node(id);
        assert_eq!(node.samples, 1);
        assert_eq!(node.total, ms(5));
    }

    #[test]
    fn test_integrating_running_measurement_as_sample_is_rejected() {
        let mut forest = ResultForest::new();
        let id = forest.resolve_root("main", build());

        let mut chain = crate::measurement::MeasurementChain::new();
        let m = chain.start_root("main".into(), build());

        forest.integrate_sample(id, chain.get(m));
        assert_eq!(forest.node(id).samples, 0);
    }

    #[test]
    fn test_sorted_traversal_groups_by_name_then_build() {
        let mut forest = ResultForest::new();
        let base = build().without(crate::build_id::Property::Avx2);
        let variant = base.with(crate::build_id::Property::Avx2);

        forest.resolve_root("update", base);
        forest.resolve_root("draw", base);
        forest.resolve_root("draw", variant);

        let roots = forest.roots_sorted();
        let labels: Vec<(&str, BuildFingerprint)> = roots
            .iter()
            .map(|id| {
                let n = forest.node(*id);
                (n.name.as_str(), n.build)
            })
            .collect();

        let mut expected = vec![("draw", base), ("draw", variant), ("update", base)];
        expected.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1)));
        assert_eq!(labels, expected);
    }

    proptest! {
        #[test]
        fn prop_min_max_match_true_extremes(durations in prop::collection::vec(1u64..2_000_000_000, 1..40)) {
            let mut forest = ResultForest::new();
            let id = forest.resolve_root("scope", build());
            for &nanos in &durations {
                forest.integrate_duration(id, Duration::from_nanos(nanos));
            }

            let node = forest.node(id);
            prop_assert_eq!(node.samples, durations.len() as u64);
            prop_assert_eq!(node.min, Duration::from_nanos(*durations.iter().min().unwrap()));
            prop_assert_eq!(node.max, Duration::from_nanos(*durations.iter().max().unwrap()));
        }

        #[test]
        fn prop_incremental_mean_matches_arithmetic_mean(durations in prop::collection::vec(1u64..2_000_000_000, 1..40)) {
            let mut forest = ResultForest::new();
            let id = forest.resolve_root("scope", build());
            for &nanos in &durations {
                forest.integrate_duration(id, Duration::from_nanos(nanos));
            }

            let truth = durations.iter().map(|&n| u128::from(n)).sum::<u128>()
                / durations.len() as u128;
            let got = forest.node(id).average.as_nanos();

            // Each incremental step truncates by less than a nanosecond.
            let tolerance = durations.len() as u128;
            prop_assert!(got.abs_diff(truth) <= tolerance);
        }

        #[test]
        fn prop_total_is_exact_sum(durations in prop::collection::vec(1u64..2_000_000_000, 1..40)) {
            let mut forest = ResultForest::new();
            let id = forest.resolve_root("scope", build());
            for &nanos in &durations {
                forest.integrate_duration(id, Duration::from_nanos(nanos));
            }

            let sum: u128 = durations.iter().map(|&n| u128::from(n)).sum();
            prop_assert_eq!(forest.node(id).total.as_nanos(), sum);
        }

        #[test]
        fn prop_min_le_average_le_max(durations in prop::collection::vec(1u64..2_000_000_000, 1..40)) {
            let mut forest = ResultForest::new();
            let id = forest.resolve_root("scope", build());
            for &nanos in &durations {
                forest.integrate_duration(id, Duration::from_nanos(nanos));
            }

            let node = forest.node(id);
            prop_assert!(node.min <= node.average);
            prop_assert!(node.average <= node.max);
        }
    }
}
