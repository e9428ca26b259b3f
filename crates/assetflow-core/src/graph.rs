//! Immutable asset graph built once per definitions snapshot.
//!
//! Invariants established by `AssetGraph::build`:
//! - every asset key is defined once (one producing group, or one source)
//! - the asset-level and group-level dependency graphs are acyclic
//! - at most one partitions definition reaches any unpartitioned asset
//!
//! Dependencies on keys that are neither produced nor declared as sources are
//! kept on the node; the resolver decides whether they are satisfiable.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::defs::{ExecutableGroup, GroupId, Metadata, SourceAsset};
use crate::error::GraphError;
use crate::key::AssetKey;
use crate::partitions::PartitionsDefinition;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetNode {
    pub key: AssetKey,
    /// Every declared dependency, including ones not present in the graph.
    pub upstream: BTreeSet<AssetKey>,
    pub downstream: BTreeSet<AssetKey>,
    pub partitions: Option<PartitionsDefinition>,
    /// Producing group; `None` for source assets.
    pub group: Option<GroupId>,
    pub group_name: String,
    pub metadata: Metadata,
    pub io_manager_key: Option<String>,
    /// Upstream key → I/O manager override declared on the reading input.
    pub input_managers: BTreeMap<AssetKey, String>,
}

impl AssetNode {
    pub fn is_source(&self) -> bool {
        self.group.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AssetGraph {
    nodes: BTreeMap<AssetKey, AssetNode>,
    groups: BTreeMap<GroupId, ExecutableGroup>,
    sources: BTreeMap<AssetKey, SourceAsset>,
    topo: Vec<AssetKey>,
    group_topo: Vec<GroupId>,
}

impl AssetGraph {
    pub fn build(
        groups: Vec<ExecutableGroup>,
        sources: Vec<SourceAsset>,
    ) -> Result<Self, GraphError> {
        let mut nodes: BTreeMap<AssetKey, AssetNode> = BTreeMap::new();
        let mut by_id: BTreeMap<GroupId, ExecutableGroup> = BTreeMap::new();

        for group in groups {
            group.validate()?;
            if by_id.contains_key(&group.id) {
                return Err(GraphError::InvalidDefinition {
                    group: group.id.to_string(),
                    reason: "group id is defined twice".into(),
                });
            }

            for (out_name, out) in &group.outs {
                if let Some(existing) = nodes.get(&out.key) {
                    return Err(GraphError::DuplicateKey {
                        key: out.key.clone(),
                        first: owner_label(existing),
                        second: format!("group '{}'", group.id),
                    });
                }
                let input_managers = group
                    .ins
                    .iter()
                    .filter_map(|(name, input)| {
                        input
                            .input_manager_key
                            .as_ref()
                            .map(|m| (input.resolve_key(name), m.clone()))
                    })
                    .collect();
                nodes.insert(
                    out.key.clone(),
                    AssetNode {
                        key: out.key.clone(),
                        upstream: group.deps_of(out_name),
                        downstream: BTreeSet::new(),
                        partitions: group.partitions.clone(),
                        group: Some(group.id.clone()),
                        group_name: group.group_name.clone(),
                        metadata: out.metadata.clone(),
                        io_manager_key: out.io_manager_key.clone(),
                        input_managers,
                    },
                );
            }
            by_id.insert(group.id.clone(), group);
        }

        let mut source_map = BTreeMap::new();
        for source in sources {
            if let Some(existing) = nodes.get(&source.key) {
                return Err(GraphError::DuplicateKey {
                    key: source.key.clone(),
                    first: owner_label(existing),
                    second: "a source asset".into(),
                });
            }
            nodes.insert(source.key.clone(), source_node(&source));
            source_map.insert(source.key.clone(), source);
        }

        // Wire reverse edges for deps that exist in the graph.
        let edges: Vec<(AssetKey, AssetKey)> = nodes
            .values()
            .flat_map(|n| n.upstream.iter().map(move |u| (u.clone(), n.key.clone())))
            .collect();
        for (up, down) in edges {
            if let Some(node) = nodes.get_mut(&up) {
                node.downstream.insert(down);
            }
        }

        let topo = asset_topo(&nodes)?;
        let group_topo = group_topo(&nodes, &by_id)?;
        check_partitions(&nodes, &topo)?;

        Ok(Self {
            nodes,
            groups: by_id,
            sources: source_map,
            topo,
            group_topo,
        })
    }

    pub fn node(&self, key: &AssetKey) -> Option<&AssetNode> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &AssetKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &AssetNode> {
        self.nodes.values()
    }

    /// Keys produced by some group (everything except sources).
    pub fn materializable_keys(&self) -> BTreeSet<AssetKey> {
        self.nodes
            .values()
            .filter(|n| !n.is_source())
            .map(|n| n.key.clone())
            .collect()
    }

    pub fn is_source(&self, key: &AssetKey) -> bool {
        self.sources.contains_key(key)
    }

    pub fn source(&self, key: &AssetKey) -> Option<&SourceAsset> {
        self.sources.get(key)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceAsset> {
        self.sources.values()
    }

    pub fn group(&self, id: &GroupId) -> Option<&ExecutableGroup> {
        self.groups.get(id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &ExecutableGroup> {
        self.groups.values()
    }

    pub fn group_of(&self, key: &AssetKey) -> Option<&ExecutableGroup> {
        self.nodes
            .get(key)
            .and_then(|n| n.group.as_ref())
            .and_then(|id| self.groups.get(id))
    }

    /// Ancestors of `key` within `depth` edges (unbounded when `None`).
    /// `key` itself is not included.
    pub fn ancestors(&self, key: &AssetKey, depth: Option<u32>) -> BTreeSet<AssetKey> {
        self.walk(key, depth, |n| &n.upstream)
    }

    /// Descendants of `key` within `depth` edges (unbounded when `None`).
    /// `key` itself is not included.
    pub fn descendants(&self, key: &AssetKey, depth: Option<u32>) -> BTreeSet<AssetKey> {
        self.walk(key, depth, |n| &n.downstream)
    }

    fn walk<F>(&self, start: &AssetKey, depth: Option<u32>, next: F) -> BTreeSet<AssetKey>
    where
        F: Fn(&AssetNode) -> &BTreeSet<AssetKey>,
    {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([(start.clone(), 0u32)]);

        while let Some((key, d)) = queue.pop_front() {
            if depth.is_some_and(|max| d >= max) {
                continue;
            }
            let Some(node) = self.nodes.get(&key) else { continue };
            for n in next(node) {
                if self.nodes.contains_key(n) && *n != *start && seen.insert(n.clone()) {
                    queue.push_back((n.clone(), d + 1));
                }
            }
        }
        seen
    }

    /// Deterministic topological order of every node; ties by key order.
    pub fn topological_order(&self) -> &[AssetKey] {
        &self.topo
    }

    /// Topological order restricted to `subset`. Ordering constraints that run
    /// through nodes outside the subset are still respected.
    pub fn topological_order_of(&self, subset: &BTreeSet<AssetKey>) -> Vec<AssetKey> {
        self.topo.iter().filter(|k| subset.contains(k)).cloned().collect()
    }

    /// Deterministic topological order of groups; ties by group id.
    pub fn group_order(&self) -> &[GroupId] {
        &self.group_topo
    }
}

fn owner_label(node: &AssetNode) -> String {
    match &node.group {
        Some(id) => format!("group '{id}'"),
        None => "a source asset".into(),
    }
}

fn source_node(source: &SourceAsset) -> AssetNode {
    AssetNode {
        key: source.key.clone(),
        upstream: BTreeSet::new(),
        downstream: BTreeSet::new(),
        partitions: source.partitions.clone(),
        group: None,
        group_name: crate::defs::DEFAULT_GROUP_NAME.to_string(),
        metadata: source.metadata.clone(),
        io_manager_key: source.io_manager_key.clone(),
        input_managers: BTreeMap::new(),
    }
}

/// Kahn's algorithm with a sorted ready set.
fn kahn<T: Ord + Clone>(
    vertices: &BTreeSet<T>,
    preds: &BTreeMap<T, BTreeSet<T>>,
) -> (Vec<T>, BTreeSet<T>) {
    let mut indegree: BTreeMap<T, usize> = vertices
        .iter()
        .map(|v| (v.clone(), preds.get(v).map_or(0, |p| p.len())))
        .collect();
    let mut succs: BTreeMap<T, Vec<T>> = BTreeMap::new();
    for (v, ps) in preds {
        for p in ps {
            succs.entry(p.clone()).or_default().push(v.clone());
        }
    }

    let mut ready: BTreeSet<T> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(v, _)| v.clone())
        .collect();
    let mut order = Vec::with_capacity(vertices.len());

    while let Some(v) = ready.pop_first() {
        if let Some(next) = succs.get(&v) {
            for s in next {
                if let Some(d) = indegree.get_mut(s) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(s.clone());
                    }
                }
            }
        }
        order.push(v);
    }

    let stuck = indegree
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(v, _)| v)
        .collect();
    (order, stuck)
}

fn asset_topo(nodes: &BTreeMap<AssetKey, AssetNode>) -> Result<Vec<AssetKey>, GraphError> {
    let vertices: BTreeSet<AssetKey> = nodes.keys().cloned().collect();
    let preds: BTreeMap<AssetKey, BTreeSet<AssetKey>> = nodes
        .values()
        .map(|n| {
            let known = n.upstream.iter().filter(|u| nodes.contains_key(*u)).cloned().collect();
            (n.key.clone(), known)
        })
        .collect();

    let (order, stuck) = kahn(&vertices, &preds);
    if stuck.is_empty() {
        Ok(order)
    } else {
        Err(GraphError::Cycle { path: find_cycle(&stuck, &preds) })
    }
}

fn group_topo(
    nodes: &BTreeMap<AssetKey, AssetNode>,
    groups: &BTreeMap<GroupId, ExecutableGroup>,
) -> Result<Vec<GroupId>, GraphError> {
    let vertices: BTreeSet<GroupId> = groups.keys().cloned().collect();
    let mut preds: BTreeMap<GroupId, BTreeSet<GroupId>> = BTreeMap::new();
    for node in nodes.values() {
        let Some(gid) = &node.group else { continue };
        for up in &node.upstream {
            if let Some(up_gid) = nodes.get(up).and_then(|n| n.group.as_ref()) {
                if up_gid != gid {
                    preds.entry(gid.clone()).or_default().insert(up_gid.clone());
                }
            }
        }
    }

    let (order, stuck) = kahn(&vertices, &preds);
    if stuck.is_empty() {
        Ok(order)
    } else {
        let groups = find_cycle(&stuck, &preds).iter().map(|g| g.to_string()).collect();
        Err(GraphError::GroupCycle { groups })
    }
}

/// Walk predecessors inside `stuck` until a vertex repeats; return that loop.
fn find_cycle<T: Ord + Clone>(stuck: &BTreeSet<T>, preds: &BTreeMap<T, BTreeSet<T>>) -> Vec<T> {
    let Some(mut cur) = stuck.first().cloned() else { return Vec::new() };
    let mut path: Vec<T> = Vec::new();

    loop {
        if let Some(pos) = path.iter().position(|v| *v == cur) {
            let mut cycle: Vec<T> = path[pos..].to_vec();
            cycle.reverse();
            cycle.push(cycle[0].clone());
            return cycle;
        }
        path.push(cur.clone());
        // Every stuck vertex has at least one stuck predecessor.
        match preds
            .get(&cur)
            .and_then(|ps| ps.iter().find(|p| stuck.contains(*p)))
        {
            Some(p) => cur = p.clone(),
            None => return path,
        }
    }
}

/// Propagate partitions definitions downstream through unpartitioned nodes;
/// any node reached by more than one distinct definition is rejected.
fn check_partitions(
    nodes: &BTreeMap<AssetKey, AssetNode>,
    topo: &[AssetKey],
) -> Result<(), GraphError> {
    let mut reaching: BTreeMap<&AssetKey, Vec<&PartitionsDefinition>> = BTreeMap::new();

    for key in topo {
        let Some(node) = nodes.get(key) else { continue };
        if let Some(def) = &node.partitions {
            reaching.insert(key, vec![def]);
            continue;
        }

        let mut defs: Vec<&PartitionsDefinition> = Vec::new();
        for up in &node.upstream {
            for def in reaching.get(up).into_iter().flatten() {
                if !defs.contains(def) {
                    defs.push(def);
                }
            }
        }
        if defs.len() > 1 {
            let mut labels: Vec<String> = defs.iter().map(|d| d.to_string()).collect();
            labels.sort();
            return Err(GraphError::IncompatiblePartitions { key: key.clone(), defs: labels });
        }
        reaching.insert(key, defs);
    }
    Ok(())
}
