//! Differ: structural differences between a baseline and a mutated call
//! graph, rebased onto the filesystem root of the analyzed crate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::callgraph::CallGraph;
use crate::domain::identity::FunctionIdentity;

/// A function located in a real source tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Func {
    /// `root/src/<module segments>` for the analyzed package's own modules:
    /// the module's directory, or its file without the `.rs` extension.
    pub location: PathBuf,
    pub identity: FunctionIdentity,
}

impl Func {
    pub fn new(identity: FunctionIdentity, package: &str, root: &Path) -> Self {
        Self {
            location: module_location(root, package, identity.defining_unit()),
            identity,
        }
    }

    pub fn canonical(&self) -> String {
        self.identity.canonical()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub caller: Func,
    pub callee: Func,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Baseline.
    A,
    /// Mutated.
    B,
}

impl Side {
    pub fn other(self) -> Self {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Diff {
    /// The pair exists on both sides with different descriptions.
    DescriptionChanged { a: Node, b: Node },
    /// The pair exists on `side` only.
    OneSidedMissing { side: Side, node: Node },
}

impl Diff {
    /// The baseline node if there is one, else the mutated one.
    pub fn anchor(&self) -> &Node {
        match self {
            Diff::DescriptionChanged { a, .. } => a,
            Diff::OneSidedMissing { node, .. } => node,
        }
    }

    pub fn caller(&self) -> String {
        self.anchor().caller.canonical()
    }

    pub fn callee(&self) -> String {
        self.anchor().callee.canonical()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Diff::DescriptionChanged { .. } => "description_changed",
            Diff::OneSidedMissing { .. } => "one_sided_missing",
        }
    }

    /// `caller|callee|kind`, followed by what tells two discrepancies on the
    /// same pair apart.
    pub fn key(&self) -> String {
        let node = self.anchor();
        let detail = match self {
            Diff::DescriptionChanged { a, b } => format!("{}|{}", a.description, b.description),
            Diff::OneSidedMissing { side, node } => format!("{:?}|{}", side, node.description),
        };
        format!(
            "{}|{}|{}|{}",
            node.caller.canonical(),
            node.callee.canonical(),
            self.kind(),
            detail
        )
    }

    /// The same discrepancy seen from the other side.
    pub fn swapped(&self) -> Self {
        match self {
            Diff::DescriptionChanged { a, b } => Diff::DescriptionChanged {
                a: b.clone(),
                b: a.clone(),
            },
            Diff::OneSidedMissing { side, node } => Diff::OneSidedMissing {
                side: side.other(),
                node: node.clone(),
            },
        }
    }
}

/// Filesystem location of a module: the package token (or `crate`) is
/// replaced by `root/src`, the remaining segments become directories.
/// `pkg::net` is `root/src/net`, next to `net.rs` or naming `net/`.
pub fn module_location(root: &Path, package: &str, unit: &str) -> PathBuf {
    let mut segments = unit.split("::").filter(|s| !s.is_empty());
    match segments.next() {
        Some(first) if first == package || first == "crate" => {
            let mut location = root.join("src");
            location.extend(segments);
            location
        }
        Some(first) => {
            let mut location = PathBuf::from(first);
            location.extend(segments);
            location
        }
        None => PathBuf::new(),
    }
}

fn identity_of(raw: &str) -> FunctionIdentity {
    FunctionIdentity::parse(raw).unwrap_or_else(|_| FunctionIdentity::free("", raw.trim()))
}

fn node(caller: &str, callee: &str, description: &str, package: &str, root: &Path) -> Node {
    Node {
        caller: Func::new(identity_of(caller), package, root),
        callee: Func::new(identity_of(callee), package, root),
        description: description.to_string(),
    }
}

/// Every (caller, callee) discrepancy between `a` (baseline) and `b`
/// (mutated), deduplicated and grouped by caller.
pub fn compare(a: &CallGraph, b: &CallGraph, package: &str, root: &Path) -> Vec<Diff> {
    let mut diffs = Vec::new();
    for (caller, callee, desc_a) in a.iter() {
        match b.description(caller, callee) {
            None => diffs.push(Diff::OneSidedMissing {
                side: Side::A,
                node: node(caller, callee, desc_a, package, root),
            }),
            Some(desc_b) if desc_b != desc_a => diffs.push(Diff::DescriptionChanged {
                a: node(caller, callee, desc_a, package, root),
                b: node(caller, callee, desc_b, package, root),
            }),
            Some(_) => {}
        }
    }
    for (caller, callee, desc_b) in b.iter() {
        if a.description(caller, callee).is_none() {
            diffs.push(Diff::OneSidedMissing {
                side: Side::B,
                node: node(caller, callee, desc_b, package, root),
            });
        }
    }
    dedup_diff(diffs)
}

/// Drop repeated keys (first occurrence wins), then gather each caller's
/// diffs together, callers in order of first appearance.
pub fn dedup_diff(diffs: Vec<Diff>) -> Vec<Diff> {
    let mut seen = HashSet::new();
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Diff>> = HashMap::new();
    for diff in diffs {
        if !seen.insert(diff.key()) {
            continue;
        }
        let caller = diff.caller();
        if !groups.contains_key(&caller) {
            order.push(caller.clone());
        }
        groups.entry(caller).or_default().push(diff);
    }
    order
        .into_iter()
        .flat_map(|caller| groups.remove(&caller).unwrap_or_default())
        .collect()
}

pub fn group_by_caller(diffs: &[Diff]) -> BTreeMap<String, Vec<Diff>> {
    let mut groups: BTreeMap<String, Vec<Diff>> = BTreeMap::new();
    for diff in diffs {
        groups.entry(diff.caller()).or_default().push(diff.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(diffs: &[Diff]) -> Vec<String> {
        diffs.iter().map(Diff::key).collect()
    }

    #[test]
    fn test_one_sided_missing_anchored_at_baseline() {
        let a = CallGraph::from([("demo::a", "demo::b", "common call")]);
        let diffs = compare(&a, &CallGraph::new(), "demo", Path::new("/src/demo"));
        assert_eq!(diffs.len(), 1);
        let Diff::OneSidedMissing { side, node } = &diffs[0] else {
            panic!("expected one-sided diff");
        };
        assert_eq!(*side, Side::A);
        assert_eq!(node.caller.canonical(), "demo::a");
        assert_eq!(node.caller.location, PathBuf::from("/src/demo/src"));
    }

    #[test]
    fn test_description_changed_carries_both_nodes() {
        let a = CallGraph::from([("demo::a", "demo::b", "common call")]);
        let b = CallGraph::from([("demo::a", "demo::b", "dynamic call")]);
        let diffs = compare(&a, &b, "demo", Path::new("/r"));
        assert_eq!(diffs.len(), 1);
        match &diffs[0] {
            Diff::DescriptionChanged { a, b } => {
                assert_eq!(a.description, "common call");
                assert_eq!(b.description, "dynamic call");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_compare_symmetric_in_coverage() {
        let a = CallGraph::from([
            ("demo::a", "demo::b", "common call"),
            ("demo::a", "demo::c", "common call"),
            ("demo::net::send", "demo::net::frame", "dynamic call"),
        ]);
        let b = CallGraph::from([
            ("demo::a", "demo::c", "dynamic call"),
            ("demo::net::send", "demo::net::frame", "dynamic call"),
            ("demo::d", "demo::a", "spawn call"),
        ]);
        let root = Path::new("/r");
        let mut ab: Vec<String> = compare(&a, &b, "demo", root).iter().map(|d| d.swapped().key()).collect();
        let mut ba = keys(&compare(&b, &a, "demo", root));
        ab.sort();
        ba.sort();
        assert_eq!(ab, ba);
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn test_dedup_idempotent_and_grouped() {
        let a = CallGraph::from([("demo::x", "demo::y", "common call"), ("demo::z", "demo::y", "common call")]);
        let b = CallGraph::from([("demo::x", "demo::w", "common call")]);
        let root = Path::new("/r");
        let once = compare(&a, &b, "demo", root);
        let mut doubled = once.clone();
        doubled.extend(once.clone());
        let deduped = dedup_diff(doubled);
        assert_eq!(keys(&deduped), keys(&once));
        assert_eq!(dedup_diff(deduped.clone()), deduped);

        let callers: Vec<String> = deduped.iter().map(Diff::caller).collect();
        assert_eq!(callers, vec!["demo::x", "demo::x", "demo::z"]);
        let groups = group_by_caller(&deduped);
        assert_eq!(groups["demo::x"].len(), 2);
    }

    #[test]
    fn test_module_location() {
        let root = Path::new("/work/demo");
        assert_eq!(module_location(root, "demo", "demo::net::tcp"), PathBuf::from("/work/demo/src/net/tcp"));
        assert_eq!(module_location(root, "demo", "crate::net"), PathBuf::from("/work/demo/src/net"));
        assert_eq!(module_location(root, "demo", "demo"), PathBuf::from("/work/demo/src"));
        assert_eq!(module_location(root, "demo", "std::io"), PathBuf::from("std/io"));
    }

    #[test]
    fn test_method_identities_keep_owner() {
        let a = CallGraph::from([("(&demo::net::Client)::send", "demo::net::frame", "common call")]);
        let diffs = compare(&a, &CallGraph::new(), "demo", Path::new("/r"));
        let caller = &diffs[0].anchor().caller;
        assert_eq!(caller.identity.owner_type(), Some("Client"));
        assert_eq!(caller.location, PathBuf::from("/r/src/net"));
    }
}
