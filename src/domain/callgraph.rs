// Call graph structures for difftrace.
// `RawCallGraph` is what the builder produces; `CallGraph` is the normalized
// caller -> callee -> description map every later stage works on.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::identity::{normalize, FunctionIdentity};

/// Label attached to an edge, describing how the call happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CallKind {
    /// Callee known at the call site.
    Common,
    /// Callee chosen by dispatch (trait objects, generic or unknown receivers).
    Dynamic,
    /// Closure handed to a thread/task spawn.
    Spawn,
}

impl CallKind {
    pub fn description(&self) -> &'static str {
        match self {
            CallKind::Common => "common call",
            CallKind::Dynamic => "dynamic call",
            CallKind::Spawn => "spawn call",
        }
    }
}

/// One rendered edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub caller: String,
    pub callee: String,
    pub description: String,
}

/// Call chain reported by a probe: callee -> immediate caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallChain {
    pub data: BTreeMap<String, String>,
}

impl CallChain {
    /// Build a chain from a stack listed outermost first.
    pub fn from_stack<S: AsRef<str>>(frames: &[S]) -> Self {
        let data = frames
            .windows(2)
            .map(|pair| (pair[1].as_ref().to_string(), pair[0].as_ref().to_string()))
            .collect();
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Normalized call graph: caller -> (callee -> description).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallGraph {
    edges: BTreeMap<String, BTreeMap<String, String>>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge; the first description seen for a pair wins.
    /// Returns whether the pair was new.
    pub fn insert(&mut self, caller: &str, callee: &str, description: &str) -> bool {
        let callees = self.edges.entry(caller.to_string()).or_default();
        if callees.contains_key(callee) {
            return false;
        }
        callees.insert(callee.to_string(), description.to_string());
        true
    }

    pub fn description(&self, caller: &str, callee: &str) -> Option<&str> {
        self.edges
            .get(caller)
            .and_then(|m| m.get(callee))
            .map(String::as_str)
    }

    pub fn callees(&self, caller: &str) -> Option<&BTreeMap<String, String>> {
        self.edges.get(caller)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.edges.iter().flat_map(|(caller, callees)| {
            callees
                .iter()
                .map(move |(callee, desc)| (caller.as_str(), callee.as_str(), desc.as_str()))
        })
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count() == 0
    }

    /// Fold `other` in; descriptions already present are kept.
    pub fn merge(&mut self, other: &CallGraph) -> usize {
        let mut added = 0;
        for (caller, callee, desc) in other.iter() {
            if self.insert(caller, callee, desc) {
                added += 1;
            }
        }
        added
    }

    /// Fold a dynamically observed chain in, normalizing both ends.
    pub fn add_chain(&mut self, chain: &CallChain) -> usize {
        let mut added = 0;
        for (callee, caller) in &chain.data {
            let caller = normalize(caller);
            let callee = normalize(callee);
            if self.insert(&caller, &callee, CallKind::Common.description()) {
                added += 1;
            }
        }
        added
    }

    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a Edge>) -> Self {
        let mut graph = Self::new();
        for edge in edges {
            graph.insert(&edge.caller, &edge.callee, &edge.description);
        }
        graph
    }
}

impl<const N: usize> From<[(&str, &str, &str); N]> for CallGraph {
    fn from(edges: [(&str, &str, &str); N]) -> Self {
        let mut graph = Self::new();
        for (caller, callee, desc) in edges {
            graph.insert(caller, callee, desc);
        }
        graph
    }
}

/// A node of the builder's graph. `identity == None` marks the synthetic
/// root that RTA and pointer analysis hang their entry points from.
#[derive(Debug, Clone)]
pub struct RawNode {
    pub identity: Option<FunctionIdentity>,
    pub is_public: bool,
}

impl RawNode {
    pub fn label(&self) -> String {
        match &self.identity {
            Some(ident) => ident.canonical(),
            None => "<root>".to_string(),
        }
    }

    /// Compiler-generated or unresolvable: the root, or a function with no
    /// defining unit.
    pub fn is_synthetic(&self) -> bool {
        match &self.identity {
            Some(ident) => ident.defining_unit().is_empty(),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawEdge {
    pub caller: usize,
    pub callee: usize,
    pub kind: CallKind,
    /// `file:line` of the call site.
    pub site: Option<String>,
}

/// Builder output, before filtering.
#[derive(Debug, Clone)]
pub struct RawCallGraph {
    pub nodes: Vec<RawNode>,
    pub edges: Vec<RawEdge>,
    lookup: HashMap<FunctionIdentity, usize>,
    seen: HashMap<(usize, usize), usize>,
}

impl Default for RawCallGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl RawCallGraph {
    pub const ROOT: usize = 0;

    pub fn new() -> Self {
        Self {
            nodes: vec![RawNode {
                identity: None,
                is_public: true,
            }],
            edges: Vec::new(),
            lookup: HashMap::new(),
            seen: HashMap::new(),
        }
    }

    pub fn node(&mut self, ident: &FunctionIdentity, is_public: bool) -> usize {
        if let Some(&idx) = self.lookup.get(ident) {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(RawNode {
            identity: Some(ident.clone()),
            is_public,
        });
        self.lookup.insert(ident.clone(), idx);
        idx
    }

    /// Add an edge unless the pair already has one (first kind wins).
    pub fn add_edge(&mut self, caller: usize, callee: usize, kind: CallKind, site: Option<String>) -> bool {
        if self.seen.contains_key(&(caller, callee)) {
            return false;
        }
        self.seen.insert((caller, callee), self.edges.len());
        self.edges.push(RawEdge {
            caller,
            callee,
            kind,
            site,
        });
        true
    }

    pub fn edge_between(&self, caller: usize, callee: usize) -> Option<&RawEdge> {
        self.seen.get(&(caller, callee)).map(|&i| &self.edges[i])
    }

    /// Incoming and outgoing edge indices per node.
    pub fn adjacency(&self) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut incoming = vec![Vec::new(); self.nodes.len()];
        let mut outgoing = vec![Vec::new(); self.nodes.len()];
        for (i, edge) in self.edges.iter().enumerate() {
            outgoing[edge.caller].push(i);
            incoming[edge.callee].push(i);
        }
        (incoming, outgoing)
    }
}
