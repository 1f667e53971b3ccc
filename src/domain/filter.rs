//! Graph filter/renderer: turns a raw call graph into the normalized edge
//! set the differ works on.

use std::convert::Infallible;

use dashmap::DashMap;
use tracing::debug;

use crate::common::config::RenderConfig;
use crate::common::error::FilterConfigError;
use crate::domain::callgraph::{CallGraph, Edge, RawCallGraph, RawNode};
use crate::infrastructure::concurrency::{Task, TaskGroup};

/// Units never rendered with `nostd`.
const STD_UNITS: &[&str] = &["std", "core", "alloc", "proc_macro", "test"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupBy {
    Pkg,
    Type,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOpts {
    /// Units to focus on; empty means every module of the package.
    pub focus: Vec<String>,
    pub group: Vec<GroupBy>,
    pub limit: Vec<String>,
    pub ignore: Vec<String>,
    pub include: Vec<String>,
    pub nostd: bool,
    pub nointer: bool,
}

impl RenderOpts {
    /// Parse the comma-separated lists of a render config.
    pub fn parse(config: &RenderConfig) -> Result<Self, FilterConfigError> {
        let mut group = Vec::new();
        for token in split_list(&config.group) {
            match token.as_str() {
                "pkg" => group.push(GroupBy::Pkg),
                "type" => group.push(GroupBy::Type),
                _ => return Err(FilterConfigError::InvalidGroup(token)),
            }
        }
        Ok(Self {
            focus: split_list(&config.focus),
            group,
            limit: split_list(&config.limit),
            ignore: split_list(&config.ignore),
            include: split_list(&config.include),
            nostd: config.nostd,
            nointer: config.nointer,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn unit_of(node: &RawNode) -> &str {
    node.identity
        .as_ref()
        .map(|ident| ident.defining_unit())
        .unwrap_or_default()
}

fn has_prefix(unit: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| unit.starts_with(p.as_str()))
}

fn in_std(unit: &str) -> bool {
    let root = unit.split("::").next().unwrap_or_default();
    STD_UNITS.contains(&root)
}

/// Per-render view of a raw graph.
struct EdgeFilter<'a> {
    graph: &'a RawCallGraph,
    incoming: Vec<Vec<usize>>,
    outgoing: Vec<Vec<usize>>,
    opts: &'a RenderOpts,
}

impl<'a> EdgeFilter<'a> {
    fn new(graph: &'a RawCallGraph, opts: &'a RenderOpts) -> Self {
        let (incoming, outgoing) = graph.adjacency();
        Self {
            graph,
            incoming,
            outgoing,
            opts,
        }
    }

    fn is_synthetic(&self, edge: usize) -> bool {
        let edge = &self.graph.edges[edge];
        self.graph.nodes[edge.caller].is_synthetic() || self.graph.nodes[edge.callee].is_synthetic()
    }

    /// The edge touches `focus`, or its caller is called from `focus` and
    /// its callee calls into `focus`.
    fn is_focused(&self, edge: usize, focus: &str) -> bool {
        let e = &self.graph.edges[edge];
        if unit_of(&self.graph.nodes[e.caller]) == focus || unit_of(&self.graph.nodes[e.callee]) == focus {
            return true;
        }
        let from_focused = self.incoming[e.caller].iter().any(|&i| {
            !self.is_synthetic(i) && unit_of(&self.graph.nodes[self.graph.edges[i].caller]) == focus
        });
        let to_focused = self.outgoing[e.callee].iter().any(|&i| {
            !self.is_synthetic(i) && unit_of(&self.graph.nodes[self.graph.edges[i].callee]) == focus
        });
        if from_focused && to_focused {
            debug!(
                "edge semi-focus: {} -> {}",
                self.graph.nodes[e.caller].label(),
                self.graph.nodes[e.callee].label()
            );
            return true;
        }
        false
    }

    fn keep(&self, edge: usize, focus: &str) -> bool {
        if self.is_synthetic(edge) || !self.is_focused(edge, focus) {
            return false;
        }
        let e = &self.graph.edges[edge];
        let caller = &self.graph.nodes[e.caller];
        let callee = &self.graph.nodes[e.callee];
        let (caller_unit, callee_unit) = (unit_of(caller), unit_of(callee));

        if self.opts.nostd && (in_std(caller_unit) || in_std(callee_unit)) {
            return false;
        }
        if self.opts.nointer && !callee.is_public {
            return false;
        }
        if !self.opts.include.is_empty()
            && (has_prefix(caller_unit, &self.opts.include) || has_prefix(callee_unit, &self.opts.include))
        {
            debug!("include: {} -> {}", caller.label(), callee.label());
            return true;
        }
        if !self.opts.limit.is_empty()
            && (!has_prefix(caller_unit, &self.opts.limit) || !has_prefix(callee_unit, &self.opts.limit))
        {
            debug!("NOT in limit: {} -> {}", caller.label(), callee.label());
            return false;
        }
        if !self.opts.ignore.is_empty()
            && (has_prefix(caller_unit, &self.opts.ignore) || has_prefix(callee_unit, &self.opts.ignore))
        {
            debug!("IS ignored: {} -> {}", caller.label(), callee.label());
            return false;
        }
        true
    }
}

/// Every module of `package` that defines a node of the graph.
fn package_units(graph: &RawCallGraph, package: &str) -> Vec<String> {
    let mut units: Vec<String> = graph
        .nodes
        .iter()
        .map(unit_of)
        .filter(|unit| unit.split("::").next() == Some(package))
        .map(str::to_string)
        .collect();
    units.sort();
    units.dedup();
    units
}

/// Filter `graph` per focus unit, the units split into one batch per worker
/// of `tasks`. Edges come back deduplicated on (caller, callee,
/// description), in the order the builder produced them.
pub fn render(graph: &RawCallGraph, package: &str, opts: &RenderOpts, tasks: &TaskGroup) -> Vec<Edge> {
    let focus = if opts.focus.is_empty() {
        package_units(graph, package)
    } else {
        opts.focus.clone()
    };
    debug!("{} limit prefixes: {:?}", opts.limit.len(), opts.limit);
    debug!("{} ignore prefixes: {:?}", opts.ignore.len(), opts.ignore);
    debug!("{} include prefixes: {:?}", opts.include.len(), opts.include);
    debug!("no std packages: {}", opts.nostd);

    let filter = EdgeFilter::new(graph, opts);
    let sink: DashMap<(String, String, String), usize> = DashMap::new();
    let batch_size = focus.len().div_ceil(tasks.width()).max(1);
    debug!(
        "Rendering {} unit(s) in batches of {} over {} worker(s)",
        focus.len(),
        batch_size,
        tasks.width()
    );

    let batches: Vec<Task<'_, (), Infallible>> = focus
        .chunks(batch_size)
        .map(|batch| {
            let filter = &filter;
            let sink = &sink;
            Box::new(move || {
                for unit in batch {
                    for (i, edge) in graph.edges.iter().enumerate() {
                        if !filter.keep(i, unit) {
                            continue;
                        }
                        let key = (
                            graph.nodes[edge.caller].label(),
                            graph.nodes[edge.callee].label(),
                            edge.kind.description().to_string(),
                        );
                        sink.entry(key).or_insert(i);
                    }
                }
                Ok(())
            }) as Task<'_, (), Infallible>
        })
        .collect();
    let _ = tasks.run_batch(batches);

    let mut kept: Vec<(usize, Edge)> = sink
        .into_iter()
        .map(|((caller, callee, description), i)| {
            (
                i,
                Edge {
                    caller,
                    callee,
                    description,
                },
            )
        })
        .collect();
    kept.sort();
    debug!("Rendered {} call edge(s)", kept.len());
    kept.into_iter().map(|(_, edge)| edge).collect()
}

/// Collapse rendered edges to one description per (caller, callee), the
/// first in sorted order.
pub fn to_call_graph(edges: &[Edge]) -> CallGraph {
    let mut sorted = edges.to_vec();
    sorted.sort();
    CallGraph::from_edges(&sorted)
}
