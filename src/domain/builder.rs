//! Static call-graph construction.
//!
//! Four algorithms share one resolver and differ in how a method call's
//! receiver is typed and which dispatch targets are admitted:
//!
//! - `static`: written-down types only, no dispatch.
//! - `cha`: unknown receivers reach every method of that name.
//! - `rta`: like `cha`, restricted to types instantiated in reachable code.
//! - `pointer`: `rta` plus flow-insensitive local points-to.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, info};

use crate::common::error::{AlgorithmError, BuildError};
use crate::domain::callgraph::{CallKind, RawCallGraph};
use crate::domain::entry_point::{EntryPointDetector, EntryPointKind};
use crate::domain::identity::FunctionIdentity;
use crate::domain::index::{
    starts_uppercase, Binding, CallSite, CallTarget, FunctionBody, Receiver, SymbolIndex, TypeHint,
};
use crate::infrastructure::project_loader::{ParsedUnit, ProjectLoader, SourceTree};

/// Crate roots that are never part of the analyzed package.
const STD_ROOTS: &[&str] = &["std", "core", "alloc"];

/// Types in scope without an import; their associated functions live in `std`.
const PRELUDE_TYPES: &[&str] = &[
    "String", "Vec", "Box", "Option", "Result", "Rc", "Arc", "HashMap", "HashSet", "BTreeMap", "BTreeSet",
    "VecDeque", "Mutex", "RwLock", "Cell", "RefCell",
];

const MAX_ALIAS_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Static,
    Cha,
    Rta,
    Pointer,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Static => "static",
            Algorithm::Cha => "cha",
            Algorithm::Rta => "rta",
            Algorithm::Pointer => "pointer",
        }
    }

    /// Reachability-based algorithms start from entry points.
    pub fn needs_entry_points(&self) -> bool {
        matches!(self, Algorithm::Rta | Algorithm::Pointer)
    }
}

impl FromStr for Algorithm {
    type Err = AlgorithmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "static" => Ok(Algorithm::Static),
            "cha" => Ok(Algorithm::Cha),
            "rta" => Ok(Algorithm::Rta),
            "pointer" => Ok(Algorithm::Pointer),
            other => Err(AlgorithmError::Unknown(other.to_string())),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub root: PathBuf,
    /// Files whose tests are roots; test files among them are loaded too.
    pub entries: Vec<PathBuf>,
    pub include_tests: bool,
    pub algorithm: Algorithm,
}

/// Load the crate at `request.root` and build its call graph.
pub fn build_call_graph(request: &BuildRequest) -> Result<RawCallGraph, BuildError> {
    let tree = ProjectLoader::load_package(&request.root)?;
    build_from_tree(&tree, request)
}

/// Build the call graph of an already loaded crate.
pub fn build_from_tree(tree: &SourceTree, request: &BuildRequest) -> Result<RawCallGraph, BuildError> {
    let units: Vec<&ParsedUnit> = tree
        .units
        .values()
        .filter(|unit| !unit.is_test_file || is_entry_file(&request.entries, &unit.path))
        .collect();
    let sources: Vec<(String, String, String)> = units
        .iter()
        .map(|unit| (unit.module_path.clone(), unit.path.display().to_string(), unit.source.clone()))
        .collect();

    let index = SymbolIndex::build(&sources, request.include_tests);
    info!(
        "Indexed {} function(s) in {} file(s) of `{}`",
        index.functions.len(),
        units.len(),
        tree.package
    );

    let detector = EntryPointDetector::new(request.include_tests);
    let mut roots = Vec::new();
    for unit in &units {
        for entry in detector.detect(unit) {
            let is_root = match entry.kind {
                EntryPointKind::Main | EntryPointKind::AsyncMain => true,
                EntryPointKind::Test => is_entry_file(&request.entries, &unit.path),
            };
            if is_root {
                roots.push(entry.identity);
            }
        }
    }
    roots.sort();
    roots.dedup();
    debug!("{} entry root(s): {:?}", roots.len(), roots);

    let graph = Construction::new(&index, &tree.package, request.algorithm).run(&roots)?;
    info!(
        "Built {} call graph: {} node(s), {} edge(s)",
        request.algorithm,
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(graph)
}

fn is_entry_file(entries: &[PathBuf], path: &Path) -> bool {
    let canonical = |p: &Path| fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    let target = canonical(path);
    entries.iter().any(|entry| canonical(entry) == target)
}

/// Types a receiver may have.
#[derive(Debug, Default)]
struct PointsTo {
    types: BTreeSet<String>,
    traits: BTreeSet<String>,
    /// Some binding could not be typed.
    open: bool,
}

impl PointsTo {
    fn add_hint(&mut self, hint: &TypeHint) {
        match hint {
            TypeHint::Concrete(t) => {
                self.types.insert(t.clone());
            }
            other => {
                self.traits.extend(other.traits().iter().cloned());
                self.open = true;
            }
        }
    }
}

/// Resolves call sites against the index.
struct Resolver<'a> {
    index: &'a SymbolIndex,
    package: &'a str,
    algorithm: Algorithm,
}

impl<'a> Resolver<'a> {
    fn resolve_path(&self, body: &FunctionBody, segments: &[String]) -> Option<FunctionIdentity> {
        let (first, rest) = segments.split_first()?;
        if first == "Self" {
            let owner = body.self_type.as_ref()?;
            let name = rest.last()?;
            return self.pick(self.index.methods_of(owner, name), &body.unit);
        }
        if segments.len() == 1 && body_binds(self.index, body, first) {
            return None;
        }
        let candidates = self.candidate_paths(&body.unit, segments);
        for path in &candidates {
            if let Some(found) = self.lookup(path) {
                return Some(found);
            }
        }
        candidates.last().and_then(|path| self.external(path))
    }

    /// Absolute paths `segments` may denote from `unit`, most specific first.
    fn candidate_paths(&self, unit: &str, segments: &[String]) -> Vec<Vec<String>> {
        let unit_segments: Vec<String> = unit.split("::").map(str::to_string).collect();
        let mut path = segments.to_vec();
        if !matches!(path[0].as_str(), "crate" | "self" | "super") {
            if let Some(imported) = self.index.import(unit, &path[0]) {
                path = imported.into_iter().chain(segments[1..].iter().cloned()).collect();
            }
        }

        let explicit = match path[0].as_str() {
            "crate" => {
                path[0] = self.package.to_string();
                true
            }
            "self" => {
                path = unit_segments.iter().cloned().chain(path[1..].iter().cloned()).collect();
                true
            }
            "super" => {
                let ups = path.iter().take_while(|s| *s == "super").count();
                let keep = unit_segments.len().saturating_sub(ups);
                path = unit_segments[..keep].iter().cloned().chain(path[ups..].iter().cloned()).collect();
                true
            }
            first => first == self.package || STD_ROOTS.contains(&first),
        };

        if explicit {
            vec![path]
        } else {
            let relative = unit_segments.into_iter().chain(path.iter().cloned()).collect();
            vec![relative, path]
        }
    }

    /// A function or method of the analyzed crate at `path`.
    fn lookup(&self, path: &[String]) -> Option<FunctionIdentity> {
        let n = path.len();
        if n >= 2 && starts_uppercase(&path[n - 2]) {
            let prefix = path[..n - 2].join("::");
            self.pick(self.index.methods_of(&path[n - 2], &path[n - 1]), &prefix)
        } else {
            let ident = FunctionIdentity::free(path[..n - 1].join("::"), path[n - 1].clone());
            self.index.functions.contains_key(&ident).then_some(ident)
        }
    }

    /// Identity of a function outside the analyzed crate.
    fn external(&self, path: &[String]) -> Option<FunctionIdentity> {
        let n = path.len();
        if n < 2 || path[0] == self.package {
            return None;
        }
        let name = path[n - 1].clone();
        if starts_uppercase(&path[n - 2]) {
            let owner = &path[n - 2];
            let unit = if n > 2 {
                path[..n - 2].join("::")
            } else if PRELUDE_TYPES.contains(&owner.as_str()) {
                "std".to_string()
            } else {
                return None;
            };
            Some(FunctionIdentity::method(unit, owner.clone(), false, name))
        } else {
            Some(FunctionIdentity::free(path[..n - 1].join("::"), name))
        }
    }

    /// Deterministic choice among same-named methods, preferring `unit`.
    fn pick(&self, mut candidates: Vec<FunctionIdentity>, unit: &str) -> Option<FunctionIdentity> {
        candidates.sort();
        candidates
            .iter()
            .find(|c| c.defining_unit() == unit)
            .or_else(|| candidates.first())
            .cloned()
    }

    fn return_type(&self, body: &FunctionBody, segments: &[String]) -> Option<TypeHint> {
        let callee = self.resolve_path(body, segments)?;
        self.index.signature(&callee).and_then(|sig| sig.return_type)
    }

    fn is_trait(&self, name: &str) -> bool {
        self.index.trait_impls.contains_key(name)
    }

    /// Only the pointer analysis follows aliases and call results.
    fn precise(&self) -> bool {
        self.algorithm == Algorithm::Pointer
    }

    fn receiver_points_to(&self, body: &FunctionBody, receiver: &Receiver) -> PointsTo {
        let mut out = PointsTo::default();
        match receiver {
            Receiver::SelfValue => match &body.self_type {
                Some(t) if self.is_trait(t) => {
                    out.traits.insert(t.clone());
                    out.open = true;
                }
                Some(t) => {
                    out.types.insert(t.clone());
                }
                None => out.open = true,
            },
            Receiver::SelfField(field) => {
                let hint = body
                    .self_type
                    .as_ref()
                    .and_then(|t| self.index.fields.get(&(t.clone(), field.clone())).map(|h| h.clone()));
                match hint {
                    Some(hint) => out.add_hint(&hint),
                    None => out.open = true,
                }
            }
            Receiver::Local(name) => self.local_points_to(body, name, 0, &mut out),
            Receiver::CallResult(segments) if self.precise() => match self.return_type(body, segments) {
                Some(hint) => out.add_hint(&hint),
                None => out.open = true,
            },
            Receiver::Constructed(t) => {
                out.types.insert(t.clone());
            }
            Receiver::CallResult(_) | Receiver::Unknown => out.open = true,
        }
        out
    }

    fn local_points_to(&self, body: &FunctionBody, name: &str, depth: usize, out: &mut PointsTo) {
        if depth > MAX_ALIAS_DEPTH {
            out.open = true;
            return;
        }
        let Some((scope, bindings)) = self.bindings(body, name) else {
            out.open = true;
            return;
        };
        for binding in &bindings {
            match binding {
                Binding::Declared(hint) => out.add_hint(hint),
                Binding::Constructed(t) => {
                    out.types.insert(t.clone());
                }
                Binding::Call(segments) if self.precise() => match self.return_type(&scope, segments) {
                    Some(hint) => out.add_hint(&hint),
                    None => out.open = true,
                },
                Binding::Alias(other) if self.precise() => self.local_points_to(&scope, other, depth + 1, out),
                _ => out.open = true,
            }
        }
    }

    /// Bindings of `name` in `body` or the closest enclosing function.
    fn bindings(&self, body: &FunctionBody, name: &str) -> Option<(FunctionBody, Vec<Binding>)> {
        if let Some(found) = body.locals.get(name) {
            return Some((body.clone(), found.clone()));
        }
        let parent = body.parent.as_ref()?;
        let parent_body = self.index.bodies.get(parent).map(|b| b.clone())?;
        self.bindings(&parent_body, name)
    }

    /// Methods of the admitted dispatch targets, restricted to `filter` when
    /// the receiver's traits are known.
    fn dispatch_filter(&self, traits: &BTreeSet<String>) -> Option<Vec<String>> {
        if traits.is_empty() {
            return None;
        }
        let list: Vec<String> = traits.iter().cloned().collect();
        let implementors = self.index.implementors(&list);
        (!implementors.is_empty()).then_some(implementors)
    }
}

fn body_binds(index: &SymbolIndex, body: &FunctionBody, name: &str) -> bool {
    if body.locals.contains_key(name) {
        return true;
    }
    match &body.parent {
        Some(parent) => index
            .bodies
            .get(parent)
            .is_some_and(|b| body_binds(index, &b, name)),
        None => false,
    }
}

/// A method call whose receiver type is left to dispatch.
#[derive(Debug, Clone)]
struct PendingDispatch {
    caller: usize,
    name: String,
    filter: Option<Vec<String>>,
    site: String,
}

impl PendingDispatch {
    fn admits(&self, type_name: &str) -> bool {
        self.filter.as_ref().map_or(true, |f| f.iter().any(|t| t == type_name))
    }
}

/// One construction run.
struct Construction<'a> {
    resolver: Resolver<'a>,
    graph: RawCallGraph,
    queue: VecDeque<FunctionIdentity>,
    visited: HashSet<FunctionIdentity>,
    instantiated: BTreeSet<String>,
    pending: Vec<PendingDispatch>,
}

impl<'a> Construction<'a> {
    fn new(index: &'a SymbolIndex, package: &'a str, algorithm: Algorithm) -> Self {
        Self {
            resolver: Resolver {
                index,
                package,
                algorithm,
            },
            graph: RawCallGraph::new(),
            queue: VecDeque::new(),
            visited: HashSet::new(),
            instantiated: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    fn algorithm(&self) -> Algorithm {
        self.resolver.algorithm
    }

    fn run(mut self, roots: &[FunctionIdentity]) -> Result<RawCallGraph, AlgorithmError> {
        if self.algorithm().needs_entry_points() {
            if roots.is_empty() {
                return Err(AlgorithmError::NoEntryPoints);
            }
            for root in roots {
                let idx = self.node(root);
                self.graph.add_edge(RawCallGraph::ROOT, idx, CallKind::Common, None);
                self.enqueue(root.clone());
            }
        } else {
            let mut all: Vec<FunctionIdentity> = self
                .resolver
                .index
                .bodies
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            all.sort();
            self.queue.extend(all);
        }

        while let Some(ident) = self.queue.pop_front() {
            let Some(body) = self.resolver.index.bodies.get(&ident).map(|b| b.clone()) else {
                continue;
            };
            self.process(&body);
        }
        Ok(self.graph)
    }

    fn node(&mut self, ident: &FunctionIdentity) -> usize {
        let is_public = match self.resolver.index.signature(ident) {
            Some(sig) => sig.is_public,
            None => !ident.is_closure(),
        };
        self.graph.node(ident, is_public)
    }

    /// Only reachability-based runs walk the queue lazily.
    fn enqueue(&mut self, ident: FunctionIdentity) {
        if self.algorithm().needs_entry_points() && self.visited.insert(ident.clone()) {
            self.queue.push_back(ident);
        }
    }

    fn process(&mut self, body: &FunctionBody) {
        let caller = self.node(&body.identity);
        for t in &body.instantiated {
            self.admit_type(t);
        }
        for site in &body.calls {
            self.process_site(caller, body, site);
        }
    }

    fn process_site(&mut self, caller: usize, body: &FunctionBody, site: &CallSite) {
        let location = format!("{}:{}", body.file, site.line);
        match &site.target {
            CallTarget::Closure(closure) => {
                self.link(caller, closure, site.kind, &location);
            }
            CallTarget::Path(segments) => {
                if let Some(callee) = self.resolver.resolve_path(body, segments) {
                    self.link(caller, &callee, CallKind::Common, &location);
                }
            }
            CallTarget::Method { receiver, name } => {
                let points_to = self.resolver.receiver_points_to(body, receiver);
                for t in &points_to.types {
                    for callee in sorted(self.resolver.index.methods_of(t, name)) {
                        self.link(caller, &callee, CallKind::Common, &location);
                    }
                }
                let unresolved = points_to.open || points_to.types.is_empty();
                if unresolved && self.algorithm() != Algorithm::Static {
                    let pending = PendingDispatch {
                        caller,
                        name: name.clone(),
                        filter: self.resolver.dispatch_filter(&points_to.traits),
                        site: location,
                    };
                    self.dispatch(pending);
                }
            }
        }
    }

    fn link(&mut self, caller: usize, callee: &FunctionIdentity, kind: CallKind, site: &str) {
        let idx = self.node(callee);
        self.graph.add_edge(caller, idx, kind, Some(site.to_string()));
        if self.algorithm().needs_entry_points() {
            let returned = self
                .resolver
                .index
                .signature(callee)
                .and_then(|sig| sig.return_type)
                .and_then(|hint| hint.concrete().map(str::to_string));
            if let Some(t) = returned {
                self.admit_type(&t);
            }
        }
        self.enqueue(callee.clone());
    }

    fn dispatch(&mut self, pending: PendingDispatch) {
        match self.algorithm() {
            Algorithm::Cha => {
                let candidates = sorted(self.resolver.index.find_methods_by_name(&pending.name));
                for callee in candidates {
                    if callee.owner_type().is_some_and(|owner| pending.admits(owner)) {
                        self.link(pending.caller, &callee, CallKind::Dynamic, &pending.site);
                    }
                }
            }
            Algorithm::Rta | Algorithm::Pointer => {
                let types: Vec<String> = self.instantiated.iter().cloned().collect();
                for t in &types {
                    self.connect(&pending, t);
                }
                self.pending.push(pending);
            }
            Algorithm::Static => {}
        }
    }

    /// Record `t` as instantiated and connect every waiting dispatch site
    /// it can serve.
    fn admit_type(&mut self, t: &str) {
        if !self.algorithm().needs_entry_points() || !self.instantiated.insert(t.to_string()) {
            return;
        }
        debug!("instantiated {}", t);
        let waiting = self.pending.clone();
        for pending in &waiting {
            self.connect(pending, t);
        }
    }

    fn connect(&mut self, pending: &PendingDispatch, t: &str) {
        if !pending.admits(t) && !self.implements_admitted_trait(pending, t) {
            return;
        }
        for callee in sorted(self.resolver.index.methods_of(t, &pending.name)) {
            self.link(pending.caller, &callee, CallKind::Dynamic, &pending.site);
        }
    }

    /// Trait-restricted dispatch admits default methods through any
    /// implementor.
    fn implements_admitted_trait(&self, pending: &PendingDispatch, t: &str) -> bool {
        let Some(filter) = &pending.filter else {
            return false;
        };
        self.resolver
            .index
            .type_traits
            .get(t)
            .is_some_and(|traits| traits.iter().any(|tr| filter.contains(tr)))
    }
}

fn sorted(mut v: Vec<FunctionIdentity>) -> Vec<FunctionIdentity> {
    v.sort();
    v.dedup();
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    const LIB: &str = r#"
pub mod shapes;

pub trait Shape {
    fn area(&self) -> u32;
}

pub fn total(shapes: &[Box<dyn Shape>]) -> u32 {
    let mut sum = 0;
    for s in shapes {
        sum += s.area();
    }
    sum
}
"#;

    const SHAPES: &str = r#"
use crate::Shape;

pub struct Square(pub u32);
pub struct Circle(pub u32);

impl Square {
    pub fn new(side: u32) -> Self {
        Square(side)
    }
}

impl Shape for Square {
    fn area(&self) -> u32 {
        helper(self.0)
    }
}

impl Shape for Circle {
    fn area(&self) -> u32 {
        self.0 * 3
    }
}

fn helper(x: u32) -> u32 {
    x * x
}
"#;

    const MAIN: &str = r#"
use demo::shapes::Square;
use demo::Shape;

fn main() {
    let sq = Square::new(2);
    let alias = &sq;
    let n = alias.area();
    let all: Vec<Box<dyn demo::Shape>> = vec![Box::new(sq)];
    demo::total(&all);
    std::thread::spawn(move || n + 1);
}
"#;

    fn fixture() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        ProjectLoader::create_file(&root.join("Cargo.toml"), b"[package]\nname = \"demo\"\n").unwrap();
        ProjectLoader::create_file(&root.join("src/lib.rs"), LIB.as_bytes()).unwrap();
        ProjectLoader::create_file(&root.join("src/shapes.rs"), SHAPES.as_bytes()).unwrap();
        ProjectLoader::create_file(&root.join("src/main.rs"), MAIN.as_bytes()).unwrap();
        dir
    }

    fn edges(dir: &TempDir, algorithm: Algorithm) -> BTreeSet<(String, String, CallKind)> {
        let graph = build_call_graph(&BuildRequest {
            root: dir.path().to_path_buf(),
            entries: Vec::new(),
            include_tests: false,
            algorithm,
        })
        .unwrap();
        graph
            .edges
            .iter()
            .map(|e| (graph.nodes[e.caller].label(), graph.nodes[e.callee].label(), e.kind))
            .collect()
    }

    fn has(edges: &BTreeSet<(String, String, CallKind)>, caller: &str, callee: &str) -> bool {
        edges.iter().any(|(a, b, _)| a == caller && b == callee)
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("cha".parse::<Algorithm>(), Ok(Algorithm::Cha));
        assert_eq!(
            "vta".parse::<Algorithm>(),
            Err(AlgorithmError::Unknown("vta".to_string()))
        );
    }

    #[test]
    fn test_static_resolves_written_paths_only() {
        let dir = fixture();
        let e = edges(&dir, Algorithm::Static);
        assert!(has(&e, "demo::main", "(demo::shapes::Square)::new"));
        assert!(has(&e, "demo::main", "demo::total"));
        assert!(has(&e, "(&demo::shapes::Square)::area", "demo::shapes::helper"));
        // `s` is typed only by the loop, `alias` only through an alias
        assert!(!has(&e, "demo::total", "(&demo::shapes::Circle)::area"));
        assert!(!has(&e, "demo::main", "(&demo::shapes::Square)::area"));
        assert!(e.contains(&("demo::main".into(), "demo::main$1".into(), CallKind::Spawn)));
        assert!(has(&e, "demo::main", "std::thread::spawn"));
    }

    #[test]
    fn test_cha_is_superset_of_static() {
        let dir = fixture();
        let stat = edges(&dir, Algorithm::Static);
        let cha = edges(&dir, Algorithm::Cha);
        for (a, b, _) in &stat {
            assert!(has(&cha, a, b), "missing {a} -> {b}");
        }
        assert!(cha.contains(&(
            "demo::total".into(),
            "(&demo::shapes::Circle)::area".into(),
            CallKind::Dynamic
        )));
        assert!(has(&cha, "demo::total", "(&demo::shapes::Square)::area"));
    }

    #[test]
    fn test_rta_admits_instantiated_types_only() {
        let dir = fixture();
        let rta = edges(&dir, Algorithm::Rta);
        assert!(has(&rta, "<root>", "demo::main"));
        assert!(has(&rta, "demo::total", "(&demo::shapes::Square)::area"));
        assert!(!has(&rta, "demo::total", "(&demo::shapes::Circle)::area"));
    }

    #[test]
    fn test_pointer_follows_aliases_and_constructors() {
        let dir = fixture();
        let pta = edges(&dir, Algorithm::Pointer);
        assert!(pta.contains(&(
            "demo::main".into(),
            "(&demo::shapes::Square)::area".into(),
            CallKind::Common
        )));
        assert!(!has(&pta, "demo::total", "(&demo::shapes::Circle)::area"));
    }

    #[test]
    fn test_reachability_needs_entry_points() {
        let dir = fixture();
        std::fs::remove_file(dir.path().join("src/main.rs")).unwrap();
        for algorithm in [Algorithm::Rta, Algorithm::Pointer] {
            let err = build_call_graph(&BuildRequest {
                root: dir.path().to_path_buf(),
                entries: Vec::new(),
                include_tests: false,
                algorithm,
            })
            .unwrap_err();
            assert!(matches!(err, BuildError::Algorithm(AlgorithmError::NoEntryPoints)));
        }
        assert!(edges(&dir, Algorithm::Static).len() > 0);
    }

    #[test]
    fn test_parse_errors_are_load_errors() {
        let dir = fixture();
        ProjectLoader::create_file(&dir.path().join("src/broken.rs"), b"fn (").unwrap();
        let err = build_call_graph(&BuildRequest {
            root: dir.path().to_path_buf(),
            entries: Vec::new(),
            include_tests: false,
            algorithm: Algorithm::Static,
        })
        .unwrap_err();
        assert!(matches!(err, BuildError::Load(_)));
    }
}
