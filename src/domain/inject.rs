//! Injection-point selector and mutator.
//!
//! For every caller implicated by a diff, finds the innermost blocks of its
//! body that directly call the implicated callee and puts the diagnostic
//! probe next to that call, once per (block, callee) per pass.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use proc_macro2::{LineColumn, Span};
use quote::quote;
use syn::visit::{self, Visit};
use syn::visit_mut::{self, VisitMut};
use syn::{
    parse_quote, Block, Expr, ExprBlock, ExprCall, ExprClosure, ExprIf, ExprMethodCall, ExprWhile, ImplItem,
    Item, ItemUse, LitStr, Macro, Stmt, TraitItem,
};
use tracing::{debug, info};

use crate::common::config::ProbeConfig;
use crate::domain::closures::{closure_start, direct_closure_starts, macro_exprs, macro_named};
use crate::domain::diff::{group_by_caller, module_location, Diff, Func};
use crate::domain::identity::FunctionIdentity;
use crate::domain::index::{collect_use, path_segments, starts_uppercase, type_name};
use crate::infrastructure::project_loader::{ParsedUnit, SourceTree};

/// A statement block: the `ordinal`-th block (pre-order) of `function`'s
/// body in `file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockId {
    pub file: PathBuf,
    pub function: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InjectionRecord {
    pub block: BlockId,
    pub callee: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    Inserted,
    /// The probe already sits next to the call.
    AlreadyInstrumented,
    /// No function in the file matches the diff's caller.
    NoMatchingCaller,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteOutcome {
    pub caller: String,
    pub callee: String,
    pub outcome: InjectionOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub sites: Vec<SiteOutcome>,
    pub import_added: bool,
}

impl FileOutcome {
    pub fn count(&self, outcome: InjectionOutcome) -> usize {
        self.sites.iter().filter(|s| s.outcome == outcome).count()
    }

    pub fn inserted(&self) -> usize {
        self.count(InjectionOutcome::Inserted)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InstrumentReport {
    pub files: Vec<FileOutcome>,
}

impl InstrumentReport {
    pub fn inserted(&self) -> usize {
        self.files.iter().map(FileOutcome::inserted).sum()
    }

    pub fn count(&self, outcome: InjectionOutcome) -> usize {
        self.files.iter().map(|f| f.count(outcome)).sum()
    }
}

/// State of one instrumentation pass.
pub struct InjectionContext {
    root: PathBuf,
    package: String,
    probe: Stmt,
    probe_macro: String,
    probe_tokens: String,
    import: ItemUse,
    records: HashSet<InjectionRecord>,
}

impl InjectionContext {
    pub fn new(root: &Path, package: &str, config: &ProbeConfig) -> syn::Result<Self> {
        let path: syn::Path = syn::parse_str(&config.macro_name)?;
        let probe_macro = path_segments(&path).pop().unwrap_or_default();
        let message = LitStr::new(&config.message, Span::call_site());
        let probe: Stmt = parse_quote!(#path!(#message););
        let import: ItemUse = syn::parse_str(&format!("use {};", config.import))?;
        Ok(Self {
            root: root.to_path_buf(),
            package: package.to_string(),
            probe,
            probe_macro,
            probe_tokens: quote!(#message).to_string(),
            import,
            records: HashSet::new(),
        })
    }

    pub fn records(&self) -> &HashSet<InjectionRecord> {
        &self.records
    }

    fn is_probe(&self, stmt: &Stmt) -> bool {
        let mac = match stmt {
            Stmt::Macro(m) => &m.mac,
            Stmt::Expr(Expr::Macro(m), _) => &m.mac,
            _ => return false,
        };
        macro_named(mac, &self.probe_macro) && mac.tokens.to_string() == self.probe_tokens
    }

    /// Add the probe import unless every name it brings in is already
    /// imported at the top of the module.
    fn ensure_import(&self, items: &mut Vec<Item>) -> bool {
        let mut wanted = HashMap::new();
        collect_use(&self.import.tree, &mut Vec::new(), &mut wanted);
        let mut bound = HashMap::new();
        for item in items.iter() {
            if let Item::Use(u) = item {
                collect_use(&u.tree, &mut Vec::new(), &mut bound);
            }
        }
        if wanted.keys().all(|name| bound.contains_key(name)) {
            return false;
        }
        items.insert(0, Item::Use(self.import.clone()));
        true
    }

    /// Instrument one caller declared in the inline module `module` of the
    /// file (empty for the file itself). `None` when there is no such
    /// function.
    fn instrument_function(
        &mut self,
        file: &mut syn::File,
        module: &[String],
        path: &Path,
        caller: &FunctionIdentity,
        callees: &[FunctionIdentity],
    ) -> Option<Vec<SiteOutcome>> {
        let items = inline_items(&mut file.items, module)?;
        let block = find_body(items, &caller.base())?;
        let mut instrumenter = BodyInstrumenter::new(self, path, caller, callees);
        if caller.is_closure() {
            let mut locator = ClosureLocator {
                path: caller.closure_depth(),
                seen: 0,
                instrumenter: &mut instrumenter,
                found: false,
            };
            locator.visit_block_mut(block);
            if !locator.found {
                return None;
            }
        } else {
            instrumenter.run(block);
        }
        Some(instrumenter.sites)
    }
}

/// Items of the inline module reached through `module` from `items`.
fn inline_items<'f>(items: &'f mut Vec<Item>, module: &[String]) -> Option<&'f mut Vec<Item>> {
    let Some((first, rest)) = module.split_first() else {
        return Some(items);
    };
    let content = items.iter_mut().find_map(|item| match item {
        Item::Mod(m) if m.ident == first => m.content.as_mut().map(|(_, content)| content),
        _ => None,
    })?;
    inline_items(content, rest)
}

/// Whether `items` declare the inline module path `module`.
fn declares_inline(items: &[Item], module: &[String]) -> bool {
    let Some((first, rest)) = module.split_first() else {
        return true;
    };
    items.iter().any(|item| match item {
        Item::Mod(m) if m.ident == first => m
            .content
            .as_ref()
            .is_some_and(|(_, content)| declares_inline(content, rest)),
        _ => false,
    })
}

/// The inline module of `unit` that defines `caller`, as segments below the
/// file's own module. `None` when the caller lives in another file.
fn caller_module(ctx: &InjectionContext, unit: &ParsedUnit, caller: &Func) -> Option<Vec<String>> {
    let location = module_location(&ctx.root, &ctx.package, &unit.module_path);
    if caller.location == location {
        return Some(Vec::new());
    }
    let below = caller.location.strip_prefix(&location).ok()?;
    let module: Vec<String> = below
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    declares_inline(&unit.file.items, &module).then_some(module)
}

/// The body of a named function: free when the identity has no owner,
/// otherwise a method of an `impl` for the owner or a trait default method.
fn find_body<'f>(items: &'f mut [Item], ident: &FunctionIdentity) -> Option<&'f mut Block> {
    for item in items.iter_mut() {
        match (item, ident.owner_type()) {
            (Item::Fn(func), None) if func.sig.ident == ident.name() => return Some(&mut func.block),
            (Item::Impl(imp), Some(owner)) if type_name(&imp.self_ty).as_deref() == Some(owner) => {
                for impl_item in imp.items.iter_mut() {
                    if let ImplItem::Fn(method) = impl_item {
                        if method.sig.ident == ident.name() {
                            return Some(&mut method.block);
                        }
                    }
                }
            }
            (Item::Trait(tr), Some(owner)) if tr.ident == owner => {
                for trait_item in tr.items.iter_mut() {
                    if let TraitItem::Fn(method) = trait_item {
                        if method.sig.ident == ident.name() {
                            if let Some(block) = method.default.as_mut() {
                                return Some(block);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

/// How a call to the callee looks at its call site.
#[derive(Debug, Clone)]
enum CalleeMatch {
    /// `name(..)`, `module::name(..)`
    Free(String),
    /// `x.name(..)`, `Owner::name(..)`, `Self::name(..)`
    Owned { owner: String, name: String },
    /// The closure literal starting here.
    Closure(LineColumn),
}

impl CalleeMatch {
    fn for_callee(caller: &FunctionIdentity, callee: &FunctionIdentity, closures: &[LineColumn]) -> Option<Self> {
        if callee.is_closure() {
            let (last, parent) = callee.closure_depth().split_last()?;
            if callee.base() != caller.base() || parent != caller.closure_depth() {
                return None;
            }
            let index = (*last as usize).checked_sub(1)?;
            return closures.get(index).copied().map(CalleeMatch::Closure);
        }
        Some(match callee.owner_type() {
            Some(owner) => CalleeMatch::Owned {
                owner: owner.to_string(),
                name: callee.name().to_string(),
            },
            None => CalleeMatch::Free(callee.name().to_string()),
        })
    }

    fn matches_path(&self, path: &syn::Path) -> bool {
        let segments = path_segments(path);
        let Some((last, prefix)) = segments.split_last() else {
            return false;
        };
        match self {
            CalleeMatch::Free(name) => last == name && !prefix.last().is_some_and(|p| starts_uppercase(p)),
            CalleeMatch::Owned { owner, name } => {
                last == name && prefix.last().is_some_and(|p| p == owner || p == "Self")
            }
            CalleeMatch::Closure(_) => false,
        }
    }

    fn matches_method(&self, method: &syn::Ident) -> bool {
        matches!(self, CalleeMatch::Owned { name, .. } if method == name)
    }

    fn matches_closure(&self, closure: &ExprClosure) -> bool {
        matches!(self, CalleeMatch::Closure(start) if *start == closure_start(closure))
    }
}

/// Looks for a call to one callee outside nested blocks, closures and
/// `if`/`while` conditions.
struct DirectCallFinder<'m> {
    matcher: &'m CalleeMatch,
    found: bool,
}

impl<'m> DirectCallFinder<'m> {
    fn stmt(matcher: &'m CalleeMatch, stmt: &Stmt) -> bool {
        let mut finder = Self { matcher, found: false };
        finder.visit_stmt(stmt);
        finder.found
    }

    fn condition(matcher: &'m CalleeMatch, cond: &Expr) -> bool {
        let mut finder = Self { matcher, found: false };
        finder.visit_expr(cond);
        finder.found
    }
}

impl<'ast> Visit<'ast> for DirectCallFinder<'_> {
    fn visit_block(&mut self, _node: &'ast Block) {}

    fn visit_item(&mut self, _node: &'ast Item) {}

    fn visit_expr_if(&mut self, _node: &'ast ExprIf) {}

    fn visit_expr_while(&mut self, _node: &'ast ExprWhile) {}

    fn visit_expr_closure(&mut self, node: &'ast ExprClosure) {
        if self.matcher.matches_closure(node) {
            self.found = true;
        }
    }

    fn visit_expr_call(&mut self, node: &'ast ExprCall) {
        if let Expr::Path(p) = &*node.func {
            if self.matcher.matches_path(&p.path) {
                self.found = true;
            }
        }
        visit::visit_expr_call(self, node);
    }

    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        if self.matcher.matches_method(&node.method) {
            self.found = true;
        }
        visit::visit_expr_method_call(self, node);
    }

    fn visit_macro(&mut self, node: &'ast Macro) {
        for expr in macro_exprs(node) {
            self.visit_expr(&expr);
        }
    }
}

struct Target {
    callee: FunctionIdentity,
    canonical: String,
    matcher: Option<CalleeMatch>,
}

/// Places probes in one function (or closure) body.
struct BodyInstrumenter<'c> {
    ctx: &'c mut InjectionContext,
    file: PathBuf,
    caller: FunctionIdentity,
    function: String,
    targets: Vec<Target>,
    next_block: usize,
    sites: Vec<SiteOutcome>,
}

impl<'c> BodyInstrumenter<'c> {
    fn new(ctx: &'c mut InjectionContext, file: &Path, caller: &FunctionIdentity, callees: &[FunctionIdentity]) -> Self {
        let targets = callees
            .iter()
            .map(|callee| Target {
                callee: callee.clone(),
                canonical: callee.canonical(),
                matcher: None,
            })
            .collect();
        Self {
            ctx,
            file: file.to_path_buf(),
            caller: caller.clone(),
            function: caller.canonical(),
            targets,
            next_block: 0,
            sites: Vec::new(),
        }
    }

    fn run(&mut self, body: &mut Block) {
        let closures = direct_closure_starts(body);
        for target in &mut self.targets {
            target.matcher = CalleeMatch::for_callee(&self.caller, &target.callee, &closures);
        }
        self.visit_block_mut(body);
    }

    /// Closure bodies without braces are wrapped into a block, kept only if
    /// a probe went in.
    fn run_closure(&mut self, closure: &mut ExprClosure) {
        if let Expr::Block(body) = &mut *closure.body {
            self.run(&mut body.block);
            return;
        }
        let body = &closure.body;
        let mut block: Block = parse_quote!({ #body });
        let before = self.inserted();
        self.run(&mut block);
        if self.inserted() > before {
            *closure.body = Expr::Block(ExprBlock {
                attrs: Vec::new(),
                label: None,
                block,
            });
        }
    }

    fn inserted(&self) -> usize {
        self.sites
            .iter()
            .filter(|s| s.outcome == InjectionOutcome::Inserted)
            .count()
    }

    fn direct_hit(&self, stmt: &Stmt, target: usize) -> bool {
        self.targets[target]
            .matcher
            .as_ref()
            .is_some_and(|m| DirectCallFinder::stmt(m, stmt))
    }

    fn condition_hit(&self, cond: &Expr, target: usize) -> bool {
        self.targets[target]
            .matcher
            .as_ref()
            .is_some_and(|m| DirectCallFinder::condition(m, cond))
    }

    /// After the first statement calling the target, or before it when that
    /// statement is a `return` or the block's tail expression.
    fn place_direct(&mut self, block: &mut Block, ordinal: usize, target: usize) {
        let Some(i) = (0..block.stmts.len()).find(|&i| self.direct_hit(&block.stmts[i], target)) else {
            return;
        };
        let is_tail = i + 1 == block.stmts.len() && matches!(block.stmts[i], Stmt::Expr(_, None));
        let is_return = matches!(block.stmts[i], Stmt::Expr(Expr::Return(_), _));
        let pos = if is_tail || is_return { i } else { i + 1 };
        self.try_insert(&mut block.stmts, pos, ordinal, target);
    }

    fn try_insert(&mut self, stmts: &mut Vec<Stmt>, pos: usize, ordinal: usize, target: usize) {
        let record = InjectionRecord {
            block: BlockId {
                file: self.file.clone(),
                function: self.function.clone(),
                ordinal,
            },
            callee: self.targets[target].canonical.clone(),
        };
        if !self.ctx.records.insert(record) {
            return;
        }
        let near_probe = stmts.get(pos).is_some_and(|s| self.ctx.is_probe(s))
            || (pos > 0 && self.ctx.is_probe(&stmts[pos - 1]));
        let outcome = if near_probe {
            InjectionOutcome::AlreadyInstrumented
        } else {
            stmts.insert(pos, self.ctx.probe.clone());
            InjectionOutcome::Inserted
        };
        debug!(
            "{} -> {} block #{}: {:?}",
            self.function, self.targets[target].canonical, ordinal, outcome
        );
        self.sites.push(SiteOutcome {
            caller: self.function.clone(),
            callee: self.targets[target].canonical.clone(),
            outcome,
        });
    }
}

impl VisitMut for BodyInstrumenter<'_> {
    fn visit_block_mut(&mut self, block: &mut Block) {
        let ordinal = self.next_block;
        self.next_block += 1;
        for target in 0..self.targets.len() {
            self.place_direct(block, ordinal, target);
        }
        visit_mut::visit_block_mut(self, block);
    }

    fn visit_expr_if_mut(&mut self, node: &mut ExprIf) {
        let hits: Vec<usize> = (0..self.targets.len())
            .filter(|&t| self.condition_hit(&node.cond, t))
            .collect();
        self.visit_expr_mut(&mut node.cond);
        let ordinal = self.next_block;
        for target in hits {
            self.try_insert(&mut node.then_branch.stmts, 0, ordinal, target);
        }
        self.visit_block_mut(&mut node.then_branch);
        if let Some((_, else_branch)) = &mut node.else_branch {
            self.visit_expr_mut(else_branch);
        }
    }

    fn visit_expr_while_mut(&mut self, node: &mut ExprWhile) {
        let hits: Vec<usize> = (0..self.targets.len())
            .filter(|&t| self.condition_hit(&node.cond, t))
            .collect();
        self.visit_expr_mut(&mut node.cond);
        let ordinal = self.next_block;
        for target in hits {
            self.try_insert(&mut node.body.stmts, 0, ordinal, target);
        }
        self.visit_block_mut(&mut node.body);
    }

    // Closures and nested items are bodies of their own.
    fn visit_expr_closure_mut(&mut self, _node: &mut ExprClosure) {}

    fn visit_item_mut(&mut self, _node: &mut Item) {}
}

/// Walks to the closure at `path` (one ordinal per nesting level, counted
/// like the builder counts) and instruments its body.
struct ClosureLocator<'l, 'c> {
    path: &'l [u32],
    seen: u32,
    instrumenter: &'l mut BodyInstrumenter<'c>,
    found: bool,
}

impl VisitMut for ClosureLocator<'_, '_> {
    fn visit_expr_closure_mut(&mut self, node: &mut ExprClosure) {
        self.seen += 1;
        let Some((target, rest)) = self.path.split_first() else {
            return;
        };
        if self.found || self.seen != *target {
            return;
        }
        if rest.is_empty() {
            self.instrumenter.run_closure(node);
            self.found = true;
            return;
        }
        let mut inner = ClosureLocator {
            path: rest,
            seen: 0,
            instrumenter: &mut *self.instrumenter,
            found: false,
        };
        inner.visit_expr_mut(&mut node.body);
        self.found = inner.found;
    }

    fn visit_item_mut(&mut self, _node: &mut Item) {}

    fn visit_macro_mut(&mut self, node: &mut Macro) {
        if self.found {
            return;
        }
        let mut exprs = macro_exprs(node);
        for expr in &mut exprs {
            self.visit_expr_mut(expr);
        }
        if self.found {
            node.tokens = quote!(#(#exprs),*);
        }
    }
}

/// Instrument one file for the diffs whose caller lives in it or in one of
/// its inline modules.
pub fn instrument_file(ctx: &mut InjectionContext, unit: &mut ParsedUnit, diffs: &[Diff]) -> FileOutcome {
    let mut by_module: BTreeMap<Vec<String>, Vec<Diff>> = BTreeMap::new();
    for diff in diffs {
        if let Some(module) = caller_module(ctx, unit, &diff.anchor().caller) {
            by_module.entry(module).or_default().push(diff.clone());
        }
    }
    let mut outcome = FileOutcome {
        path: unit.path.clone(),
        ..FileOutcome::default()
    };

    for (module, relevant) in &by_module {
        let before = outcome.inserted();
        for (caller, group) in group_by_caller(relevant) {
            let caller_ident = group[0].anchor().caller.identity.clone();
            let mut callees: Vec<FunctionIdentity> = Vec::new();
            for diff in &group {
                let callee = &diff.anchor().callee.identity;
                if !callees.contains(callee) {
                    callees.push(callee.clone());
                }
            }
            match ctx.instrument_function(&mut unit.file, module, &unit.path, &caller_ident, &callees) {
                Some(sites) => outcome.sites.extend(sites),
                None => {
                    debug!("{}: no function matches {}", unit.path.display(), caller);
                    outcome.sites.extend(callees.iter().map(|callee| SiteOutcome {
                        caller: caller.clone(),
                        callee: callee.canonical(),
                        outcome: InjectionOutcome::NoMatchingCaller,
                    }));
                }
            }
        }
        if outcome.inserted() > before {
            if let Some(items) = inline_items(&mut unit.file.items, module) {
                outcome.import_added |= ctx.ensure_import(items);
            }
            unit.modified = true;
        }
    }
    outcome
}

/// Instrument every unit of a tree. Files no diff points at are left
/// untouched.
pub fn instrument_units(ctx: &mut InjectionContext, tree: &mut SourceTree, diffs: &[Diff]) -> InstrumentReport {
    let mut report = InstrumentReport::default();
    let outcomes: Vec<FileOutcome> = tree
        .units
        .values_mut()
        .map(|unit| instrument_file(ctx, unit, diffs))
        .collect();

    // Several files can share a module path (`lib.rs` and `main.rs`). A
    // caller missing from one of them only counts when no file has it.
    let found: HashSet<(String, String)> = outcomes
        .iter()
        .flat_map(|f| &f.sites)
        .filter(|site| site.outcome != InjectionOutcome::NoMatchingCaller)
        .map(|site| (site.caller.clone(), site.callee.clone()))
        .collect();
    let mut reported = HashSet::new();
    for mut outcome in outcomes {
        outcome.sites.retain(|site| {
            site.outcome != InjectionOutcome::NoMatchingCaller || {
                let pair = (site.caller.clone(), site.callee.clone());
                !found.contains(&pair) && reported.insert(pair)
            }
        });
        if !outcome.sites.is_empty() {
            report.files.push(outcome);
        }
    }
    info!(
        "Inserted {} probe(s) in {} file(s), {} site(s) already instrumented",
        report.inserted(),
        report.files.iter().filter(|f| f.inserted() > 0).count(),
        report.count(InjectionOutcome::AlreadyInstrumented)
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::callgraph::CallGraph;
    use crate::domain::diff::compare;
    use crate::infrastructure::project_loader::ProjectLoader;

    const ROOT: &str = "/work/demo";

    fn unit(src: &str) -> ParsedUnit {
        ParsedUnit {
            path: PathBuf::from("/work/demo/src/lib.rs"),
            module_path: "demo".to_string(),
            source: src.to_string(),
            file: syn::parse_file(src).unwrap(),
            is_test_file: false,
            modified: false,
        }
    }

    fn ctx() -> InjectionContext {
        InjectionContext::new(Path::new(ROOT), "demo", &ProbeConfig::default()).unwrap()
    }

    fn missing(caller: &str, callee: &str) -> Vec<Diff> {
        let a = CallGraph::from([(caller, callee, "common call")]);
        compare(&a, &CallGraph::new(), "demo", Path::new(ROOT))
    }

    fn instrument(src: &str, diffs: &[Diff]) -> (String, FileOutcome) {
        let mut unit = unit(src);
        let outcome = instrument_file(&mut ctx(), &mut unit, diffs);
        (ProjectLoader::render_unit(&unit.file), outcome)
    }

    fn probes(out: &str) -> usize {
        out.matches("\"difftrace: divergent call\"").count()
    }

    #[test]
    fn test_probe_after_call_statement() {
        let (out, outcome) = instrument(
            "pub fn a() { let x = 1; b(x); done(); }\nfn b(_x: i32) {}\nfn done() {}\n",
            &missing("demo::a", "demo::b"),
        );
        assert_eq!(outcome.inserted(), 1);
        assert!(outcome.import_added);
        assert!(out.starts_with("use tracing::warn;"));
        let call = out.find("b(x);").unwrap();
        let probe = out.find("warn!").unwrap();
        let done = out.find("done();").unwrap();
        assert!(call < probe && probe < done);
    }

    #[test]
    fn test_probe_before_tail_and_return() {
        let (out, _) = instrument("fn a() -> i32 { b() }\nfn b() -> i32 { 1 }\n", &missing("demo::a", "demo::b"));
        assert!(out.find("warn!").unwrap() < out.find("b()\n").unwrap());

        let (out, _) = instrument(
            "fn a() -> i32 { let y = 2; return b() + y; }\nfn b() -> i32 { 1 }\n",
            &missing("demo::a", "demo::b"),
        );
        assert!(out.find("warn!").unwrap() < out.find("return b()").unwrap());
    }

    #[test]
    fn test_innermost_block_only() {
        let src = "fn a(n: u32) { for _ in 0..n { if n > 2 { b(); } } }\nfn b() {}\n";
        let (out, outcome) = instrument(src, &missing("demo::a", "demo::b"));
        assert_eq!(outcome.inserted(), 1);
        let inner = out.find("if n > 2").unwrap();
        assert!(out.find("warn!").unwrap() > inner);
    }

    #[test]
    fn test_condition_call_goes_into_branch() {
        let src = "fn a() { if f() { g(); } }\nfn f() -> bool { true }\nfn g() {}\n";
        let (out, outcome) = instrument(src, &missing("demo::a", "demo::f"));
        assert_eq!(outcome.inserted(), 1);
        let branch = out.find("if f() {").unwrap();
        let probe = out.find("warn!").unwrap();
        assert!(probe > branch && probe < out.find("g();").unwrap());
    }

    #[test]
    fn test_if_let_scrutinee() {
        let src = "fn a() { if let Some(v) = f() { use_it(v); } }\nfn f() -> Option<u8> { None }\nfn use_it(_v: u8) {}\n";
        let (out, outcome) = instrument(src, &missing("demo::a", "demo::f"));
        assert_eq!(outcome.inserted(), 1);
        assert!(out.find("warn!").unwrap() < out.find("use_it(v)").unwrap());
    }

    #[test]
    fn test_one_probe_per_block_and_callee() {
        let src = "fn a() { b(); b(); }\nfn b() {}\n";
        let mut diffs = missing("demo::a", "demo::b");
        let changed = compare(
            &CallGraph::from([("demo::a", "demo::b", "common call")]),
            &CallGraph::from([("demo::a", "demo::b", "dynamic call")]),
            "demo",
            Path::new(ROOT),
        );
        diffs.extend(changed);
        let (out, outcome) = instrument(src, &diffs);
        assert_eq!(probes(&out), 1);
        assert_eq!(outcome.inserted(), 1);
    }

    #[test]
    fn test_method_callers_and_callees() {
        let src = r#"
pub struct Client;
impl Client {
    pub fn send(&self) {
        self.frame();
        Self::log();
    }
    fn frame(&self) {}
    fn log() {}
}
"#;
        let mut diffs = missing("(&demo::Client)::send", "(&demo::Client)::frame");
        diffs.extend(missing("(&demo::Client)::send", "(demo::Client)::log"));
        let (out, outcome) = instrument(src, &diffs);
        assert_eq!(outcome.inserted(), 2);
        assert_eq!(probes(&out), 2);
    }

    #[test]
    fn test_closure_caller_by_position() {
        let src = r#"
fn run(items: Vec<u8>) {
    let first = |x: u8| x + 1;
    items.iter().for_each(|x| step(*x));
    let _ = first;
}
fn step(_x: u8) {}
"#;
        let (out, outcome) = instrument(src, &missing("demo::run$2", "demo::step"));
        assert_eq!(outcome.inserted(), 1);
        assert!(out.contains("|x| {"));
        assert!(out.find("warn!").unwrap() < out.find("step(*x)").unwrap());
        assert!(out.find("warn!").unwrap() > out.find("for_each").unwrap());
    }

    #[test]
    fn test_closure_in_macro_args() {
        let src = r#"
fn run(v: Vec<u8>) {
    assert!(v.iter().all(|x| { check(*x) }));
}
fn check(_x: u8) -> bool { true }
"#;
        let (out, outcome) = instrument(src, &missing("demo::run$1", "demo::check"));
        assert_eq!(outcome.inserted(), 1);
        assert_eq!(probes(&out), 1);
        let reparsed = syn::parse_file(&out).unwrap();
        assert_eq!(reparsed.items.len(), 3);
    }

    #[test]
    fn test_spawned_closure_as_callee() {
        let src = "fn serve() { std::thread::spawn(move || work()); }\nfn work() {}\n";
        let (out, outcome) = instrument(src, &missing("demo::serve", "demo::serve$1"));
        assert_eq!(outcome.inserted(), 1);
        assert!(out.find("spawn").unwrap() < out.find("warn!").unwrap());
    }

    #[test]
    fn test_existing_import_reused() {
        let src = "use tracing::{info, warn};\nfn a() { b(); }\nfn b() {}\n";
        let (out, outcome) = instrument(src, &missing("demo::a", "demo::b"));
        assert_eq!(outcome.inserted(), 1);
        assert!(!outcome.import_added);
        assert!(!out.contains("use tracing::warn;"));
    }

    #[test]
    fn test_no_matching_caller() {
        let (out, outcome) = instrument("fn a() {}\n", &missing("demo::missing", "demo::b"));
        assert_eq!(outcome.count(InjectionOutcome::NoMatchingCaller), 1);
        assert!(!outcome.import_added);
        assert_eq!(probes(&out), 0);
    }

    #[test]
    fn test_diffs_for_other_modules_ignored() {
        let (_, outcome) = instrument("fn a() { b(); }\nfn b() {}\n", &missing("demo::net::a", "demo::b"));
        assert!(outcome.sites.is_empty());
    }

    const NESTED: &str = "pub fn top() {}\n\npub mod inner {\n    pub fn a() {\n        b();\n    }\n\n    fn b() {}\n}\n";

    #[test]
    fn test_caller_in_inline_module() {
        let diffs = missing("demo::inner::a", "demo::inner::b");
        let (out, outcome) = instrument(NESTED, &diffs);
        assert_eq!(outcome.inserted(), 1, "{:?}", outcome.sites);
        assert!(outcome.import_added);
        let module = out.find("pub mod inner").unwrap();
        let import = out.find("use tracing::warn;").unwrap();
        assert!(module < import && import < out.find("b();").unwrap(), "{}", out);
        assert!(out.find("b();").unwrap() < out.find("warn!").unwrap());

        let (twice, second) = instrument(&out, &diffs);
        assert_eq!(second.inserted(), 0);
        assert_eq!(second.count(InjectionOutcome::AlreadyInstrumented), 1);
        assert_eq!(out, twice);
    }

    #[test]
    fn test_caller_in_test_module() {
        let src = "pub fn run() {}\n\n#[cfg(test)]\nmod tests {\n    use super::*;\n\n    #[test]\n    fn runs() {\n        run();\n    }\n}\n";
        let (out, outcome) = instrument(src, &missing("demo::tests::runs", "demo::run"));
        assert_eq!(outcome.inserted(), 1);
        assert!(out.find("fn runs").unwrap() < out.find("warn!").unwrap());
        assert!(out.find("mod tests").unwrap() < out.find("use tracing::warn;").unwrap());
    }

    #[test]
    fn test_unknown_inline_module_ignored() {
        let (_, outcome) = instrument(NESTED, &missing("demo::other::a", "demo::inner::b"));
        assert!(outcome.sites.is_empty());
    }

    #[test]
    fn test_description_change_alone_is_instrumented() {
        let changed = compare(
            &CallGraph::from([("demo::a", "demo::b", "common call")]),
            &CallGraph::from([("demo::a", "demo::b", "dynamic call")]),
            "demo",
            Path::new(ROOT),
        );
        assert_eq!(changed.len(), 1);
        let (out, outcome) = instrument("fn a() { b(); }\nfn b() {}\n", &changed);
        assert_eq!(outcome.inserted(), 1);
        assert_eq!(probes(&out), 1);
        assert!(out.find("b();").unwrap() < out.find("warn!").unwrap());
    }

    #[test]
    fn test_caller_found_in_one_of_two_crate_roots() {
        let mut lib = unit("pub fn helper() {}\n");
        let mut main = unit("fn main() {\n    serve();\n}\n\nfn serve() {}\n");
        main.path = PathBuf::from("/work/demo/src/main.rs");
        lib.path = PathBuf::from("/work/demo/src/lib.rs");
        let mut tree = SourceTree {
            root: PathBuf::from(ROOT),
            package: "demo".to_string(),
            units: BTreeMap::from([(lib.path.clone(), lib), (main.path.clone(), main)]),
            other_files: Vec::new(),
        };
        let mut diffs = missing("demo::main", "demo::serve");
        diffs.extend(missing("demo::gone", "demo::serve"));

        let report = instrument_units(&mut ctx(), &mut tree, &diffs);
        assert_eq!(report.inserted(), 1);
        // `demo::gone` is in neither file and is reported once
        assert_eq!(report.count(InjectionOutcome::NoMatchingCaller), 1);
        assert!(tree.units[Path::new("/work/demo/src/main.rs")].modified);
        assert!(!tree.units[Path::new("/work/demo/src/lib.rs")].modified);
    }

    #[test]
    fn test_second_pass_is_a_no_op() {
        let src = "fn a() -> u8 { if f() { b(); } b(); let k = 1; c() + k }\nfn f() -> bool { true }\nfn b() {}\nfn c() -> u8 { 0 }\n";
        let mut diffs = missing("demo::a", "demo::b");
        diffs.extend(missing("demo::a", "demo::f"));
        diffs.extend(missing("demo::a", "demo::c"));
        let (once, first) = instrument(src, &diffs);
        assert_eq!(first.inserted(), 4);
        let (twice, second) = instrument(&once, &diffs);
        assert_eq!(second.inserted(), 0);
        assert_eq!(once, twice);
        assert_eq!(twice.matches("use tracing::warn;").count(), 1);
    }
}
