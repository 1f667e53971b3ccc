//! Whole-program symbol index.
//!
//! Every parsed file is walked once (in parallel) to record functions,
//! methods, trait implementations, struct fields, imports, and a summary of
//! each function body: its call sites, local bindings and the types it
//! constructs. The builder resolves calls against this index.

use std::collections::HashMap;

use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use syn::{
    Expr, ExprCall, ExprClosure, ExprMethodCall, ExprPath, ExprStruct, Fields, FnArg, GenericArgument, Generics,
    ImplItem, Item, Local, Macro, Member, Pat, PathArguments, Signature, TraitItem, Type, TypeParamBound,
    UseTree, Visibility, WherePredicate,
};
use tracing::warn;

use crate::domain::callgraph::CallKind;
use crate::domain::closures::macro_exprs;
use crate::domain::entry_point::{has_test_attr, is_cfg_test, line_of};
use crate::domain::identity::FunctionIdentity;

/// Smart pointers and wrappers looked through when typing a value.
const TRANSPARENT_WRAPPERS: &[&str] = &["Box", "Rc", "Arc", "Option", "Result", "Pin"];

/// Calls whose closure arguments run on another thread or task.
pub const SPAWN_NAMES: &[&str] = &["spawn", "spawn_blocking"];

/// What is known about the type of a value from its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeHint {
    /// A named type (`Client`, `&mut Client`, `Arc<Client>`).
    Concrete(String),
    /// A trait object; carries the trait names.
    Dyn(Vec<String>),
    /// A generic parameter or `impl Trait`; carries the bounds.
    Generic(Vec<String>),
}

impl TypeHint {
    pub fn concrete(&self) -> Option<&str> {
        match self {
            TypeHint::Concrete(name) => Some(name),
            _ => None,
        }
    }

    /// Trait names a dispatched call is restricted to.
    pub fn traits(&self) -> &[String] {
        match self {
            TypeHint::Concrete(_) => &[],
            TypeHint::Dyn(traits) | TypeHint::Generic(traits) => traits,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub identity: FunctionIdentity,
    pub is_public: bool,
    pub receiver: Option<String>, // "&self", "self", or None for associated functions
    pub location: String,         // file:line
    pub return_type: Option<TypeHint>,
}

/// Where a local name's value comes from. Shadowed names keep every
/// binding (the analysis is flow-insensitive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    Declared(TypeHint),
    /// `T { .. }`, `T(..)`, `E::V(..)`
    Constructed(String),
    /// Result of a path call, typed by the callee's return type.
    Call(Vec<String>),
    /// `let y = x`, `&x`, `x.clone()`
    Alias(String),
    Closure(FunctionIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receiver {
    SelfValue,
    SelfField(String),
    Local(String),
    CallResult(Vec<String>),
    Constructed(String),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// Path call as written, e.g. `["crate", "net", "connect"]`.
    Path(Vec<String>),
    Method { receiver: Receiver, name: String },
    /// A closure literal, treated as invoked by its enclosing function.
    Closure(FunctionIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub target: CallTarget,
    pub kind: CallKind,
    pub line: usize,
}

/// Summary of one function or closure body.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub identity: FunctionIdentity,
    /// Module the body's paths are resolved in.
    pub unit: String,
    pub file: String,
    pub self_type: Option<String>,
    /// Enclosing function of a closure.
    pub parent: Option<FunctionIdentity>,
    pub locals: HashMap<String, Vec<Binding>>,
    pub calls: Vec<CallSite>,
    pub instantiated: Vec<String>,
}

impl FunctionBody {
    fn new(
        identity: FunctionIdentity,
        unit: &str,
        file: &str,
        self_type: Option<String>,
        parent: Option<FunctionIdentity>,
    ) -> Self {
        Self {
            identity,
            unit: unit.to_string(),
            file: file.to_string(),
            self_type,
            parent,
            locals: HashMap::new(),
            calls: Vec::new(),
            instantiated: Vec::new(),
        }
    }
}

/// Thread-safe symbol index using DashMap for concurrent access.
/// Enables parallel parsing and indexing of source files.
#[derive(Default)]
pub struct SymbolIndex {
    pub functions: DashMap<FunctionIdentity, FunctionSignature>,

    // Key: (TypeName, MethodName); one entry per impl block defining it
    pub type_methods: DashMap<(String, String), Vec<FunctionIdentity>>,

    // Acceleration map: MethodName -> Vec<(TypeName, MethodName)>
    pub method_lookup: DashMap<String, Vec<(String, String)>>,

    // Trait -> implementing types, and the reverse
    pub trait_impls: DashMap<String, Vec<String>>,
    pub type_traits: DashMap<String, Vec<String>>,

    // (TypeName, field) -> declared type
    pub fields: DashMap<(String, String), TypeHint>,

    pub bodies: DashMap<FunctionIdentity, FunctionBody>,

    // Module -> (alias -> imported path)
    pub imports: DashMap<String, HashMap<String, Vec<String>>>,
}

impl SymbolIndex {
    /// Build the symbol index from `(module, file_path, code)` triples in
    /// parallel. Syntax trees are not `Send`, so each worker parses its own.
    pub fn build(sources: &[(String, String, String)], include_tests: bool) -> Self {
        let index = SymbolIndex::default();

        // Parallel iteration over all source files
        sources.par_iter().for_each(|(module, file_path, code)| match syn::parse_file(code) {
            Ok(ast) => {
                let ctx = IndexCtx {
                    file: file_path,
                    include_tests,
                };
                index.index_items(&ctx, module, &ast.items);
            }
            Err(e) => {
                warn!("Failed to parse {}: {}", file_path, e);
            }
        });

        index
    }

    /// Find all methods with a given name (for conservative resolution).
    /// Returns cloned identities to avoid holding DashMap locks.
    pub fn find_methods_by_name(&self, method_name: &str) -> Vec<FunctionIdentity> {
        if let Some(candidates) = self.method_lookup.get(method_name) {
            candidates
                .iter()
                .filter_map(|key| self.type_methods.get(key).map(|r| r.clone()))
                .flatten()
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Methods `name` callable on `type_name`: inherent and trait impls,
    /// then default methods of the traits it implements.
    pub fn methods_of(&self, type_name: &str, name: &str) -> Vec<FunctionIdentity> {
        if let Some(found) = self.type_methods.get(&(type_name.to_string(), name.to_string())) {
            return found.clone();
        }
        let traits = self
            .type_traits
            .get(type_name)
            .map(|t| t.clone())
            .unwrap_or_default();
        traits
            .iter()
            .filter_map(|t| self.type_methods.get(&(t.clone(), name.to_string())).map(|r| r.clone()))
            .flatten()
            .collect()
    }

    /// Types implementing any of `traits`, plus the traits themselves (their
    /// default methods are dispatch targets too). Empty when none is known.
    pub fn implementors(&self, traits: &[String]) -> Vec<String> {
        let mut out = Vec::new();
        for t in traits {
            if let Some(types) = self.trait_impls.get(t) {
                out.extend(types.iter().cloned());
                out.push(t.clone());
            }
        }
        out.sort();
        out.dedup();
        out
    }

    pub fn signature(&self, ident: &FunctionIdentity) -> Option<FunctionSignature> {
        self.functions.get(ident).map(|r| r.clone())
    }

    pub fn import(&self, unit: &str, alias: &str) -> Option<Vec<String>> {
        self.imports.get(unit).and_then(|m| m.get(alias).cloned())
    }

    fn register(&self, sig: FunctionSignature) {
        if let Some(owner) = sig.identity.owner_type() {
            let key = (owner.to_string(), sig.identity.name().to_string());
            self.type_methods
                .entry(key.clone())
                .or_default()
                .push(sig.identity.clone());
            let mut lookup = self.method_lookup.entry(key.1.clone()).or_default();
            if !lookup.contains(&key) {
                lookup.push(key);
            }
        }
        self.functions.insert(sig.identity.clone(), sig);
    }

    /// Index all items in a list (recursive for nested modules).
    fn index_items(&self, ctx: &IndexCtx<'_>, unit: &str, items: &[Item]) {
        for item in items {
            match item {
                Item::Fn(func) => {
                    if ctx.skips(&func.attrs) {
                        continue;
                    }
                    let identity = FunctionIdentity::free(unit, func.sig.ident.to_string());
                    let generics = generic_bounds(&func.sig.generics, &HashMap::new());
                    self.register(FunctionSignature {
                        identity: identity.clone(),
                        is_public: matches!(func.vis, Visibility::Public(_)),
                        receiver: None,
                        location: format!("{}:{}", ctx.file, line_of(&func.sig.ident)),
                        return_type: return_hint(&func.sig, None, &generics),
                    });
                    self.collect_body(ctx, unit, identity, None, &generics, &func.sig, &func.block);
                }
                Item::Impl(imp) => {
                    if ctx.skips(&imp.attrs) {
                        continue;
                    }
                    let Some(type_name) = type_name(&imp.self_ty) else {
                        continue;
                    };
                    let trait_name = imp
                        .trait_
                        .as_ref()
                        .and_then(|(_, path, _)| path.segments.last())
                        .map(|seg| seg.ident.to_string());
                    if let Some(t) = &trait_name {
                        self.trait_impls.entry(t.clone()).or_default().push(type_name.clone());
                        self.type_traits.entry(type_name.clone()).or_default().push(t.clone());
                    }
                    let impl_generics = generic_bounds(&imp.generics, &HashMap::new());

                    for impl_item in &imp.items {
                        if let ImplItem::Fn(method) = impl_item {
                            if ctx.skips(&method.attrs) {
                                continue;
                            }
                            let is_public = trait_name.is_some() || matches!(method.vis, Visibility::Public(_));
                            let generics = generic_bounds(&method.sig.generics, &impl_generics);
                            let identity = self.register_method(ctx, unit, &type_name, is_public, &method.sig, &generics);
                            self.collect_body(
                                ctx,
                                unit,
                                identity,
                                Some(type_name.clone()),
                                &generics,
                                &method.sig,
                                &method.block,
                            );
                        }
                    }
                }
                Item::Trait(tr) => {
                    if ctx.skips(&tr.attrs) {
                        continue;
                    }
                    let trait_name = tr.ident.to_string();
                    self.trait_impls.entry(trait_name.clone()).or_default();
                    let trait_generics = generic_bounds(&tr.generics, &HashMap::new());
                    for trait_item in &tr.items {
                        if let TraitItem::Fn(method) = trait_item {
                            let Some(block) = &method.default else {
                                continue;
                            };
                            let generics = generic_bounds(&method.sig.generics, &trait_generics);
                            let identity = self.register_method(ctx, unit, &trait_name, true, &method.sig, &generics);
                            self.collect_body(
                                ctx,
                                unit,
                                identity,
                                Some(trait_name.clone()),
                                &generics,
                                &method.sig,
                                block,
                            );
                        }
                    }
                }
                Item::Struct(s) => {
                    let struct_name = s.ident.to_string();
                    let generics = generic_bounds(&s.generics, &HashMap::new());
                    let fields: Vec<(String, &Type)> = match &s.fields {
                        Fields::Named(named) => named
                            .named
                            .iter()
                            .filter_map(|f| f.ident.as_ref().map(|i| (i.to_string(), &f.ty)))
                            .collect(),
                        Fields::Unnamed(unnamed) => unnamed
                            .unnamed
                            .iter()
                            .enumerate()
                            .map(|(i, f)| (i.to_string(), &f.ty))
                            .collect(),
                        Fields::Unit => Vec::new(),
                    };
                    for (field, ty) in fields {
                        if let Some(hint) = type_hint(ty, Some(&struct_name), &generics) {
                            self.fields.insert((struct_name.clone(), field), hint);
                        }
                    }
                }
                Item::Use(u) => {
                    let mut aliases = HashMap::new();
                    collect_use(&u.tree, &mut Vec::new(), &mut aliases);
                    self.imports.entry(unit.to_string()).or_default().extend(aliases);
                }
                Item::Mod(module) => {
                    if ctx.skips(&module.attrs) {
                        continue;
                    }
                    // Recurse into inline modules
                    if let Some((_, content)) = &module.content {
                        let nested = format!("{}::{}", unit, module.ident);
                        self.index_items(ctx, &nested, content);
                    }
                }
                _ => {}
            }
        }
    }

    fn register_method(
        &self,
        ctx: &IndexCtx<'_>,
        unit: &str,
        owner: &str,
        is_public: bool,
        sig: &Signature,
        generics: &HashMap<String, Vec<String>>,
    ) -> FunctionIdentity {
        let receiver = sig.inputs.first().and_then(|arg| match arg {
            FnArg::Receiver(r) => {
                if r.reference.is_some() {
                    Some("&self".to_string())
                } else {
                    Some("self".to_string())
                }
            }
            _ => None,
        });
        let by_ref = receiver.as_deref() == Some("&self");
        let identity = FunctionIdentity::method(unit, owner, by_ref, sig.ident.to_string());
        self.register(FunctionSignature {
            identity: identity.clone(),
            is_public,
            receiver,
            location: format!("{}:{}", ctx.file, line_of(&sig.ident)),
            return_type: return_hint(sig, Some(owner), generics),
        });
        identity
    }

    #[allow(clippy::too_many_arguments)]
    fn collect_body(
        &self,
        ctx: &IndexCtx<'_>,
        unit: &str,
        identity: FunctionIdentity,
        self_type: Option<String>,
        generics: &HashMap<String, Vec<String>>,
        sig: &Signature,
        block: &syn::Block,
    ) {
        let mut collector = BodyCollector::new(
            FunctionBody::new(identity, unit, ctx.file, self_type, None),
            generics.clone(),
        );
        for input in &sig.inputs {
            if let FnArg::Typed(pt) = input {
                collector.bind_param(&pt.pat, Some(&pt.ty));
            }
        }
        collector.visit_block(block);
        for body in collector.finish() {
            self.bodies.insert(body.identity.clone(), body);
        }
    }
}

struct IndexCtx<'a> {
    file: &'a str,
    include_tests: bool,
}

impl IndexCtx<'_> {
    fn skips(&self, attrs: &[syn::Attribute]) -> bool {
        !self.include_tests && (is_cfg_test(attrs) || has_test_attr(attrs))
    }
}

/// Walks one body without descending into closures (they get their own
/// collector) or nested items.
struct BodyCollector {
    body: FunctionBody,
    closures: u32,
    generics: HashMap<String, Vec<String>>,
    done: Vec<FunctionBody>,
}

impl BodyCollector {
    fn new(body: FunctionBody, generics: HashMap<String, Vec<String>>) -> Self {
        Self {
            body,
            closures: 0,
            generics,
            done: Vec::new(),
        }
    }

    fn finish(mut self) -> Vec<FunctionBody> {
        self.done.push(self.body);
        self.done
    }

    fn bind_param(&mut self, pat: &Pat, ty: Option<&Type>) {
        match pat {
            Pat::Ident(pi) => {
                let hint = ty.and_then(|t| type_hint(t, self.body.self_type.as_deref(), &self.generics));
                if let Some(hint) = hint {
                    self.body
                        .locals
                        .entry(pi.ident.to_string())
                        .or_default()
                        .push(Binding::Declared(hint));
                }
            }
            Pat::Type(pt) => self.bind_param(&pt.pat, Some(&pt.ty)),
            _ => {}
        }
    }

    fn instantiate(&mut self, name: &str) {
        let name = if name == "Self" {
            match &self.body.self_type {
                Some(t) => t.clone(),
                None => return,
            }
        } else {
            name.to_string()
        };
        if !self.body.instantiated.contains(&name) {
            self.body.instantiated.push(name);
        }
    }

    fn enter_closure(&mut self, node: &ExprClosure, kind: CallKind) {
        self.closures += 1;
        let identity = self.body.identity.closure(self.closures);
        self.body.calls.push(CallSite {
            target: CallTarget::Closure(identity.clone()),
            kind,
            line: line_of(node),
        });
        let mut child = BodyCollector::new(
            FunctionBody::new(
                identity,
                &self.body.unit,
                &self.body.file,
                self.body.self_type.clone(),
                Some(self.body.identity.clone()),
            ),
            self.generics.clone(),
        );
        for input in &node.inputs {
            child.bind_param(input, None);
        }
        child.visit_expr(&node.body);
        self.done.extend(child.finish());
    }

    fn visit_args(&mut self, args: &Punctuated<Expr, syn::Token![,]>, spawn: bool) {
        for arg in args {
            match arg {
                Expr::Closure(c) if spawn => self.enter_closure(c, CallKind::Spawn),
                _ => self.visit_expr(arg),
            }
        }
    }

    /// Record `path(..)`; uppercase paths are constructors, not calls.
    fn record_path_call(&mut self, path: &syn::Path, line: usize) {
        let segments = path_segments(path);
        let Some(last) = segments.last() else {
            return;
        };
        if starts_uppercase(last) {
            if segments.len() >= 2 && starts_uppercase(&segments[segments.len() - 2]) {
                let owner = segments[segments.len() - 2].clone();
                self.instantiate(&owner);
            } else {
                let owner = last.clone();
                self.instantiate(&owner);
            }
            return;
        }
        self.body.calls.push(CallSite {
            target: CallTarget::Path(segments),
            kind: CallKind::Common,
            line,
        });
    }

    fn classify_init(&self, expr: &Expr) -> Option<Binding> {
        match expr {
            Expr::Struct(s) => path_segments(&s.path).last().map(|t| Binding::Constructed(self.resolve_self(t))),
            Expr::Call(call) => match &*call.func {
                Expr::Path(p) => {
                    let segments = path_segments(&p.path);
                    let last = segments.last()?;
                    if starts_uppercase(last) {
                        let owner = if segments.len() >= 2 && starts_uppercase(&segments[segments.len() - 2]) {
                            &segments[segments.len() - 2]
                        } else {
                            last
                        };
                        Some(Binding::Constructed(self.resolve_self(owner)))
                    } else {
                        Some(Binding::Call(segments))
                    }
                }
                _ => None,
            },
            Expr::Path(p) if p.path.segments.len() == 1 => Some(Binding::Alias(p.path.segments[0].ident.to_string())),
            Expr::MethodCall(m) if m.method == "clone" => match &*m.receiver {
                Expr::Path(p) if p.path.segments.len() == 1 => Some(Binding::Alias(p.path.segments[0].ident.to_string())),
                _ => None,
            },
            Expr::Closure(_) => Some(Binding::Closure(self.body.identity.closure(self.closures + 1))),
            Expr::Reference(r) => self.classify_init(&r.expr),
            Expr::Paren(p) => self.classify_init(&p.expr),
            Expr::Try(t) => self.classify_init(&t.expr),
            Expr::Await(a) => self.classify_init(&a.base),
            _ => None,
        }
    }

    fn resolve_self(&self, name: &str) -> String {
        if name == "Self" {
            self.body.self_type.clone().unwrap_or_else(|| name.to_string())
        } else {
            name.to_string()
        }
    }

    fn receiver_of(&self, expr: &Expr) -> Receiver {
        match expr {
            Expr::Path(p) if p.qself.is_none() && p.path.segments.len() == 1 => {
                let name = p.path.segments[0].ident.to_string();
                if name == "self" {
                    Receiver::SelfValue
                } else {
                    Receiver::Local(name)
                }
            }
            Expr::Field(f) => match (&*f.base, &f.member) {
                (Expr::Path(p), member) if p.path.is_ident("self") => Receiver::SelfField(match member {
                    Member::Named(ident) => ident.to_string(),
                    Member::Unnamed(index) => index.index.to_string(),
                }),
                _ => Receiver::Unknown,
            },
            Expr::Call(call) => match &*call.func {
                Expr::Path(p) => Receiver::CallResult(path_segments(&p.path)),
                _ => Receiver::Unknown,
            },
            Expr::Struct(s) => match path_segments(&s.path).last() {
                Some(t) => Receiver::Constructed(self.resolve_self(t)),
                None => Receiver::Unknown,
            },
            Expr::Reference(r) => self.receiver_of(&r.expr),
            Expr::Paren(p) => self.receiver_of(&p.expr),
            Expr::Try(t) => self.receiver_of(&t.expr),
            Expr::Await(a) => self.receiver_of(&a.base),
            _ => Receiver::Unknown,
        }
    }
}

impl<'ast> Visit<'ast> for BodyCollector {
    fn visit_item(&mut self, _node: &'ast Item) {}

    fn visit_expr_closure(&mut self, node: &'ast ExprClosure) {
        self.enter_closure(node, CallKind::Common);
    }

    fn visit_macro(&mut self, node: &'ast Macro) {
        for expr in macro_exprs(node) {
            Visit::visit_expr(self, &expr);
        }
    }

    fn visit_expr_call(&mut self, node: &'ast ExprCall) {
        let spawn = match &*node.func {
            Expr::Path(p) if p.qself.is_none() => {
                self.record_path_call(&p.path, line_of(&p.path));
                p.path
                    .segments
                    .last()
                    .is_some_and(|seg| SPAWN_NAMES.iter().any(|s| seg.ident == s))
            }
            other => {
                self.visit_expr(other);
                false
            }
        };
        self.visit_args(&node.args, spawn);
    }

    fn visit_expr_method_call(&mut self, node: &'ast ExprMethodCall) {
        self.visit_expr(&node.receiver);
        let name = node.method.to_string();
        let receiver = self.receiver_of(&node.receiver);
        let spawn = SPAWN_NAMES.contains(&name.as_str());
        self.body.calls.push(CallSite {
            target: CallTarget::Method { receiver, name },
            kind: CallKind::Common,
            line: line_of(&node.method),
        });
        self.visit_args(&node.args, spawn);
    }

    fn visit_expr_struct(&mut self, node: &'ast ExprStruct) {
        if let Some(name) = path_segments(&node.path).last() {
            let name = name.clone();
            self.instantiate(&name);
        }
        visit::visit_expr_struct(self, node);
    }

    fn visit_expr_path(&mut self, node: &'ast ExprPath) {
        // Unit enum variants: `Shape::Empty`
        let segments = path_segments(&node.path);
        if segments.len() >= 2 && segments[segments.len() - 2..].iter().all(|s| starts_uppercase(s)) {
            let owner = segments[segments.len() - 2].clone();
            self.instantiate(&owner);
        }
    }

    fn visit_local(&mut self, node: &'ast Local) {
        let (name, declared) = match &node.pat {
            Pat::Ident(pi) => (Some(pi.ident.to_string()), None),
            Pat::Type(pt) => match &*pt.pat {
                Pat::Ident(pi) => (
                    Some(pi.ident.to_string()),
                    type_hint(&pt.ty, self.body.self_type.as_deref(), &self.generics),
                ),
                _ => (None, None),
            },
            _ => (None, None),
        };
        if let Some(name) = name {
            let binding = declared
                .map(Binding::Declared)
                .or_else(|| node.init.as_ref().and_then(|init| self.classify_init(&init.expr)));
            if let Some(binding) = binding {
                self.body.locals.entry(name).or_default().push(binding);
            }
        }
        visit::visit_local(self, node);
    }
}

/// Identifier segments of a path (generic arguments dropped).
pub fn path_segments(path: &syn::Path) -> Vec<String> {
    path.segments.iter().map(|seg| seg.ident.to_string()).collect()
}

pub fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

/// Name of the type an `impl` block is for.
pub fn type_name(ty: &Type) -> Option<String> {
    match ty {
        Type::Path(tp) => tp.path.segments.last().map(|seg| seg.ident.to_string()),
        Type::Reference(r) => type_name(&r.elem),
        Type::Paren(p) => type_name(&p.elem),
        _ => None,
    }
}

fn bound_traits(bounds: &Punctuated<TypeParamBound, syn::Token![+]>) -> Vec<String> {
    bounds
        .iter()
        .filter_map(|b| match b {
            TypeParamBound::Trait(t) => t.path.segments.last().map(|seg| seg.ident.to_string()),
            _ => None,
        })
        .collect()
}

/// Generic parameter name -> trait bounds, from the parameter list and the
/// where clause, layered over `outer`.
pub fn generic_bounds(generics: &Generics, outer: &HashMap<String, Vec<String>>) -> HashMap<String, Vec<String>> {
    let mut out = outer.clone();
    for param in generics.type_params() {
        out.entry(param.ident.to_string())
            .or_default()
            .extend(bound_traits(&param.bounds));
    }
    if let Some(clause) = &generics.where_clause {
        for pred in &clause.predicates {
            if let WherePredicate::Type(pt) = pred {
                if let Some(name) = type_name(&pt.bounded_ty) {
                    if let Some(bounds) = out.get_mut(&name) {
                        bounds.extend(bound_traits(&pt.bounds));
                    }
                }
            }
        }
    }
    out
}

/// Type of a declaration as far as dispatch is concerned.
pub fn type_hint(ty: &Type, self_type: Option<&str>, generics: &HashMap<String, Vec<String>>) -> Option<TypeHint> {
    match ty {
        Type::Reference(r) => type_hint(&r.elem, self_type, generics),
        Type::Paren(p) => type_hint(&p.elem, self_type, generics),
        Type::Group(g) => type_hint(&g.elem, self_type, generics),
        Type::TraitObject(t) => Some(TypeHint::Dyn(bound_traits(&t.bounds))),
        Type::ImplTrait(t) => Some(TypeHint::Generic(bound_traits(&t.bounds))),
        Type::Path(tp) if tp.qself.is_none() => {
            let seg = tp.path.segments.last()?;
            let name = seg.ident.to_string();
            if name == "Self" {
                return self_type.map(|t| TypeHint::Concrete(t.to_string()));
            }
            if TRANSPARENT_WRAPPERS.contains(&name.as_str()) {
                if let PathArguments::AngleBracketed(args) = &seg.arguments {
                    for arg in &args.args {
                        if let GenericArgument::Type(inner) = arg {
                            return type_hint(inner, self_type, generics);
                        }
                    }
                }
                return None;
            }
            if tp.path.segments.len() == 1 {
                if let Some(bounds) = generics.get(&name) {
                    return Some(TypeHint::Generic(bounds.clone()));
                }
            }
            starts_uppercase(&name).then_some(TypeHint::Concrete(name))
        }
        _ => None,
    }
}

fn return_hint(sig: &Signature, self_type: Option<&str>, generics: &HashMap<String, Vec<String>>) -> Option<TypeHint> {
    match &sig.output {
        syn::ReturnType::Default => None,
        syn::ReturnType::Type(_, ty) => type_hint(ty, self_type, generics),
    }
}

/// Alias -> full path for every name a `use` tree brings into scope.
/// Globs are not tracked.
pub fn collect_use(tree: &UseTree, prefix: &mut Vec<String>, out: &mut HashMap<String, Vec<String>>) {
    match tree {
        UseTree::Path(p) => {
            prefix.push(p.ident.to_string());
            collect_use(&p.tree, prefix, out);
            prefix.pop();
        }
        UseTree::Name(n) => {
            let name = n.ident.to_string();
            if name == "self" {
                if let Some(last) = prefix.last() {
                    out.insert(last.clone(), prefix.clone());
                }
            } else {
                let mut full = prefix.clone();
                full.push(name.clone());
                out.insert(name, full);
            }
        }
        UseTree::Rename(r) => {
            let mut full = prefix.clone();
            if r.ident != "self" {
                full.push(r.ident.to_string());
            }
            out.insert(r.rename.to_string(), full);
        }
        UseTree::Group(g) => {
            for item in &g.items {
                collect_use(item, prefix, out);
            }
        }
        UseTree::Glob(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(module: &str, src: &str) -> (String, String, String) {
        (
            module.to_string(),
            format!("src/{}.rs", module.replace("::", "/")),
            src.to_string(),
        )
    }

    const NET: &str = r#"
use std::sync::Arc;
use crate::store::{Store as Db, open};

pub trait Transport {
    fn send(&self, msg: &str) -> bool;
    fn flush(&self) { self.send(""); }
}

pub struct Client {
    db: Arc<Db>,
}

impl Client {
    pub fn new() -> Self {
        Client { db: Arc::new(open()) }
    }

    fn helper(self) {}
}

impl Transport for Client {
    fn send(&self, msg: &str) -> bool {
        let t: Box<dyn Transport> = Box::new(Client::new());
        let c = Client::new();
        let d = &c;
        self.db.put(msg);
        std::thread::spawn(move || d.send(msg));
        true
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn sends() {}
}
"#;

    #[test]
    fn test_index_methods_and_traits() {
        let u = unit("demo::net", NET);
        let index = SymbolIndex::build(&[u], false);

        let send = FunctionIdentity::method("demo::net", "Client", true, "send");
        let sig = index.signature(&send).unwrap();
        assert!(sig.is_public);
        assert_eq!(sig.receiver.as_deref(), Some("&self"));

        let new = FunctionIdentity::method("demo::net", "Client", false, "new");
        assert_eq!(index.signature(&new).unwrap().return_type, Some(TypeHint::Concrete("Client".into())));

        assert_eq!(index.find_methods_by_name("send").len(), 1);
        assert_eq!(index.methods_of("Client", "flush").len(), 1);
        assert_eq!(index.implementors(&["Transport".to_string()]), vec!["Client", "Transport"]);
        assert_eq!(
            index.fields.get(&("Client".to_string(), "db".to_string())).map(|r| r.clone()),
            Some(TypeHint::Concrete("Db".into()))
        );
        assert_eq!(
            index.import("demo::net", "Db"),
            Some(vec!["crate".to_string(), "store".to_string(), "Store".to_string()])
        );
        assert!(!index.functions.iter().any(|f| f.key().name() == "sends"));
    }

    #[test]
    fn test_body_summary() {
        let u = unit("demo::net", NET);
        let index = SymbolIndex::build(&[u], false);
        let send = FunctionIdentity::method("demo::net", "Client", true, "send");
        let body = index.bodies.get(&send).unwrap().clone();

        assert_eq!(body.locals["t"], vec![Binding::Declared(TypeHint::Dyn(vec!["Transport".into()]))]);
        assert_eq!(body.locals["c"], vec![Binding::Call(vec!["Client".into(), "new".into()])]);
        assert_eq!(body.locals["d"], vec![Binding::Alias("c".into())]);
        assert!(body.calls.iter().any(|c| matches!(
            &c.target,
            CallTarget::Method { receiver: Receiver::SelfField(f), name } if f == "db" && name == "put"
        )));

        let spawned = send.closure(1);
        let site = body
            .calls
            .iter()
            .find(|c| c.target == CallTarget::Closure(spawned.clone()))
            .unwrap();
        assert_eq!(site.kind, CallKind::Spawn);
        let closure = index.bodies.get(&spawned).unwrap();
        assert_eq!(closure.parent, Some(send.clone()));
        assert!(closure.calls.iter().any(|c| matches!(
            &c.target,
            CallTarget::Method { receiver: Receiver::Local(l), name } if l == "d" && name == "send"
        )));
    }

    #[test]
    fn test_tests_indexed_when_requested() {
        let u = unit("demo::net", NET);
        let index = SymbolIndex::build(&[u], true);
        assert!(index
            .functions
            .contains_key(&FunctionIdentity::free("demo::net::tests", "sends")));
    }

    #[test]
    fn test_instantiations() {
        let src = r#"
enum Shape { Square(u32), Empty }
struct Point(u32);
fn make() {
    let a = Shape::Square(1);
    let b = Shape::Empty;
    let p = Point(2);
}
"#;
        let u = unit("demo", src);
        let index = SymbolIndex::build(&[u], false);
        let body = index.bodies.get(&FunctionIdentity::free("demo", "make")).unwrap().clone();
        assert_eq!(body.instantiated, vec!["Shape".to_string(), "Point".to_string()]);
        assert!(body.calls.is_empty());
    }

    #[test]
    fn test_generic_bounds() {
        let src = "fn run<T: Transport + Clone>(t: T, u: impl Sink) where T: Send {}";
        let u = unit("demo", src);
        let index = SymbolIndex::build(&[u], false);
        let body = index.bodies.get(&FunctionIdentity::free("demo", "run")).unwrap().clone();
        assert_eq!(
            body.locals["t"],
            vec![Binding::Declared(TypeHint::Generic(vec![
                "Transport".into(),
                "Clone".into(),
                "Send".into()
            ]))]
        );
        assert_eq!(body.locals["u"], vec![Binding::Declared(TypeHint::Generic(vec!["Sink".into()]))]);
    }
}
