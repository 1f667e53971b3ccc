//! Collector probe insertion: every function, method and closure body of a
//! crate starts by reporting itself to the dynamic trace collector.

use proc_macro2::TokenStream;
use quote::quote;
use syn::visit_mut::VisitMut;
use syn::{parse_quote, Block, Expr, ExprClosure, FnArg, ImplItem, Item, Macro, Stmt, TraitItem};
use tracing::debug;

use crate::domain::closures::{macro_exprs, macro_named};
use crate::domain::identity::FunctionIdentity;
use crate::domain::index::type_name;
use crate::infrastructure::project_loader::{ParsedUnit, SourceTree};

/// Macro exported by the probe runtime.
pub const PROBE_MACRO: &str = "probe";

/// Inserts `<runtime>::probe!(run, "identity");` statements.
pub struct CollectorInserter {
    run: u32,
    runtime: syn::Ident,
    inserted: usize,
}

impl CollectorInserter {
    pub fn new(run: u32, runtime: &str) -> Self {
        Self {
            run,
            runtime: syn::Ident::new(&runtime.replace('-', "_"), proc_macro2::Span::call_site()),
            inserted: 0,
        }
    }

    pub fn inserted(&self) -> usize {
        self.inserted
    }

    fn probe(&self, ident: &FunctionIdentity) -> Stmt {
        let runtime = &self.runtime;
        let run = self.run;
        let name = ident.canonical();
        parse_quote!(#runtime::probe!(#run, #name);)
    }

    fn is_probe(&self, stmt: &Stmt) -> bool {
        let mac = match stmt {
            Stmt::Macro(m) => &m.mac,
            Stmt::Expr(Expr::Macro(m), _) => &m.mac,
            _ => return false,
        };
        macro_named(mac, PROBE_MACRO) && mac.path.segments.first().is_some_and(|seg| seg.ident == self.runtime)
    }

    fn items(&mut self, unit: &str, items: &mut [Item]) {
        for item in items.iter_mut() {
            match item {
                Item::Fn(func) if func.sig.constness.is_none() => {
                    let ident = FunctionIdentity::free(unit, func.sig.ident.to_string());
                    self.body(&ident, &mut func.block);
                }
                Item::Impl(imp) => {
                    let Some(owner) = type_name(&imp.self_ty) else {
                        continue;
                    };
                    for impl_item in imp.items.iter_mut() {
                        if let ImplItem::Fn(method) = impl_item {
                            if method.sig.constness.is_some() {
                                continue;
                            }
                            let ident = FunctionIdentity::method(
                                unit,
                                owner.clone(),
                                by_ref(&method.sig),
                                method.sig.ident.to_string(),
                            );
                            self.body(&ident, &mut method.block);
                        }
                    }
                }
                Item::Trait(tr) => {
                    let owner = tr.ident.to_string();
                    for trait_item in tr.items.iter_mut() {
                        if let TraitItem::Fn(method) = trait_item {
                            if method.sig.constness.is_some() {
                                continue;
                            }
                            let ident = FunctionIdentity::method(
                                unit,
                                owner.clone(),
                                by_ref(&method.sig),
                                method.sig.ident.to_string(),
                            );
                            if let Some(block) = method.default.as_mut() {
                                self.body(&ident, block);
                            }
                        }
                    }
                }
                Item::Mod(module) => {
                    if let Some((_, content)) = &mut module.content {
                        let nested = format!("{}::{}", unit, module.ident);
                        self.items(&nested, content);
                    }
                }
                _ => {}
            }
        }
    }

    /// Probe `block` as the body of `ident`, then the closures inside it.
    fn body(&mut self, ident: &FunctionIdentity, block: &mut Block) {
        if !block.stmts.first().is_some_and(|s| self.is_probe(s)) {
            block.stmts.insert(0, self.probe(ident));
            self.inserted += 1;
        }
        let mut closures = ClosureWalker {
            owner: ident,
            count: 0,
            inserter: self,
        };
        closures.visit_block_mut(block);
    }
}

fn by_ref(sig: &syn::Signature) -> bool {
    matches!(sig.inputs.first(), Some(FnArg::Receiver(r)) if r.reference.is_some())
}

/// Numbers the closures directly inside one body and probes each of them.
struct ClosureWalker<'a> {
    owner: &'a FunctionIdentity,
    count: u32,
    inserter: &'a mut CollectorInserter,
}

impl VisitMut for ClosureWalker<'_> {
    fn visit_expr_closure_mut(&mut self, node: &mut ExprClosure) {
        self.count += 1;
        let ident = self.owner.closure(self.count);
        if !matches!(*node.body, Expr::Block(_)) {
            let body = &node.body;
            *node.body = Expr::Block(parse_quote!({ #body }));
        }
        if let Expr::Block(body) = &mut *node.body {
            self.inserter.body(&ident, &mut body.block);
        }
    }

    fn visit_item_mut(&mut self, _node: &mut Item) {}

    fn visit_macro_mut(&mut self, node: &mut Macro) {
        let mut exprs = macro_exprs(node);
        let before = self.inserter.inserted;
        for expr in &mut exprs {
            self.visit_expr_mut(expr);
        }
        if self.inserter.inserted > before {
            let tokens: TokenStream = quote!(#(#exprs),*);
            node.tokens = tokens;
        }
    }
}

/// Probe every function of one file. Returns the number of probes added.
pub fn insert_collector(unit: &mut ParsedUnit, run: u32, runtime: &str) -> usize {
    if unit.is_test_file {
        return 0;
    }
    let mut inserter = CollectorInserter::new(run, runtime);
    let module = unit.module_path.clone();
    inserter.items(&module, &mut unit.file.items);
    if inserter.inserted() > 0 {
        unit.modified = true;
        debug!("{}: {} collector probe(s)", unit.path.display(), inserter.inserted());
    }
    inserter.inserted()
}

/// Probe every non-test file of a tree.
pub fn insert_collector_tree(tree: &mut SourceTree, run: u32, runtime: &str) -> usize {
    tree.units
        .values_mut()
        .map(|unit| insert_collector(unit, run, runtime))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::project_loader::ProjectLoader;
    use std::path::PathBuf;

    fn unit(src: &str, is_test_file: bool) -> ParsedUnit {
        ParsedUnit {
            path: PathBuf::from("src/net.rs"),
            module_path: "demo::net".to_string(),
            source: src.to_string(),
            file: syn::parse_file(src).unwrap(),
            is_test_file,
            modified: false,
        }
    }

    const SRC: &str = r#"
pub struct Client;
impl Client {
    pub fn send(&self, data: &[u8]) -> usize {
        data.iter().map(|b| *b as usize).sum()
    }
}
pub fn run(c: &Client) {
    assert!(c.send(&[1]) > 0, "{}", (|| 2)());
    const fn limit() -> u8 { 3 }
}
const fn fixed() -> u8 { 1 }
"#;

    #[test]
    fn test_probes_functions_methods_and_closures() {
        let mut u = unit(SRC, false);
        assert_eq!(insert_collector(&mut u, 1, "difftrace"), 4);
        let out = ProjectLoader::render_unit(&u.file);
        assert!(out.contains(r#"difftrace::probe!(1u32, "(&demo::net::Client)::send");"#));
        assert!(out.contains(r#"difftrace::probe!(1u32, "(&demo::net::Client)::send$1");"#));
        assert!(out.contains(r#"difftrace::probe!(1u32, "demo::net::run");"#));
        assert!(out.contains(r#""demo::net::run$1""#));
        assert!(!out.contains("fixed\");"));
        assert!(u.modified);
    }

    #[test]
    fn test_insertion_is_idempotent() {
        let mut u = unit(SRC, false);
        insert_collector(&mut u, 0, "difftrace");
        let once = ProjectLoader::render_unit(&u.file);
        let mut again = unit(&once, false);
        assert_eq!(insert_collector(&mut again, 0, "difftrace"), 0);
        assert_eq!(ProjectLoader::render_unit(&again.file), once);
        assert!(!again.modified);
    }

    #[test]
    fn test_test_files_untouched() {
        let mut u = unit("fn helper() {}", true);
        assert_eq!(insert_collector(&mut u, 0, "difftrace"), 0);
        assert!(!u.modified);
    }
}
