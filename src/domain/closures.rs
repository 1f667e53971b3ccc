//! Positional naming of anonymous functions.
//!
//! Closures have no name in source, so both the builder and the injector
//! address them by position: the N-th closure found directly in a function
//! body (not inside another closure, not inside a nested item) is
//! `enclosing$N`, its own closures `enclosing$N$M`, and so on. Both walkers
//! must count in the same order, which is syn's visit order with macro
//! arguments parsed as comma-separated expressions.

use proc_macro2::LineColumn;
use syn::punctuated::Punctuated;
use syn::visit::Visit;
use syn::{Block, Expr, ExprClosure, Item, Macro, Token};

/// Expressions inside a macro call, when its tokens parse as a
/// comma-separated expression list (`println!`, `assert!`, `vec!`, ...).
pub fn macro_exprs(mac: &Macro) -> Vec<Expr> {
    mac.parse_body_with(Punctuated::<Expr, Token![,]>::parse_terminated)
        .map(|list| list.into_iter().collect())
        .unwrap_or_default()
}

/// Source position of every closure directly inside `block`, in ordinal
/// order: entry `N - 1` is where `enclosing$N` starts.
pub fn direct_closure_starts(block: &Block) -> Vec<LineColumn> {
    struct Starts(Vec<LineColumn>);

    impl<'ast> Visit<'ast> for Starts {
        fn visit_expr_closure(&mut self, node: &'ast ExprClosure) {
            self.0.push(closure_start(node));
        }

        fn visit_item(&mut self, _node: &'ast Item) {}

        fn visit_macro(&mut self, node: &'ast Macro) {
            for expr in macro_exprs(node) {
                self.visit_expr(&expr);
            }
        }
    }

    let mut starts = Starts(Vec::new());
    starts.visit_block(block);
    starts.0
}

/// Where a closure literal begins: its opening `|`.
pub fn closure_start(node: &ExprClosure) -> LineColumn {
    node.or1_token.spans[0].start()
}

/// Whether a macro path ends in `name` (`warn!`, `tracing::warn!`).
pub fn macro_named(mac: &Macro, name: &str) -> bool {
    mac.path
        .segments
        .last()
        .is_some_and(|seg| seg.ident == name)
}
