//! Entry Point Detection Module
//!
//! Finds the roots reachability-based algorithms start from: `fn main`
//! (plain or under an async runtime attribute) and `#[test]` functions.

use std::path::PathBuf;

use syn::spanned::Spanned;
use syn::{Attribute, Item, ItemFn};

use crate::domain::identity::FunctionIdentity;
use crate::infrastructure::project_loader::ParsedUnit;

/// Represents a detected entry point in the codebase.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    pub identity: FunctionIdentity,
    /// Type of entry point
    pub kind: EntryPointKind,
    /// File where this entry point is defined
    pub file_path: PathBuf,
    pub line: Option<usize>,
}

/// Classification of entry point types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryPointKind {
    Main,      // fn main()
    AsyncMain, // #[tokio::main] async fn main()
    Test,      // #[test] fn ...
}

/// Entry point detector
pub struct EntryPointDetector {
    include_tests: bool,
}

impl EntryPointDetector {
    pub fn new(include_tests: bool) -> Self {
        Self { include_tests }
    }

    /// Detect entry points in one parsed file.
    pub fn detect(&self, unit: &ParsedUnit) -> Vec<EntryPoint> {
        let mut entries = Vec::new();
        for item in &unit.file.items {
            if let Item::Fn(func) = item {
                if func.sig.ident == "main" {
                    let kind = if func.sig.asyncness.is_some() {
                        EntryPointKind::AsyncMain
                    } else {
                        EntryPointKind::Main
                    };
                    entries.push(self.entry(unit, &unit.module_path, func, kind));
                }
            }
        }
        if self.include_tests {
            self.detect_tests(unit, &unit.module_path, &unit.file.items, &mut entries);
        }
        entries
    }

    fn detect_tests(&self, unit: &ParsedUnit, module: &str, items: &[Item], out: &mut Vec<EntryPoint>) {
        for item in items {
            match item {
                Item::Fn(func) if has_test_attr(&func.attrs) => {
                    out.push(self.entry(unit, module, func, EntryPointKind::Test));
                }
                Item::Mod(m) => {
                    if let Some((_, content)) = &m.content {
                        let nested = format!("{}::{}", module, m.ident);
                        self.detect_tests(unit, &nested, content, out);
                    }
                }
                _ => {}
            }
        }
    }

    fn entry(&self, unit: &ParsedUnit, module: &str, func: &ItemFn, kind: EntryPointKind) -> EntryPoint {
        EntryPoint {
            identity: FunctionIdentity::free(module, func.sig.ident.to_string()),
            kind,
            file_path: unit.path.clone(),
            line: Some(func.sig.ident.span().start().line).filter(|l| *l > 0),
        }
    }
}

/// `#[test]`, `#[tokio::test]` and friends.
pub fn has_test_attr(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path()
            .segments
            .last()
            .is_some_and(|seg| seg.ident == "test")
    })
}

/// `#[cfg(test)]`
pub fn is_cfg_test(attrs: &[Attribute]) -> bool {
    attrs.iter().any(|attr| {
        attr.path().is_ident("cfg")
            && attr
                .parse_args::<syn::Ident>()
                .is_ok_and(|ident| ident == "test")
    })
}

/// Line of any syntax node, 0 when unknown.
pub fn line_of<T: Spanned>(node: &T) -> usize {
    node.span().start().line
}
