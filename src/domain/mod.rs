// Core analysis: identities, graphs, the static builder, filtering, diffing
// and source rewriting.

pub mod builder;
pub mod callgraph;
pub mod closures;
pub mod collect;
pub mod diff;
pub mod entry_point;
pub mod filter;
pub mod identity;
pub mod index;
pub mod inject;
