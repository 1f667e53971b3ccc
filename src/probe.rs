//! Probe runtime linked into instrumented crates.
//!
//! `difftrace::probe!(run, "identity")` pushes the function onto a
//! thread-local shadow stack for the rest of the enclosing block and reports
//! the resulting call chain to the collector.

use std::cell::RefCell;
use std::sync::OnceLock;

use crate::api::client;
use crate::api::dto::collector_addr;
use crate::domain::callgraph::CallChain;

thread_local! {
    static STACK: RefCell<Vec<&'static str>> = const { RefCell::new(Vec::new()) };
}

static ADDR: OnceLock<String> = OnceLock::new();

/// Pops its frame when dropped.
#[must_use]
pub struct Frame {
    depth: usize,
}

/// Enter `identity`. A report the collector does not acknowledge aborts the
/// caller: an incomplete dynamic graph would corrupt the diff.
pub fn enter(run: u32, identity: &'static str) -> Frame {
    let (depth, chain) = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(identity);
        (stack.len(), CallChain::from_stack(&stack[..]))
    });
    let frame = Frame { depth };
    if !chain.is_empty() {
        let addr = ADDR.get_or_init(collector_addr);
        if let Err(e) = client::send_stack(addr, run, &chain) {
            panic!("difftrace: failed to report call chain of {}: {}", identity, e);
        }
    }
    frame
}

/// Current shadow stack of this thread, outermost first.
pub fn current_stack() -> Vec<&'static str> {
    STACK.with(|stack| stack.borrow().clone())
}

impl Drop for Frame {
    fn drop(&mut self) {
        let _ = STACK.try_with(|stack| {
            if let Ok(mut stack) = stack.try_borrow_mut() {
                stack.truncate(self.depth.saturating_sub(1));
            }
        });
    }
}

/// Report the enclosing function to the collector; see [`enter`].
#[macro_export]
macro_rules! probe {
    ($run:expr, $identity:expr) => {
        let _difftrace_frame = $crate::probe::enter($run, $identity);
    };
}
