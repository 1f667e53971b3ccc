// Infrastructure implementations for difftrace.

pub mod concurrency;
pub mod mutation;
pub mod project_loader;
pub mod test_runner;
