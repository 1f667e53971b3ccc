/// Rendered call graphs of an on-disk crate, per algorithm and filter.
use difftrace::application::AnalyzeUsecase;
use difftrace::common::config::Config;
use difftrace::domain::builder::{build_call_graph, Algorithm, BuildRequest};
use difftrace::domain::filter::{render, RenderOpts};
use difftrace::infrastructure::concurrency::TaskGroup;
use difftrace::infrastructure::project_loader::ProjectLoader;
use tempfile::{tempdir, TempDir};

const LIB: &str = r#"
pub mod net;

pub trait Codec {
    fn encode(&self, x: u32) -> Vec<u8>;
}

pub struct Plain;
pub struct Zipped;

impl Codec for Plain {
    fn encode(&self, x: u32) -> Vec<u8> {
        x.to_le_bytes().to_vec()
    }
}

impl Codec for Zipped {
    fn encode(&self, x: u32) -> Vec<u8> {
        net::frame(x)
    }
}

pub fn send(codec: &dyn Codec, x: u32) -> usize {
    let bytes = codec.encode(x);
    net::write(&bytes)
}
"#;

const NET: &str = r#"
pub fn frame(x: u32) -> Vec<u8> {
    let out = vec![x as u8];
    std::mem::drop(x);
    out
}

pub fn write(bytes: &[u8]) -> usize {
    checksum(bytes);
    bytes.len()
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |a, b| a ^ b)
}
"#;

fn fixture() -> TempDir {
    let dir = tempdir().unwrap();
    let root = dir.path();
    ProjectLoader::create_file(&root.join("Cargo.toml"), b"[package]\nname = \"demo\"\n").unwrap();
    ProjectLoader::create_file(&root.join("src/lib.rs"), LIB.as_bytes()).unwrap();
    ProjectLoader::create_file(&root.join("src/net.rs"), NET.as_bytes()).unwrap();
    dir
}

fn analyzer(f: impl FnOnce(&mut Config)) -> AnalyzeUsecase {
    let mut config = Config::default();
    config.analysis.algorithm = "static".to_string();
    f(&mut config);
    AnalyzeUsecase::new(&config).unwrap()
}

#[test]
fn test_cha_graph_contains_static_graph() {
    let dir = fixture();
    let stat = analyzer(|_| {}).graph(dir.path(), &[]).unwrap();
    let cha = analyzer(|c| c.analysis.algorithm = "cha".to_string())
        .graph(dir.path(), &[])
        .unwrap();

    assert!(stat.description("demo::send", "demo::net::write").is_some());
    for (caller, callee, _) in stat.iter() {
        assert!(cha.description(caller, callee).is_some(), "missing {caller} -> {callee}");
    }
    assert!(cha.edge_count() > stat.edge_count());
}

#[test]
fn test_filters_apply_to_rendered_graph() {
    let dir = fixture();
    let all = analyzer(|c| c.render.nostd = false).graph(dir.path(), &[]).unwrap();
    let nostd = analyzer(|_| {}).graph(dir.path(), &[]).unwrap();
    assert!(all.description("demo::net::frame", "std::mem::drop").is_some());
    assert!(nostd.iter().all(|(_, callee, _)| !callee.starts_with("std::")));

    let public = analyzer(|c| c.render.nointer = true).graph(dir.path(), &[]).unwrap();
    assert!(nostd.description("demo::net::write", "demo::net::checksum").is_some());
    assert!(public.description("demo::net::write", "demo::net::checksum").is_none());

    let focused = analyzer(|c| c.render.focus = "demo::net".to_string())
        .graph(dir.path(), &[])
        .unwrap();
    assert!(focused.description("demo::net::write", "demo::net::checksum").is_some());
    // semi-focused: the callee is in focus
    assert!(focused.description("demo::send", "demo::net::write").is_some());
}

#[test]
fn test_rendered_pairs_are_unique() {
    let dir = fixture();
    let raw = build_call_graph(&BuildRequest {
        root: dir.path().to_path_buf(),
        entries: Vec::new(),
        include_tests: false,
        algorithm: Algorithm::Cha,
    })
    .unwrap();
    let tasks = TaskGroup::new(3).unwrap();
    let edges = render(&raw, "demo", &RenderOpts::default(), &tasks);
    let mut pairs: Vec<(&str, &str)> = edges.iter().map(|e| (e.caller.as_str(), e.callee.as_str())).collect();
    let total = pairs.len();
    pairs.sort();
    pairs.dedup();
    assert_eq!(pairs.len(), total);
}

#[test]
fn test_library_without_roots_needs_static_or_cha() {
    let dir = fixture();
    let err = analyzer(|c| c.analysis.algorithm = "rta".to_string())
        .graph(dir.path(), &[])
        .unwrap_err();
    assert!(format!("{:#}", err).contains("no entry packages"));
}
