//! Synchronous collector client used by the probe runtime and the CLI.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use crate::api::dto::{CommandReq, CommandResp, GraphDto};
use crate::common::error::ReportError;
use crate::domain::callgraph::{CallChain, CallGraph};

fn request(addr: &str, req: &CommandReq) -> Result<serde_json::Value, ReportError> {
    let mut stream = TcpStream::connect(addr).map_err(|source| ReportError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    let line = serde_json::to_string(req)?;
    stream.write_all(line.as_bytes())?;
    stream.write_all(b"\n")?;

    let mut response = String::new();
    BufReader::new(&stream).read_line(&mut response)?;
    match serde_json::from_str(response.trim())? {
        CommandResp::Success { data } => Ok(data),
        CommandResp::Error { message } => Err(ReportError::Remote(message)),
    }
}

/// Report one observed call chain for `run`.
pub fn send_stack(addr: &str, run: u32, chain: &CallChain) -> Result<bool, ReportError> {
    let data = request(addr, &CommandReq::report_stack(run, chain)?)?;
    Ok(data.as_bool().unwrap_or(false))
}

pub fn ping(addr: &str) -> Result<bool, ReportError> {
    let data = request(addr, &CommandReq::ping())?;
    Ok(data.as_str() == Some("PONG"))
}

/// Fetch and clear a run's graph from a standalone collector.
pub fn take_graph(addr: &str, run: u32) -> Result<CallGraph, ReportError> {
    let data = request(addr, &CommandReq::take(run)?)?;
    let dto: GraphDto = serde_json::from_value(data)?;
    Ok(dto.edges)
}
