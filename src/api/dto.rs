use serde::{Deserialize, Serialize};

use crate::domain::callgraph::{CallChain, CallGraph};

/// Where probes report when nothing else is configured.
pub const DEFAULT_COLLECTOR_ADDR: &str = "127.0.0.1:9998";
/// Overrides the collector endpoint for probes and the test runner.
pub const ENV_COLLECTOR_ADDR: &str = "DIFFTRACE_COLLECTOR_ADDR";

pub const CMD_PING: &str = "PING";
pub const CMD_REPORT_STACK: &str = "REPORT_STACK";
pub const CMD_TAKE: &str = "TAKE";

/// The collector endpoint from the environment, else the default.
pub fn collector_addr() -> String {
    std::env::var(ENV_COLLECTOR_ADDR).unwrap_or_else(|_| DEFAULT_COLLECTOR_ADDR.to_string())
}

/// One newline-terminated request line.
#[derive(Debug, Serialize, Deserialize)]
pub struct CommandReq {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl CommandReq {
    pub fn ping() -> Self {
        Self {
            command: CMD_PING.to_string(),
            params: None,
        }
    }

    pub fn report_stack(run: u32, chain: &CallChain) -> serde_json::Result<Self> {
        let params = ReportStackParams {
            run,
            chain: chain.clone(),
        };
        Ok(Self {
            command: CMD_REPORT_STACK.to_string(),
            params: Some(serde_json::to_value(params)?),
        })
    }

    pub fn take(run: u32) -> serde_json::Result<Self> {
        Ok(Self {
            command: CMD_TAKE.to_string(),
            params: Some(serde_json::to_value(TakeParams { run })?),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportStackParams {
    pub run: u32,
    pub chain: CallChain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeParams {
    pub run: u32,
}

/// One newline-terminated response line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResp {
    Success { data: serde_json::Value },
    Error { message: String },
}

/// A run's graph as returned by `TAKE`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDto {
    pub run: u32,
    pub edges: CallGraph,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let chain = CallChain::from_stack(&["demo::main", "demo::run"]);
        let req = CommandReq::report_stack(0, &chain).unwrap();
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"command": "REPORT_STACK", "params": {"run": 0, "chain": {"demo::run": "demo::main"}}})
        );
        assert_eq!(serde_json::to_string(&CommandReq::ping()).unwrap(), r#"{"command":"PING"}"#);

        let ok: CommandResp = serde_json::from_str(r#"{"status":"success","data":true}"#).unwrap();
        assert_eq!(ok, CommandResp::Success { data: json!(true) });
        let err: CommandResp = serde_json::from_str(r#"{"status":"error","message":"boom"}"#).unwrap();
        assert_eq!(err, CommandResp::Error { message: "boom".into() });
    }
}
