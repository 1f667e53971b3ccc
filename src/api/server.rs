//! Dynamic trace collector: a local TCP listener that folds the call chains
//! reported by probes into one call graph per run.
//!
//! Connection handlers never touch the graphs; they forward reports over a
//! channel to a single owner thread.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::api::dto::{
    CommandReq, CommandResp, GraphDto, ReportStackParams, TakeParams, CMD_PING, CMD_REPORT_STACK, CMD_TAKE,
};
use crate::domain::callgraph::{CallChain, CallGraph};

enum Message {
    Report { run: u32, chain: CallChain },
    Take { run: u32, reply: Sender<CallGraph> },
    Stop,
}

pub struct Collector {
    addr: SocketAddr,
    tx: Sender<Message>,
    stopping: Arc<AtomicBool>,
    accept: Option<JoinHandle<()>>,
    owner: Option<JoinHandle<()>>,
}

impl Collector {
    /// Bind `addr` and start serving. Port 0 picks a free port; see
    /// [`Collector::local_addr`].
    pub fn start(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).with_context(|| format!("Failed to bind to {}", addr))?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();
        let stopping = Arc::new(AtomicBool::new(false));

        let owner = thread::Builder::new()
            .name("difftrace-collector".into())
            .spawn(move || own_graphs(rx))?;

        let accept_tx = tx.clone();
        let accept_stop = Arc::clone(&stopping);
        let accept = thread::Builder::new()
            .name("difftrace-accept".into())
            .spawn(move || accept_loop(listener, accept_tx, accept_stop))?;

        info!("Collector listening on {}", addr);
        Ok(Self {
            addr,
            tx,
            stopping,
            accept: Some(accept),
            owner: Some(owner),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Remove and return everything collected for `run`.
    pub fn take(&self, run: u32) -> Result<CallGraph> {
        let (reply, rx) = mpsc::channel();
        self.tx
            .send(Message::Take { run, reply })
            .map_err(|_| anyhow!("collector has stopped"))?;
        rx.recv().context("collector has stopped")
    }

    /// Block until the listener stops (it only does on [`Collector::shutdown`]).
    pub fn join(mut self) -> Result<()> {
        if let Some(accept) = self.accept.take() {
            accept.join().map_err(|_| anyhow!("accept thread panicked"))?;
        }
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake the blocking accept.
        let _ = TcpStream::connect(self.addr);
        if let Some(accept) = self.accept.take() {
            let _ = accept.join();
        }
        let _ = self.tx.send(Message::Stop);
        if let Some(owner) = self.owner.take() {
            let _ = owner.join();
        }
        info!("Collector on {} stopped", self.addr);
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn own_graphs(rx: Receiver<Message>) {
    let mut graphs: HashMap<u32, CallGraph> = HashMap::new();
    for message in rx {
        match message {
            Message::Report { run, chain } => {
                let added = graphs.entry(run).or_default().add_chain(&chain);
                debug!("run {}: {} new edge(s)", run, added);
            }
            Message::Take { run, reply } => {
                let _ = reply.send(graphs.remove(&run).unwrap_or_default());
            }
            Message::Stop => break,
        }
    }
}

fn accept_loop(listener: TcpListener, tx: Sender<Message>, stopping: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let tx = tx.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, tx) {
                        warn!("Collector connection error: {}", e);
                    }
                });
            }
            Err(e) => warn!("Collector accept error: {}", e),
        }
    }
}

fn handle_connection(mut stream: TcpStream, tx: Sender<Message>) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match process_command(trimmed, &tx) {
            Ok(data) => CommandResp::Success { data },
            Err(e) => CommandResp::Error { message: e.to_string() },
        };
        let response = serde_json::to_string(&response)?;
        stream.write_all(response.as_bytes())?;
        stream.write_all(b"\n")?;
    }
    Ok(())
}

fn process_command(json_str: &str, tx: &Sender<Message>) -> Result<serde_json::Value> {
    let req: CommandReq = serde_json::from_str(json_str).context("Invalid JSON format")?;
    let params = || req.params.clone().ok_or_else(|| anyhow!("Missing params for {}", req.command));

    match req.command.as_str() {
        CMD_PING => Ok(json!("PONG")),
        CMD_REPORT_STACK => {
            let ReportStackParams { run, chain } = serde_json::from_value(params()?)?;
            tx.send(Message::Report { run, chain })
                .map_err(|_| anyhow!("collector has stopped"))?;
            Ok(json!(true))
        }
        CMD_TAKE => {
            let TakeParams { run } = serde_json::from_value(params()?)?;
            let (reply, rx) = mpsc::channel();
            tx.send(Message::Take { run, reply })
                .map_err(|_| anyhow!("collector has stopped"))?;
            let edges = rx.recv().context("collector has stopped")?;
            Ok(serde_json::to_value(GraphDto { run, edges })?)
        }
        other => bail!("Unknown command: {}", other),
    }
}
