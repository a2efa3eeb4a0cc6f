use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{anyhow, bail, Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{body, Body, Method, Request, Response, Server, StatusCode};
use rollstream::{Block, PendingTxObservation, TxEffect};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Scriptable rollup chain served over the mock JSON-RPC server. Reorgs are
/// expressed by regenerating every block above the fork height with a fresh
/// salt, exactly as a node switching branches would present them.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<RwLock<MockChainInner>>,
    tip_limit: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
}

struct MockChainInner {
    by_height: HashMap<u64, Block>,
    pending: Vec<PendingTxObservation>,
    mangled: HashSet<u64>,
}

fn build_block(height: u64, parent_hash: &str, salt: u64) -> Block {
    Block {
        hash: format!("0x{salt:02x}b{height:06x}").into(),
        height,
        parent_hash: parent_hash.into(),
        protocol_version: 1 + salt,
        effects: vec![TxEffect {
            tx_hash: format!("0x{salt:02x}t{height:06x}").into(),
            effect_hash: format!("0x{salt:02x}e{height:06x}").into(),
        }],
        orphan: None,
    }
}

impl MockChain {
    pub fn new(length: u64) -> Self {
        let mut by_height = HashMap::new();
        let mut previous = "0x".to_owned();

        for height in 0..length {
            let block = build_block(height, &previous, 0);
            previous = block.hash.to_string();
            by_height.insert(height, block);
        }

        Self {
            inner: Arc::new(RwLock::new(MockChainInner {
                by_height,
                pending: Vec::new(),
                mangled: HashSet::new(),
            })),
            tip_limit: Arc::new(AtomicU64::new(length.saturating_sub(1))),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn best_height(&self) -> u64 {
        self.tip_limit.load(Ordering::SeqCst)
    }

    pub fn max_height(&self) -> u64 {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .by_height
            .keys()
            .copied()
            .max()
            .unwrap_or(0)
    }

    pub fn set_tip_limit(&self, limit: u64) {
        let clamped = limit.min(self.max_height());
        self.tip_limit.store(clamped, Ordering::SeqCst);
    }

    pub fn advance_tip_by(&self, delta: u64) -> u64 {
        let max_height = self.max_height();
        let current = self.tip_limit.load(Ordering::SeqCst);
        let next = current.saturating_add(delta).min(max_height);
        self.tip_limit.store(next, Ordering::SeqCst);
        next
    }

    pub fn set_pending(&self, txs: Vec<PendingTxObservation>) {
        self.inner.write().expect("mock chain poisoned").pending = txs;
    }

    /// Serves a structurally invalid payload for the block at `height` until
    /// [`heal_block`](Self::heal_block) is called.
    pub fn mangle_block(&self, height: u64) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .mangled
            .insert(height);
    }

    pub fn heal_block(&self, height: u64) {
        self.inner
            .write()
            .expect("mock chain poisoned")
            .mangled
            .remove(&height);
    }

    fn is_mangled(&self, height: u64) -> bool {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .mangled
            .contains(&height)
    }

    pub fn tx_hash_at(&self, height: u64) -> Option<String> {
        let inner = self.inner.read().expect("mock chain poisoned");
        inner
            .by_height
            .get(&height)
            .and_then(|block| block.effects.first())
            .map(|effect| effect.tx_hash.to_string())
    }

    /// Replaces every block above `fork_height` with a fresh branch of
    /// `new_suffix_len` blocks rooted at the kept block.
    pub fn force_reorg(&self, fork_height: u64, new_suffix_len: u64) -> Result<()> {
        if new_suffix_len == 0 {
            bail!("new_suffix_len must be greater than zero");
        }

        let mut inner = self.inner.write().expect("mock chain poisoned");
        let salt = self.epoch.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        let mut previous = inner
            .by_height
            .get(&fork_height)
            .map(|block| block.hash.to_string())
            .ok_or_else(|| anyhow!("cannot reorg: missing fork height {fork_height}"))?;

        let stale: Vec<u64> = inner
            .by_height
            .keys()
            .copied()
            .filter(|height| *height > fork_height)
            .collect();
        for height in stale {
            inner.by_height.remove(&height);
        }

        for offset in 1..=new_suffix_len {
            let height = fork_height.saturating_add(offset);
            let block = build_block(height, &previous, salt);
            previous = block.hash.to_string();
            inner.by_height.insert(height, block);
        }

        let new_max = fork_height.saturating_add(new_suffix_len);
        self.tip_limit.store(new_max, Ordering::SeqCst);
        Ok(())
    }

    fn chain_height(&self) -> u64 {
        self.tip_limit.load(Ordering::SeqCst)
    }

    fn block_at(&self, height: u64) -> Option<Block> {
        if height > self.tip_limit.load(Ordering::SeqCst) {
            return None;
        }
        self.inner
            .read()
            .expect("mock chain poisoned")
            .by_height
            .get(&height)
            .cloned()
    }

    fn pending(&self) -> Vec<PendingTxObservation> {
        self.inner
            .read()
            .expect("mock chain poisoned")
            .pending
            .clone()
    }
}

pub struct MockRpcServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockRpcServer {
    pub async fn start(chain: MockChain) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock RPC listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| serve_request(chain.clone(), req))) }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock RPC server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(chain: MockChain, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::from("Unsupported method"));
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return Ok(response);
    }

    let bytes = match body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("failed to read body: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let payload: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(err) => {
            let mut response = Response::new(Body::from(format!("invalid JSON payload: {err}")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return Ok(response);
        }
    };

    let response_value = if payload.is_array() {
        Value::Array(
            payload
                .as_array()
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|call| handle_call(&chain, call))
                .collect(),
        )
    } else {
        handle_call(&chain, payload)
    };

    let mut response = Response::new(Body::from(response_value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    Ok(response)
}

fn handle_call(chain: &MockChain, call: Value) -> Value {
    let id = call.get("id").cloned().unwrap_or(Value::Null);
    let method = call
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let params = call
        .get("params")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));

    match method.as_str() {
        "node_getChainHeight" => success(id, json!(chain.chain_height())),
        "node_getBlock" => {
            let height = params
                .as_array()
                .and_then(|arr| arr.first())
                .and_then(Value::as_u64);
            match height {
                Some(height) => match chain.block_at(height) {
                    Some(block) if chain.is_mangled(height) => {
                        // A block the node claims to have but whose payload
                        // does not deserialize.
                        success(id, json!({ "hash": 7, "height": block.height }))
                    }
                    Some(block) => match serde_json::to_value(&block) {
                        Ok(value) => success(id, value),
                        Err(err) => error(id, -32603, format!("serialization failed: {err}")),
                    },
                    None => success(id, Value::Null),
                },
                None => error(id, -32602, "missing height parameter"),
            }
        }
        "node_getPendingTransactions" => match serde_json::to_value(chain.pending()) {
            Ok(value) => success(id, value),
            Err(err) => error(id, -32603, format!("serialization failed: {err}")),
        },
        _ => error(id, -32601, format!("unknown method {method}")),
    }
}

fn success(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    })
}

fn error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}
