//! One supervised backend child process.
//!
//! Wraps a child executable speaking line-delimited JSON-RPC on stdio.
//! Outgoing calls are marshalled from the host's request-id space into the
//! child's and back: every call allocates a monotonic integer id, parks a
//! one-shot waiter under it, and the reader task completes the waiter when
//! the matching response line arrives.
//!
//! Concurrency: a single reader task consumes stdout, a single writer task
//! owns stdin fed by an mpsc channel, and any number of callers may invoke
//! [`BackendProcess::execute_tool`] concurrently.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

use super::framing::LineFramer;
use crate::config::{self, BackendConfig, timing};
use crate::error::{BackendError, BackendResult};
use crate::protocol::{
    self, JsonRpcError, JsonRpcNotification, JsonRpcRequest, PROTOCOL_VERSION, codes,
};
use crate::tools::ToolDescriptor;

/// Request id reserved for the handshake; tool calls start at 1.
const INITIALIZE_ID: i64 = 0;

/// Capacity of the serialized write channel feeding the child's stdin.
const WRITE_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle state of a backend child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Starting,
    Ready,
    Failed,
    Stopped,
}

type Waiter = oneshot::Sender<Result<Value, JsonRpcError>>;

/// State shared between the public handle and the reader task.
struct Shared {
    backend_id: String,
    pending: Mutex<HashMap<i64, Waiter>>,
    /// Ids of timed-out or cancelled calls, kept to squelch the
    /// late-arrival warning when the child eventually answers.
    tombstones: Mutex<HashSet<i64>>,
    status: watch::Sender<BackendStatus>,
    tools: RwLock<BTreeMap<String, ToolDescriptor>>,
}

impl Shared {
    fn handle_line(&self, line: &[u8]) {
        let value: Value = match serde_json::from_slice(line) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) | Err(_) => {
                tracing::warn!(
                    backend = %self.backend_id,
                    line = %String::from_utf8_lossy(line),
                    "Discarding non-object line from backend"
                );
                return;
            }
        };

        // Requests and notifications initiated by the child (sampling,
        // roots, progress) are not supported; log and move on.
        if let Some(method) = value.get("method").and_then(Value::as_str) {
            tracing::debug!(
                backend = %self.backend_id,
                method = %method,
                "Ignoring backend-initiated message"
            );
            return;
        }

        let Some(id) = value.get("id").and_then(Value::as_i64) else {
            tracing::warn!(backend = %self.backend_id, "Discarding response without integer id");
            return;
        };

        let outcome = if let Some(error) = value.get("error") {
            // Forward the backend's error verbatim when well-formed.
            Err(serde_json::from_value::<JsonRpcError>(error.clone()).unwrap_or_else(|_| {
                JsonRpcError::with_data(
                    codes::TOOL_EXECUTION_FAILED,
                    "tool execution failed",
                    json!({ "original": error }),
                )
            }))
        } else if let Some(result) = value.get("result") {
            Ok(result.clone())
        } else {
            tracing::warn!(
                backend = %self.backend_id,
                id,
                "Discarding response with neither result nor error"
            );
            return;
        };

        let waiter = self.pending.lock().expect("lock poisoned").remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => {
                let tombstoned =
                    self.tombstones.lock().expect("lock poisoned").remove(&id);
                if !tombstoned {
                    tracing::warn!(backend = %self.backend_id, id, "Unmatched response id");
                }
            }
        }
    }

    /// Called once by the reader task when the child's stdout closes.
    fn mark_exited(&self) {
        let already_stopped = *self.status.borrow() == BackendStatus::Stopped;
        let _ = self.status.send(BackendStatus::Stopped);

        let drained: Vec<Waiter> = {
            let mut pending = self.pending.lock().expect("lock poisoned");
            pending.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            tracing::warn!(
                backend = %self.backend_id,
                count = drained.len(),
                "Backend exited with calls in flight"
            );
        }
        for tx in drained {
            let _ = tx.send(Err(JsonRpcError::new(
                codes::BACKEND_TERMINATED,
                "backend terminated",
            )));
        }
        if !already_stopped {
            tracing::info!(backend = %self.backend_id, "Backend exited");
        }
    }
}

/// Handle to one running backend child.
pub struct BackendProcess {
    shared: Arc<Shared>,
    next_request_id: AtomicI64,
    /// Sender feeding the writer task. Taken on stop, which closes the
    /// child's stdin once in-flight clones drain.
    outgoing: Mutex<Option<mpsc::Sender<String>>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl BackendProcess {
    /// Spawn the configured child and start its I/O tasks.
    ///
    /// The child's environment is replaced entirely by the configured `env`,
    /// with PATH inherited from the host unless the config overrides it.
    /// Does not perform the handshake; see [`Self::handshake`].
    pub async fn spawn(backend_id: &str, config: &BackendConfig) -> BackendResult<Self> {
        let program = config.command.as_deref().ok_or_else(|| BackendError::Spawn {
            backend_id: backend_id.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no command configured",
            ),
        })?;

        let mut cmd = Command::new(program);
        cmd.args(&config.args);
        cmd.env_clear();
        if let Ok(path) = std::env::var("PATH") {
            cmd.env("PATH", path);
        }
        cmd.envs(&config.env);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| BackendError::Spawn {
            backend_id: backend_id.to_string(),
            source,
        })?;

        let stdin = child.stdin.take().ok_or(BackendError::MissingPipe {
            backend_id: backend_id.to_string(),
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(BackendError::MissingPipe {
            backend_id: backend_id.to_string(),
            pipe: "stdout",
        })?;
        let stderr = child.stderr.take().ok_or(BackendError::MissingPipe {
            backend_id: backend_id.to_string(),
            pipe: "stderr",
        })?;

        let (status, _) = watch::channel(BackendStatus::Starting);
        let shared = Arc::new(Shared {
            backend_id: backend_id.to_string(),
            pending: Mutex::new(HashMap::new()),
            tombstones: Mutex::new(HashSet::new()),
            status,
            tools: RwLock::new(BTreeMap::new()),
        });

        // Stderr logger task.
        {
            let backend_id = backend_id.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(backend = %backend_id, "{line}");
                }
            });
        }

        // Writer task: sole owner of stdin, serializes all outgoing lines.
        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(WRITE_CHANNEL_CAPACITY);
        {
            let backend_id = backend_id.to_string();
            tokio::spawn(async move {
                let mut stdin = stdin;
                while let Some(line) = outgoing_rx.recv().await {
                    let write = async {
                        stdin.write_all(line.as_bytes()).await?;
                        stdin.write_all(b"\n").await?;
                        stdin.flush().await
                    };
                    if let Err(e) = write.await {
                        tracing::error!(backend = %backend_id, error = %e, "Stdin write failed");
                        break;
                    }
                }
                // Channel closed or pipe broken: dropping stdin closes it.
            });
        }

        // Reader task: sole consumer of stdout.
        {
            let shared = Arc::clone(&shared);
            let mut stdout = stdout;
            tokio::spawn(async move {
                let mut framer = LineFramer::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match stdout.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            framer.push(&chunk[..n]);
                            while let Some(line) = framer.next_line() {
                                if line.iter().all(u8::is_ascii_whitespace) {
                                    continue;
                                }
                                shared.handle_line(&line);
                            }
                        }
                    }
                }
                shared.mark_exited();
            });
        }

        Ok(Self {
            shared,
            next_request_id: AtomicI64::new(INITIALIZE_ID + 1),
            outgoing: Mutex::new(Some(outgoing_tx)),
            child: tokio::sync::Mutex::new(Some(child)),
        })
    }

    /// Perform the initialize handshake and discover tool schemas.
    ///
    /// Tool schemas are merged in increasing precedence: the static
    /// fallback table for well-known backends, the config-declared map,
    /// then whatever the initialize response advertises.
    pub async fn handshake(&self, config: &BackendConfig) -> BackendResult<()> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let request = JsonRpcRequest::new("initialize", Some(params), INITIALIZE_ID);
        let line = protocol::encode(&request)?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("lock poisoned")
            .insert(INITIALIZE_ID, tx);

        if let Err(e) = self.send_line(line).await {
            self.fail();
            return Err(e);
        }

        let result = match tokio::time::timeout(timing::HANDSHAKE_TIMEOUT, rx).await {
            Err(_) => {
                self.shared
                    .pending
                    .lock()
                    .expect("lock poisoned")
                    .remove(&INITIALIZE_ID);
                self.fail();
                return Err(BackendError::HandshakeTimeout {
                    backend_id: self.backend_id().to_string(),
                    timeout: timing::HANDSHAKE_TIMEOUT,
                });
            }
            Ok(Err(_)) => {
                self.fail();
                return Err(BackendError::handshake(
                    self.backend_id(),
                    "backend exited during handshake",
                ));
            }
            Ok(Ok(Err(rpc_error))) => {
                self.fail();
                return Err(BackendError::handshake(
                    self.backend_id(),
                    format!("initialize returned error {}: {}", rpc_error.code, rpc_error.message),
                ));
            }
            Ok(Ok(Ok(result))) => result,
        };

        let mut tools = BTreeMap::new();
        if let Some(fallback) = config::static_tool_schemas(self.backend_id()) {
            for (name, spec) in &fallback {
                tools.insert(name.clone(), spec.descriptor(name));
            }
        }
        for (name, spec) in &config.tools {
            tools.insert(name.clone(), spec.descriptor(name));
        }
        if let Some(discovered) = result
            .pointer("/capabilities/tools")
            .and_then(Value::as_object)
        {
            for (name, entry) in discovered {
                // Capability markers like listChanged are not tools.
                let Some(entry) = entry.as_object() else { continue };
                let description = entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input_schema = entry
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
                tools.insert(
                    name.clone(),
                    ToolDescriptor { name: name.clone(), description, input_schema },
                );
            }
        }

        tracing::info!(
            backend = %self.backend_id(),
            tools = tools.len(),
            "Backend ready"
        );
        *self.shared.tools.write().expect("lock poisoned") = tools;
        let _ = self.shared.status.send(BackendStatus::Ready);
        Ok(())
    }

    /// Invoke a tool on the child and await its result.
    ///
    /// Frames the call as `tools/call` with `{name, arguments}` regardless
    /// of which client-facing alias triggered it. Subject to the 60 s call
    /// deadline; a timed-out id is tombstoned so the late reply does not
    /// warn. Dropping the returned future cancels the call: the waiter is
    /// released with `ClientCancelled` and a best-effort `$/cancelRequest`
    /// notification goes to the child.
    pub async fn execute_tool(
        &self,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, JsonRpcError> {
        if self.status() != BackendStatus::Ready {
            return Err(JsonRpcError::new(
                codes::SERVER_NOT_FOUND,
                format!("backend '{}' is not running", self.backend_id()),
            ));
        }

        let id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({ "name": tool, "arguments": arguments })),
            id,
        );
        let line = protocol::encode(&request).map_err(|e| {
            JsonRpcError::with_data(
                codes::INTERNAL_ERROR,
                "Internal error",
                json!({ "detail": e.to_string() }),
            )
        })?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("lock poisoned")
            .insert(id, tx);

        // Armed before the first await so a dropped caller always releases
        // the parked waiter.
        let mut guard = CallGuard {
            shared: Arc::clone(&self.shared),
            outgoing: self.outgoing.lock().expect("lock poisoned").clone(),
            id,
            armed: true,
        };

        if self.send_line(line).await.is_err() {
            guard.disarm();
            self.shared.pending.lock().expect("lock poisoned").remove(&id);
            return Err(JsonRpcError::new(codes::BACKEND_TERMINATED, "backend terminated"));
        }

        match tokio::time::timeout(timing::RPC_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => {
                guard.disarm();
                outcome
            }
            Ok(Err(_)) => {
                guard.disarm();
                Err(JsonRpcError::new(codes::BACKEND_TERMINATED, "backend terminated"))
            }
            Err(_) => {
                guard.disarm();
                self.shared.pending.lock().expect("lock poisoned").remove(&id);
                self.shared.tombstones.lock().expect("lock poisoned").insert(id);
                Err(JsonRpcError::with_data(
                    codes::TOOL_TIMEOUT,
                    "tool call timed out",
                    json!({ "backend_id": self.backend_id(), "request_id": id }),
                ))
            }
        }
    }

    /// Graceful shutdown: shutdown notification, close stdin, wait up to
    /// the grace period, then kill.
    pub async fn stop(&self) -> BackendResult<()> {
        let taken = self.outgoing.lock().expect("lock poisoned").take();
        if let Some(tx) = taken {
            let shutdown = JsonRpcNotification::new("shutdown", None);
            if let Ok(line) = protocol::encode(&shutdown) {
                let _ = tx.send(line).await;
            }
            // Dropping the last sender ends the writer task, closing stdin.
        }

        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            match tokio::time::timeout(timing::SHUTDOWN_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::warn!(
                        backend = %self.backend_id(),
                        "Backend ignored shutdown, killing"
                    );
                    let _ = child.kill().await;
                }
            }
        }
        *slot = None;
        let _ = self.shared.status.send(BackendStatus::Stopped);
        Ok(())
    }

    async fn send_line(&self, line: String) -> BackendResult<()> {
        let tx = self
            .outgoing
            .lock()
            .expect("lock poisoned")
            .clone()
            .ok_or_else(|| BackendError::NotRunning {
                backend_id: self.backend_id().to_string(),
            })?;
        tx.send(line).await.map_err(|_| BackendError::NotRunning {
            backend_id: self.backend_id().to_string(),
        })
    }

    fn fail(&self) {
        let _ = self.shared.status.send(BackendStatus::Failed);
    }

    #[must_use]
    pub fn backend_id(&self) -> &str {
        &self.shared.backend_id
    }

    #[must_use]
    pub fn status(&self) -> BackendStatus {
        *self.shared.status.borrow()
    }

    /// Watch channel for lifecycle transitions, used by the pool's
    /// restart supervisor.
    #[must_use]
    pub fn status_stream(&self) -> watch::Receiver<BackendStatus> {
        self.shared.status.subscribe()
    }

    /// Tools this backend advertises, in name order.
    #[must_use]
    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.shared
            .tools
            .read()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of in-flight calls (diagnostics and tests).
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.lock().expect("lock poisoned").len()
    }
}

impl std::fmt::Debug for BackendProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendProcess")
            .field("backend_id", &self.backend_id())
            .field("status", &self.status())
            .finish()
    }
}

/// Releases a parked waiter if the calling future is dropped mid-call.
struct CallGuard {
    shared: Arc<Shared>,
    outgoing: Option<mpsc::Sender<String>>,
    id: i64,
    armed: bool,
}

impl CallGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let waiter = self.shared.pending.lock().expect("lock poisoned").remove(&self.id);
        if let Some(tx) = waiter {
            let _ = tx.send(Err(JsonRpcError::new(codes::CLIENT_CANCELLED, "client cancelled")));
        }
        self.shared.tombstones.lock().expect("lock poisoned").insert(self.id);
        if let Some(tx) = &self.outgoing {
            let cancel =
                JsonRpcNotification::new("$/cancelRequest", Some(json!({ "id": self.id })));
            if let Ok(line) = protocol::encode(&cancel) {
                let _ = tx.try_send(line);
            }
        }
    }
}
