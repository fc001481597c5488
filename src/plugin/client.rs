//! Host side of the channel.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::core::constants::{
    DEFAULT_CALL_TIMEOUT_MS, DEFAULT_HANDSHAKE_TIMEOUT_MS, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE,
    PROTOCOL_VERSION, PROTOCOL_VERSIONS_KEY,
};
use crate::core::options::Options;
use crate::core::types::{BlobInfo, WrapperConfig, WrapperType};
use crate::core::wrapper::{require_blob, require_plaintext, Wrapper};
use crate::error::{Result, TransportError};
use crate::plugin::protocol::{write_frame, Call, FrameId, Hello, Reply, Request, Response};
use crate::plugin::PluginState;

/// How long `close` waits for the child to exit on its own.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const EXIT_POLL: Duration = Duration::from_millis(10);

type Waiter = mpsc::Sender<Result<Reply>>;

/// Configures and launches a plugin process.
#[derive(Debug)]
pub struct PluginBuilder {
    command: Command,
    handshake_timeout: Duration,
    call_timeout: Duration,
}

impl PluginBuilder {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            handshake_timeout: Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT_MS),
        }
    }

    /// Maximum wait for the hello frame.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Deadline for calls whose options carry no timeout.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Spawn the plugin and complete the handshake.
    ///
    /// # Errors
    ///
    /// `TransportError::Spawn` if the process can't be started, or
    /// `TransportError::Handshake` if it exits, stalls, or speaks another
    /// protocol before the hello frame is read. The child is killed in
    /// either handshake case.
    pub fn start(mut self) -> Result<PluginClient> {
        let shared = Arc::new(Shared::new());
        shared.set_state(PluginState::Handshaking);

        self.command
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .env(PROTOCOL_VERSIONS_KEY, PROTOCOL_VERSION.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(e) => {
                shared.terminate();
                return Err(TransportError::Spawn(e).into());
            }
        };
        debug!(pid = child.id(), "plugin spawned");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            spawn_named("kmswrap-plugin-stderr", move || forward_stderr(stderr));
        }

        let Some(stdout) = stdout else {
            return Err(abort(&mut child, &shared, "plugin stdout was not captured".into()));
        };

        let (hello_tx, hello_rx) = mpsc::channel();
        let reader_shared = Arc::clone(&shared);
        spawn_named("kmswrap-plugin-reader", move || {
            read_loop(stdout, hello_tx, &reader_shared)
        });

        let hello = match hello_rx.recv_timeout(self.handshake_timeout) {
            Ok(Ok(hello)) => hello,
            Ok(Err(reason)) => return Err(abort(&mut child, &shared, reason)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let reason = format!(
                    "no hello within {}ms",
                    self.handshake_timeout.as_millis()
                );
                return Err(abort(&mut child, &shared, reason));
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                let reason = "plugin exited before completing the handshake".to_string();
                return Err(abort(&mut child, &shared, reason));
            }
        };

        if hello.protocol_version != PROTOCOL_VERSION {
            let reason = format!(
                "plugin speaks protocol {}, host speaks {}",
                hello.protocol_version, PROTOCOL_VERSION
            );
            return Err(abort(&mut child, &shared, reason));
        }

        let Some(stdin) = stdin else {
            return Err(abort(&mut child, &shared, "plugin stdin was not captured".into()));
        };
        let (outbox_tx, outbox_rx) = mpsc::channel();
        let writer_shared = Arc::clone(&shared);
        spawn_named("kmswrap-plugin-writer", move || {
            write_loop(stdin, outbox_rx, &writer_shared)
        });

        *shared.outbox.lock() = Some(outbox_tx);
        shared.set_state(PluginState::Ready);
        debug!(wrapper = %hello.wrapper_type, "plugin ready");

        Ok(PluginClient {
            shared,
            child: Mutex::new(Some(child)),
            wrapper_type: hello.wrapper_type,
            call_timeout: self.call_timeout,
            next_id: AtomicU64::new(1),
        })
    }
}

/// A wrapper running in a child process.
///
/// Calls are multiplexed over the child's stdio and may run concurrently.
/// If the child dies, every pending and later call fails with a
/// [`TransportError`]; start a new client to recover.
#[derive(Debug)]
pub struct PluginClient {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
    wrapper_type: WrapperType,
    call_timeout: Duration,
    next_id: AtomicU64,
}

impl PluginClient {
    pub fn builder(command: Command) -> PluginBuilder {
        PluginBuilder::new(command)
    }

    /// Spawn with default timeouts.
    pub fn start(command: Command) -> Result<Self> {
        PluginBuilder::new(command).start()
    }

    pub fn state(&self) -> PluginState {
        *self.shared.state.lock()
    }

    /// Child process id while it is still owned by this client.
    pub fn pid(&self) -> Option<u32> {
        self.child.lock().as_ref().map(Child::id)
    }

    /// Kill the child immediately. Pending calls fail with a transport error.
    pub fn kill(&self) -> Result<()> {
        if let Some(mut child) = self.child.lock().take() {
            debug!(pid = child.id(), "killing plugin");
            self.shared.set_state(PluginState::Closing);
            child.kill().map_err(TransportError::Io)?;
            child.wait().map_err(TransportError::Io)?;
        }
        self.shared.terminate();
        Ok(())
    }

    /// Close stdin and wait briefly for the child to exit, killing it if
    /// it does not.
    ///
    /// Dropping the outbox lets the writer thread finish queued frames and
    /// then close stdin. A writer stuck on a full pipe is released when the
    /// child is killed after the grace period.
    pub fn close(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().take() else {
            return Ok(());
        };
        self.shared.set_state(PluginState::Closing);
        self.shared.outbox.lock().take();

        let deadline = Instant::now() + CLOSE_GRACE;
        loop {
            match child.try_wait().map_err(TransportError::Io)? {
                Some(status) => {
                    debug!(%status, "plugin exited");
                    break;
                }
                None if Instant::now() >= deadline => {
                    warn!(pid = child.id(), "plugin did not exit after stdin closed, killing");
                    child.kill().map_err(TransportError::Io)?;
                    child.wait().map_err(TransportError::Io)?;
                    break;
                }
                None => thread::sleep(EXIT_POLL),
            }
        }
        self.shared.terminate();
        Ok(())
    }

    fn call(&self, call: Call, opts: &Options) -> Result<Reply> {
        let method = call.method();
        let timeout = opts.timeout.unwrap_or(self.call_timeout);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        let state = self.state();
        if state != PluginState::Ready {
            return Err(TransportError::NotReady(state).into());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        self.shared.register(id, tx)?;

        let request = Request {
            id,
            call,
            options: opts.clone(),
            timeout_ms,
        };
        if let Err(e) = self.shared.send(request) {
            self.shared.forget(id);
            return Err(e);
        }
        trace!(id, method, "plugin call queued");

        // The writer thread owns the pipe, so a child that stops reading
        // can only make this wait run to the deadline.
        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.shared.forget(id);
                warn!(id, method, timeout_ms, "plugin call timed out");
                Err(TransportError::Timeout {
                    method: method.to_string(),
                    timeout_ms,
                }
                .into())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(TransportError::Disconnected(method.to_string()).into())
            }
        }
    }
}

impl Drop for PluginClient {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close plugin");
        }
    }
}

fn unexpected(method: &str, reply: Reply) -> crate::error::Error {
    TransportError::Malformed(format!("unexpected reply to '{}': {:?}", method, reply)).into()
}

impl Wrapper for PluginClient {
    fn wrapper_type(&self) -> WrapperType {
        self.wrapper_type.clone()
    }

    fn set_config(&self, opts: &Options) -> Result<WrapperConfig> {
        match self.call(Call::SetConfig, opts)? {
            Reply::Config(config) => Ok(config),
            other => Err(unexpected("set_config", other)),
        }
    }

    fn key_id(&self) -> Result<String> {
        match self.call(Call::KeyId, &Options::new())? {
            Reply::KeyId(key_id) => Ok(key_id),
            other => Err(unexpected("key_id", other)),
        }
    }

    fn encrypt(&self, plaintext: Option<&[u8]>, opts: &Options) -> Result<BlobInfo> {
        let plaintext = require_plaintext(plaintext)?.to_vec();
        let call = Call::Encrypt {
            plaintext: Some(plaintext),
        };
        match self.call(call, opts)? {
            Reply::Blob(blob) => Ok(blob),
            other => Err(unexpected("encrypt", other)),
        }
    }

    fn decrypt(&self, blob: Option<&BlobInfo>, opts: &Options) -> Result<Vec<u8>> {
        let (blob, _) = require_blob(blob)?;
        let call = Call::Decrypt {
            blob: Some(blob.clone()),
        };
        match self.call(call, opts)? {
            Reply::Plaintext(plaintext) => Ok(plaintext),
            other => Err(unexpected("decrypt", other)),
        }
    }
}

/// State shared with the reader and writer threads.
#[derive(Debug)]
struct Shared {
    state: Mutex<PluginState>,
    pending: Mutex<Pending>,
    /// Frames for the writer thread. `None` before the handshake and after
    /// `close`.
    outbox: Mutex<Option<mpsc::Sender<Request>>>,
}

#[derive(Debug, Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, Waiter>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(PluginState::NotStarted),
            pending: Mutex::new(Pending::default()),
            outbox: Mutex::new(None),
        }
    }

    fn set_state(&self, state: PluginState) {
        let mut current = self.state.lock();
        if *current != PluginState::Terminated {
            *current = state;
        }
    }

    /// Mark the connection dead and fail every pending call.
    fn terminate(&self) {
        {
            let mut state = self.state.lock();
            if matches!(*state, PluginState::Ready | PluginState::Handshaking) {
                warn!("plugin exited unexpectedly");
            }
            *state = PluginState::Terminated;
        }
        let mut pending = self.pending.lock();
        pending.closed = true;
        let dropped = pending.waiters.len();
        pending.waiters.clear();
        if dropped > 0 {
            debug!(dropped, "failed pending plugin calls");
        }
    }

    fn register(&self, id: u64, waiter: Waiter) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(TransportError::NotReady(PluginState::Terminated).into());
        }
        pending.waiters.insert(id, waiter);
        Ok(())
    }

    fn forget(&self, id: u64) {
        self.pending.lock().waiters.remove(&id);
    }

    fn deliver(&self, id: u64, result: Result<Reply>) {
        let waiter = self.pending.lock().waiters.remove(&id);
        match waiter {
            // A closed receiver means the caller already timed out.
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => debug!(id, "discarding response for abandoned call"),
        }
    }

    fn is_waiting(&self, id: u64) -> bool {
        self.pending.lock().waiters.contains_key(&id)
    }

    /// Queue a frame for the writer thread. Never blocks on the pipe.
    fn send(&self, request: Request) -> Result<()> {
        let queued = match self.outbox.lock().as_ref() {
            Some(outbox) => outbox.send(request).is_ok(),
            None => false,
        };
        if queued {
            Ok(())
        } else {
            Err(TransportError::NotReady(*self.state.lock()).into())
        }
    }
}

fn abort(child: &mut Child, shared: &Shared, reason: String) -> crate::error::Error {
    warn!(reason = %reason, "plugin handshake failed");
    let _ = child.kill();
    let _ = child.wait();
    shared.terminate();
    TransportError::Handshake(reason).into()
}

fn spawn_named<F: FnOnce() + Send + 'static>(name: &str, f: F) {
    if let Err(e) = thread::Builder::new().name(name.to_string()).spawn(f) {
        warn!(thread = name, error = %e, "failed to spawn plugin io thread");
    }
}

fn forward_stderr(stderr: ChildStderr) {
    for line in BufReader::new(stderr).lines().map_while(|l| l.ok()) {
        debug!(target: "kmswrap::plugin::stderr", "{}", line);
    }
}

fn write_loop(mut stdin: ChildStdin, outbox: mpsc::Receiver<Request>, shared: &Shared) {
    while let Ok(request) = outbox.recv() {
        // Calls that already timed out are not worth sending.
        if !shared.is_waiting(request.id) {
            trace!(id = request.id, "skipping abandoned call");
            continue;
        }
        if let Err(e) = write_frame(&mut stdin, &request) {
            warn!(id = request.id, error = %e, "failed to write plugin request");
            shared.deliver(request.id, Err(TransportError::Io(e).into()));
            for queued in outbox.try_iter() {
                let method = queued.call.method().to_string();
                shared.deliver(queued.id, Err(TransportError::Disconnected(method).into()));
            }
            return;
        }
    }
    debug!("plugin outbox closed, closing stdin");
}

fn read_loop(
    stdout: ChildStdout,
    hello_tx: mpsc::Sender<std::result::Result<Hello, String>>,
    shared: &Shared,
) {
    let mut lines = BufReader::new(stdout).lines();

    match lines.next() {
        Some(Ok(line)) => {
            let hello = serde_json::from_str::<Hello>(&line)
                .map_err(|e| format!("invalid hello frame: {}", e));
            let valid = hello.is_ok();
            let _ = hello_tx.send(hello);
            if !valid {
                shared.terminate();
                return;
            }
        }
        Some(Err(e)) => {
            let _ = hello_tx.send(Err(format!("failed to read hello frame: {}", e)));
            shared.terminate();
            return;
        }
        None => {
            drop(hello_tx);
            shared.terminate();
            return;
        }
    }

    for line in lines {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "plugin stdout read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Response>(&line) {
            Ok(response) => shared.deliver(response.id, response.outcome.into_result()),
            Err(e) => {
                warn!(error = %e, "malformed plugin response");
                if let Ok(FrameId { id }) = serde_json::from_str(&line) {
                    shared.deliver(id, Err(TransportError::Malformed(e.to_string()).into()));
                }
            }
        }
    }

    shared.terminate();
}
