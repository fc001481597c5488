//! Plugin side of the channel.
//!
//! Requests run on scoped worker threads, at most [`MAX_IN_FLIGHT`] at a
//! time. When every slot is busy the server stops reading stdin until one
//! frees up, so a flooding host is held back by the pipe.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::core::constants::{
    MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION, PROTOCOL_VERSIONS_KEY,
};
use crate::core::env::{EnvSource, ProcessEnv};
use crate::core::wrapper::Wrapper;
use crate::error::{ErrorKind, Result, TransportError};
use crate::plugin::protocol::{
    write_frame, Call, FrameId, Hello, Outcome, Reply, Request, Response, WireError,
};

/// Serve `wrapper` over stdin/stdout until the host closes stdin.
///
/// Returns an error without reading stdin when the process was not
/// launched by a plugin host. Callers typically print the error and exit
/// with status 1.
pub fn serve_plugin<W: Wrapper + 'static>(wrapper: W) -> Result<()> {
    check_handshake(&ProcessEnv)?;
    let stdin = io::stdin();
    Server::new(Arc::new(wrapper)).run(stdin.lock(), io::stdout())
}

/// Verify the magic cookie and that the host accepts our protocol version.
pub fn check_handshake(env: &dyn EnvSource) -> Result<()> {
    if env.var(MAGIC_COOKIE_KEY).as_deref() != Some(MAGIC_COOKIE_VALUE) {
        return Err(TransportError::Handshake(format!(
            "this binary is a plugin and is not meant to be executed directly \
             (magic cookie {} missing or wrong)",
            MAGIC_COOKIE_KEY
        ))
        .into());
    }

    let offered = env.var(PROTOCOL_VERSIONS_KEY).unwrap_or_default();
    let supported = offered
        .split(',')
        .filter_map(|v| v.trim().parse::<u32>().ok())
        .any(|v| v == PROTOCOL_VERSION);
    if !supported {
        return Err(TransportError::Handshake(format!(
            "no common protocol version: host offers '{}', plugin speaks {}",
            offered, PROTOCOL_VERSION
        ))
        .into());
    }
    Ok(())
}

/// Default cap on concurrently dispatched calls.
pub const MAX_IN_FLIGHT: usize = 64;

/// Dispatch loop over an arbitrary reader/writer pair.
pub struct Server {
    wrapper: Arc<dyn Wrapper>,
    max_in_flight: usize,
}

impl Server {
    pub fn new(wrapper: Arc<dyn Wrapper>) -> Self {
        Self {
            wrapper,
            max_in_flight: MAX_IN_FLIGHT,
        }
    }

    /// Cap on calls running at once. Zero is treated as one.
    pub fn max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    /// Write the hello frame, then serve requests until EOF.
    ///
    /// Each request runs on its own thread so slow calls do not block
    /// others. On EOF the loop waits for in-flight calls before returning.
    pub fn run<R: BufRead, W: Write + Send>(&self, reader: R, writer: W) -> Result<()> {
        let writer = Mutex::new(writer);
        let slots = Slots::new(self.max_in_flight);
        let hello = Hello {
            protocol_version: PROTOCOL_VERSION,
            wrapper_type: self.wrapper.wrapper_type(),
        };
        write_frame(&mut *writer.lock(), &hello).map_err(TransportError::Io)?;
        debug!(wrapper = %hello.wrapper_type, "plugin handshake sent");

        thread::scope(|scope| {
            for line in reader.lines() {
                let line = line.map_err(TransportError::Io)?;
                if line.trim().is_empty() {
                    continue;
                }

                let request: Request = match serde_json::from_str(&line) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(error = %e, "malformed request");
                        if let Ok(FrameId { id }) = serde_json::from_str(&line) {
                            let outcome = Outcome::Err(WireError {
                                kind: ErrorKind::Transport,
                                message: format!("malformed request: {}", e),
                            });
                            send(&writer, &Response { id, outcome });
                        }
                        continue;
                    }
                };

                let slot = slots.acquire();
                let wrapper = self.wrapper.as_ref();
                let writer = &writer;
                scope.spawn(move || {
                    let response = dispatch(wrapper, request);
                    send(writer, &response);
                    drop(slot);
                });
            }
            debug!("host closed stdin, draining in-flight calls");
            Ok(())
        })
    }
}

/// Counting gate for worker threads.
struct Slots {
    free: Mutex<usize>,
    released: Condvar,
}

impl Slots {
    fn new(limit: usize) -> Self {
        Self {
            free: Mutex::new(limit),
            released: Condvar::new(),
        }
    }

    /// Block until a slot is free.
    fn acquire(&self) -> Slot<'_> {
        let mut free = self.free.lock();
        if *free == 0 {
            debug!("all worker slots busy, pausing reads");
        }
        while *free == 0 {
            self.released.wait(&mut free);
        }
        *free -= 1;
        Slot { slots: self }
    }
}

/// Returned to the gate on drop, including when the worker panics.
struct Slot<'a> {
    slots: &'a Slots,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        *self.slots.free.lock() += 1;
        self.slots.released.notify_one();
    }
}

fn send<W: Write>(writer: &Mutex<W>, response: &Response) {
    if let Err(e) = write_frame(&mut *writer.lock(), response) {
        warn!(id = response.id, error = %e, "failed to write response");
    }
}

fn dispatch(wrapper: &dyn Wrapper, request: Request) -> Response {
    let Request {
        id,
        call,
        mut options,
        timeout_ms,
    } = request;
    let method = call.method();
    let deadline = Duration::from_millis(timeout_ms);
    options.timeout = Some(deadline);

    debug!(id, method, "dispatching call");
    let started = Instant::now();
    let result = match call {
        Call::SetConfig => wrapper.set_config(&options).map(Reply::Config),
        Call::Type => Ok(Reply::Type(wrapper.wrapper_type())),
        Call::KeyId => wrapper.key_id().map(Reply::KeyId),
        Call::Encrypt { plaintext } => wrapper
            .encrypt(plaintext.as_deref(), &options)
            .map(Reply::Blob),
        Call::Decrypt { blob } => wrapper.decrypt(blob.as_ref(), &options).map(Reply::Plaintext),
    };

    let elapsed = started.elapsed();
    if timeout_ms > 0 && elapsed > deadline {
        warn!(
            id,
            method,
            elapsed_ms = elapsed.as_millis() as u64,
            "call finished after host deadline"
        );
    }
    if let Err(e) = &result {
        debug!(id, method, error = %e, "call failed");
    }

    Response {
        id,
        outcome: Outcome::from(result),
    }
}
