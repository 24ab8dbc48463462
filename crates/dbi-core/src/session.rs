//! DBI Session - binds the device and serves its commands until exit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::catalog::FileCatalog;
use crate::connection::{BackoffPolicy, ConnectionManager, DeviceBinder};
use crate::events::{DbiEvent, DbiObserver, PacketDirection, TracingObserver};
use crate::progress::TransferTracker;
use crate::protocol::constants::{
    DEFAULT_BACKOFF_MS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS, DEFAULT_SETTLE_MS,
    NINTENDO_VENDOR_ID, SWITCH_PRODUCT_ID,
};
use crate::state::handlers::{HandleResult, HandlerContext, HandlerError, handle_command};
use crate::state::machine::{LoopState, SessionContext};
use crate::transport::{NusbBinder, TransportError, UsbTransport};

/// Configuration for a DBI session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Propagate unexpected handler errors instead of ending the session quietly.
    pub debug: bool,
    /// Whole-session attempts before giving up.
    pub retry_count: u32,
    /// Pause between failed session attempts.
    pub retry_delay_ms: u64,
    /// USB transfer timeout; 0 blocks indefinitely.
    pub timeout_ms: u64,
    /// Poll interval while waiting for the device.
    pub backoff_ms: u64,
    /// Delay after the bus reset before configuring the device.
    pub settle_ms: u64,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Comma-separated extension allow-list, e.g. `"nsp,xci"`.
    pub filter: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            debug: false,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            timeout_ms: 0,
            backoff_ms: DEFAULT_BACKOFF_MS,
            settle_ms: DEFAULT_SETTLE_MS,
            vendor_id: NINTENDO_VENDOR_ID,
            product_id: SWITCH_PRODUCT_ID,
            filter: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::fixed(Duration::from_millis(self.backoff_ms))
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The device sent EXIT.
    Completed,
    /// The cancel token fired.
    Cancelled,
    /// A handler failed unexpectedly and the session stopped.
    Aborted { reason: String },
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("No valid files found to transfer")]
    EmptyCatalog,

    #[error("Session failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: HandlerError,
    },
}

/// What the loop does after one header has been processed.
enum Step {
    Listen,
    Rebind,
    Finish(SessionOutcome),
}

/// DBI Session - serves one device until it exits or the session is cancelled.
pub struct DbiSession<O: DbiObserver> {
    config: SessionConfig,
    catalog: FileCatalog,
    observer: Arc<O>,
    cancel: CancelToken,
}

impl DbiSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig, catalog: FileCatalog) -> Self {
        Self::with_observer(config, catalog, Arc::new(TracingObserver))
    }
}

impl<O: DbiObserver> DbiSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, catalog: FileCatalog, observer: Arc<O>) -> Self {
        Self {
            config,
            catalog,
            observer,
            cancel: CancelToken::new(),
        }
    }

    /// Handle that stops the session from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run against the real device.
    pub fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let binder = NusbBinder::new(self.config.vendor_id, self.config.product_id)
            .with_settle_delay(Duration::from_millis(self.config.settle_ms))
            .with_timeout(self.config.timeout());
        self.run_with(binder)
    }

    /// Run with a custom device binder.
    ///
    /// An attempt fails only when serving returns an error, which happens in
    /// debug mode; every other failure is absorbed by the session loop.
    #[instrument(skip_all, fields(files = self.catalog.len()))]
    pub fn run_with<B: DeviceBinder>(
        &mut self,
        binder: B,
    ) -> Result<SessionOutcome, SessionError> {
        if self.catalog.is_empty() {
            return Err(SessionError::EmptyCatalog);
        }

        let mut manager = ConnectionManager::new(binder, self.config.backoff());
        let mut tracker = TransferTracker::new(self.observer.clone(), self.catalog.len());
        let attempts = self.config.retry_count.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.serve(&mut manager, &mut tracker) {
                Ok(outcome) => {
                    info!(outcome = ?outcome, "Session finished");
                    return Ok(outcome);
                }
                Err(e) if attempt < attempts => {
                    error!(attempt, attempts, error = %e, "Session attempt failed, retrying");
                    if !self.cancel.sleep(self.config.retry_delay()) {
                        return Ok(SessionOutcome::Cancelled);
                    }
                }
                Err(source) => {
                    return Err(SessionError::RetriesExhausted {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }

    /// Bind, then dispatch commands until exit, cancel, or a fatal error.
    fn serve<B: DeviceBinder>(
        &self,
        manager: &mut ConnectionManager<B>,
        tracker: &mut TransferTracker<O>,
    ) -> Result<SessionOutcome, HandlerError> {
        let mut ctx = SessionContext::new();
        let Some(mut transport) = manager.bind(&self.cancel) else {
            return Ok(SessionOutcome::Cancelled);
        };
        self.announce(&transport);

        let outcome = loop {
            if self.cancel.is_cancelled() {
                info!("Session cancelled");
                break SessionOutcome::Cancelled;
            }

            let observed = ObservableTransport {
                inner: &transport,
                observer: self.observer.as_ref(),
            };
            let step = self.step(&observed, tracker, &mut ctx)?;

            match step {
                Step::Listen => ctx.goto_state(LoopState::Listening),
                Step::Finish(outcome) => break outcome,
                Step::Rebind => {
                    self.observer.on_event(&DbiEvent::DeviceDisconnected);
                    drop(transport);
                    ctx.rebinds += 1;
                    transport = match manager.bind(&self.cancel) {
                        Some(t) => t,
                        None => break SessionOutcome::Cancelled,
                    };
                    self.announce(&transport);
                    ctx.goto_state(LoopState::Listening);
                }
            }
        };

        ctx.goto_state(LoopState::Terminated);
        info!(
            commands = ctx.commands_handled,
            discarded = ctx.frames_discarded,
            rebinds = ctx.rebinds,
            "Session loop stopped"
        );
        Ok(outcome)
    }

    /// Read one header and run its handler.
    fn step<T: UsbTransport>(
        &self,
        transport: &T,
        tracker: &mut TransferTracker<O>,
        ctx: &mut SessionContext,
    ) -> Result<Step, HandlerError> {
        let header = match transport.read_header() {
            Ok(Ok(header)) => header,
            Ok(Err(e)) => {
                ctx.frames_discarded += 1;
                debug!(error = %e, "Discarding malformed frame");
                return Ok(Step::Listen);
            }
            Err(TransportError::Timeout { .. }) => return Ok(Step::Listen),
            Err(e) => {
                warn!(error = %e, "Transport failed while listening");
                return Ok(Step::Rebind);
            }
        };

        if !header.has_valid_magic() {
            ctx.frames_discarded += 1;
            debug!(magic = ?header.magic, "Discarding frame with foreign magic");
            self.observer
                .on_event(&DbiEvent::FrameDiscarded { magic: header.magic });
            return Ok(Step::Listen);
        }

        self.observer.on_event(&DbiEvent::CommandReceived {
            cmd_type: header.cmd_type,
            cmd_id: header.cmd_id,
            data_size: header.data_size,
        });
        ctx.goto_state(LoopState::Dispatching(header.cmd_id));

        let mut handler_ctx = HandlerContext {
            transport,
            observer: self.observer.as_ref(),
            catalog: &self.catalog,
            tracker,
            cancel: &self.cancel,
        };

        match handle_command(&header, &mut handler_ctx) {
            Ok(HandleResult::Continue) => Ok(Step::Listen),
            Ok(HandleResult::Exit) => Ok(Step::Finish(SessionOutcome::Completed)),
            Err(HandlerError::Transport(e)) => {
                warn!(cmd = %header.cmd_id, error = %e, "Transport failed mid-command");
                Ok(Step::Rebind)
            }
            Err(HandlerError::Decode(e)) => {
                warn!(cmd = %header.cmd_id, error = %e, "Dropping undecodable command");
                Ok(Step::Listen)
            }
            Err(HandlerError::Transfer(e)) => {
                error!(error = %e, "Transfer aborted");
                Ok(Step::Listen)
            }
            Err(e @ HandlerError::Unexpected(_)) => {
                if self.config.debug {
                    return Err(e);
                }
                error!(error = %e, "Ending session");
                Ok(Step::Finish(SessionOutcome::Aborted {
                    reason: e.to_string(),
                }))
            }
        }
    }

    fn announce<T: UsbTransport>(&self, transport: &T) {
        self.observer.on_event(&DbiEvent::DeviceConnected {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
        });
    }
}

/// Transport wrapper that emits packet events.
struct ObservableTransport<'a, T: UsbTransport, O: DbiObserver> {
    inner: &'a T,
    observer: &'a O,
}

impl<'a, T: UsbTransport, O: DbiObserver> ObservableTransport<'a, T, O> {
    fn emit(&self, direction: PacketDirection, data: &[u8]) {
        self.observer.on_event(&DbiEvent::Packet {
            direction,
            length: data.len(),
            data: data.iter().take(32).cloned().collect(),
        });
    }
}

impl<'a, T: UsbTransport, O: DbiObserver> UsbTransport for ObservableTransport<'a, T, O> {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let res = self.inner.write(data);
        if res.is_ok() {
            self.emit(PacketDirection::Tx, data);
        }
        res
    }

    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read(max_len);
        if let Ok(data) = &res
            && !data.is_empty()
        {
            self.emit(PacketDirection::Rx, data);
        }
        res
    }

    fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let res = self.inner.read_exact(len);
        if let Ok(data) = &res {
            self.emit(PacketDirection::Rx, data);
        }
        res
    }

    fn vendor_id(&self) -> u16 {
        self.inner.vendor_id()
    }

    fn product_id(&self) -> u16 {
        self.inner.product_id()
    }
}
