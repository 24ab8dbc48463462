//! Event system for UI decoupling.
//!
//! The engine reports connection changes, commands, and transfer progress
//! through [`DbiObserver`]. Progress bars, tables, or log lines are adapters
//! living outside the core.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use crate::protocol::{CommandId, CommandType};

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Events emitted by a DBI session.
#[derive(Debug, Clone, PartialEq)]
pub enum DbiEvent {
    /// Device bound and ready for commands.
    DeviceConnected { vid: u16, pid: u16 },
    /// Transport failed; the session will try to rebind.
    DeviceDisconnected,
    /// A well-formed command header arrived.
    CommandReceived {
        cmd_type: CommandType,
        cmd_id: CommandId,
        data_size: u32,
    },
    /// A frame without the protocol magic was dropped.
    FrameDiscarded { magic: [u8; 4] },
    /// First file range of the session was requested.
    TransferStarted { total_files: usize },
    /// A file started being tracked.
    FileBegin {
        name: String,
        total_size: u64,
        initial_offset: u64,
    },
    /// Bytes of a tracked file were delivered.
    Progress {
        name: String,
        delta: u64,
        transferred: u64,
        total: u64,
        /// Sampled transfer rate, bytes per second.
        rate: Option<f64>,
        eta: Option<Duration>,
    },
    /// The range reaching end-of-file was delivered.
    FileComplete {
        name: String,
        files_completed: usize,
        total_files: usize,
        elapsed: Duration,
    },
    /// Peer asked the host to exit.
    ExitRequested,
    /// Log message.
    Log { level: LogLevel, message: String },
    /// USB Packet sent/received.
    Packet {
        direction: PacketDirection,
        length: usize,
        data: Vec<u8>,
    },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving DBI events.
///
/// Observers only watch: they never see or mutate transfer state directly.
pub trait DbiObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &DbiEvent);
}

/// Observer that keeps every event, for inspection after the fact.
#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<DbiEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events seen so far.
    pub fn events(&self) -> Vec<DbiEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn drain_events(&self) -> Vec<DbiEvent> {
        self.events
            .lock()
            .map(|mut e| e.drain(..).collect())
            .unwrap_or_default()
    }
}

impl DbiObserver for CollectingObserver {
    fn on_event(&self, event: &DbiEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DbiObserver for TracingObserver {
    fn on_event(&self, event: &DbiEvent) {
        match event {
            DbiEvent::DeviceConnected { vid, pid } => {
                tracing::info!(vid = %format!("{:04X}", vid), pid = %format!("{:04X}", pid), "Device connected");
            }
            DbiEvent::DeviceDisconnected => {
                tracing::warn!("Device disconnected");
            }
            DbiEvent::CommandReceived {
                cmd_type,
                cmd_id,
                data_size,
            } => {
                tracing::debug!(cmd_type = %cmd_type, cmd_id = %cmd_id, size = data_size, "Command received");
            }
            DbiEvent::FrameDiscarded { magic } => {
                tracing::debug!(magic = ?magic, "Frame discarded");
            }
            DbiEvent::TransferStarted { total_files } => {
                tracing::info!(total_files, "Transfer started");
            }
            DbiEvent::FileBegin {
                name,
                total_size,
                initial_offset,
            } => {
                tracing::info!(name = %name, total_size, initial_offset, "File transfer started");
            }
            DbiEvent::Progress {
                name,
                transferred,
                total,
                ..
            } => {
                let pct = if *total > 0 {
                    (*transferred * 100) / *total
                } else {
                    0
                };
                tracing::debug!(name = %name, progress = %format!("{}%", pct), "Progress");
            }
            DbiEvent::FileComplete {
                name,
                files_completed,
                total_files,
                elapsed,
            } => {
                tracing::info!(
                    name = %name,
                    "Overall Progress: {}/{} files [{}s elapsed]",
                    files_completed,
                    total_files,
                    elapsed.as_secs()
                );
            }
            DbiEvent::ExitRequested => {
                tracing::info!("Received exit command");
            }
            DbiEvent::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            DbiEvent::Packet {
                direction, length, ..
            } => {
                tracing::trace!(dir = %direction, len = length, "USB Packet");
            }
        }
    }
}
