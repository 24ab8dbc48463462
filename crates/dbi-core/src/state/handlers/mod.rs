//! Command handlers - dispatch logic for each command id.
//!
//! This module is split into submodules by functionality:
//! - `control`: Exit handling
//! - `file_range`: File range streaming
//! - `list`: Catalog listing

mod control;
mod file_range;
mod list;

use crate::cancel::CancelToken;
use crate::catalog::FileCatalog;
use crate::events::{DbiEvent, DbiObserver, LogLevel};
use crate::progress::TransferTracker;
use crate::protocol::{CodecError, CommandHeader, CommandId};
use crate::transport::{TransportError, UsbTransport};
use thiserror::Error;
use tracing::{debug, warn};

pub use file_range::TransferError;

use control::handle_exit;
use file_range::handle_file_range;
use list::handle_list;

/// Result of handling a command.
#[derive(Debug, PartialEq, Eq)]
pub enum HandleResult {
    /// Keep listening for commands.
    Continue,
    /// Peer requested exit; the session is over.
    Exit,
}

/// Why a handler stopped.
///
/// The variant decides the session's reaction: rebind, drop the command,
/// abort the transfer, or apply the fail-closed/fail-loud policy.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Decode error: {0}")]
    Decode(#[from] CodecError),
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Handler context containing all resources.
pub struct HandlerContext<'a, T: UsbTransport, O: DbiObserver> {
    pub transport: &'a T,
    pub observer: &'a O,
    pub catalog: &'a FileCatalog,
    pub tracker: &'a mut TransferTracker<O>,
    pub cancel: &'a CancelToken,
}

impl<'a, T: UsbTransport, O: DbiObserver> HandlerContext<'a, T, O> {
    pub(crate) fn emit(&self, event: DbiEvent) {
        self.observer.on_event(&event);
    }

    pub(crate) fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(DbiEvent::Log {
            level,
            message: message.into(),
        });
    }

    /// Block for the peer's 16-byte acknowledgment frame.
    ///
    /// Only the framing matters; its fields are logged and otherwise ignored.
    pub(crate) fn wait_for_ack(&self) -> Result<(), TransportError> {
        match self.transport.read_header()? {
            Ok(ack) if ack.has_valid_magic() => debug!(ack = %ack, "Ack received"),
            Ok(ack) => warn!(magic = ?ack.magic, "Ack frame with foreign magic"),
            Err(e) => warn!(error = %e, "Malformed ack frame"),
        }
        Ok(())
    }
}

/// Route a command to its handler.
///
/// Unrecognized ids, including the deprecated legacy listing, are a no-op.
pub fn handle_command<T: UsbTransport, O: DbiObserver>(
    header: &CommandHeader,
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, HandlerError> {
    match header.cmd_id {
        CommandId::Exit => handle_exit(ctx),
        CommandId::FileRange => handle_file_range(ctx, header.data_size),
        CommandId::List => handle_list(ctx),
        CommandId::Unrecognized(id) => {
            debug!(cmd_id = id, "Ignoring unrecognized command");
            Ok(HandleResult::Continue)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::protocol::CommandType;

    #[test]
    fn test_unrecognized_command_is_ignored() {
        let mut fx = Fixture::new();
        for id in [1u32, 7, 0xFFFF_FFFF] {
            let header = CommandHeader::new(CommandType::Request, CommandId::from_u32(id), 0);
            assert_eq!(fx.dispatch(&header).unwrap(), HandleResult::Continue);
        }
        assert!(fx.transport.get_writes().is_empty());
        assert!(fx.observer.events().is_empty());
    }
}
