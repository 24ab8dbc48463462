//! Session control handlers (exit).

use crate::events::{DbiEvent, DbiObserver, LogLevel};
use crate::protocol::{CommandHeader, CommandId};
use crate::transport::UsbTransport;
use tracing::info;

use super::{HandleResult, HandlerContext, HandlerError};

/// EXIT - peer is done; acknowledge with an empty response.
pub fn handle_exit<T: UsbTransport, O: DbiObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, HandlerError> {
    info!("EXIT: Peer requested session end");
    ctx.transport
        .write_header(&CommandHeader::response(CommandId::Exit, 0))?;
    ctx.log(LogLevel::Info, "Exit requested by device");
    ctx.emit(DbiEvent::ExitRequested);
    Ok(HandleResult::Exit)
}
