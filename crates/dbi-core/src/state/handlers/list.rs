//! LIST handler - advertise the catalog to the device.

use crate::events::DbiObserver;
use crate::protocol::{CommandHeader, CommandId};
use crate::transport::UsbTransport;
use tracing::{debug, info};

use super::{HandleResult, HandlerContext, HandlerError};

/// LIST - send the newline-terminated, sorted catalog names.
///
/// An empty catalog is answered with a zero-size response and nothing else;
/// the peer sends no ack in that case.
pub fn handle_list<T: UsbTransport, O: DbiObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
) -> Result<HandleResult, HandlerError> {
    let listing = ctx.catalog.listing();
    let size = u32::try_from(listing.len()).map_err(|_| {
        HandlerError::Unexpected(format!("listing of {} bytes too large", listing.len()))
    })?;

    info!(files = ctx.catalog.len(), bytes = size, "LIST: Sending catalog");
    ctx.transport
        .write_header(&CommandHeader::response(CommandId::List, size))?;

    if size > 0 {
        ctx.wait_for_ack()?;
        ctx.transport.write(listing.as_bytes())?;
    }
    debug!("LIST: Done");
    Ok(HandleResult::Continue)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Fixture;
    use super::*;
    use crate::protocol::CommandType;

    fn list_request() -> CommandHeader {
        CommandHeader::new(CommandType::Request, CommandId::List, 0)
    }

    #[test]
    fn test_list_sends_sorted_names() {
        let mut fx = Fixture::new();
        fx.add_file("b.nsp", 4);
        fx.add_file("a.nsp", 4);
        fx.transport.queue_ack(CommandId::List);

        assert_eq!(fx.dispatch(&list_request()).unwrap(), HandleResult::Continue);

        let writes = fx.transport.get_writes();
        assert_eq!(writes.len(), 2);
        let response = CommandHeader::from_bytes(&writes[0]).unwrap();
        assert_eq!(response.cmd_type, CommandType::Response);
        assert_eq!(response.cmd_id, CommandId::List);
        assert_eq!(response.data_size, 12);
        assert_eq!(writes[1], b"a.nsp\nb.nsp\n");
        assert_eq!(fx.transport.pending_reads(), 0);
    }

    #[test]
    fn test_empty_list_skips_ack() {
        let mut fx = Fixture::new();
        // Anything queued must stay unread.
        fx.transport.queue_request(CommandId::Exit, 0);

        assert_eq!(fx.dispatch(&list_request()).unwrap(), HandleResult::Continue);

        let writes = fx.transport.get_writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(
            CommandHeader::from_bytes(&writes[0]).unwrap(),
            CommandHeader::response(CommandId::List, 0)
        );
        assert_eq!(fx.transport.pending_reads(), 1);
    }

    #[test]
    fn test_list_ack_lost() {
        let mut fx = Fixture::new();
        fx.add_file("a.nsp", 4);

        assert!(matches!(
            fx.dispatch(&list_request()),
            Err(HandlerError::Transport(_))
        ));
        assert_eq!(fx.transport.get_writes().len(), 1);
    }
}
