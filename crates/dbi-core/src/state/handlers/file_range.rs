//! FILE_RANGE handler - stream a byte range of a catalog file.
//!
//! Exchange for one request:
//! 1. host: Ack(size = payload length)
//! 2. peer: range request payload
//! 3. host: Response(size = range size)
//! 4. peer: Ack
//! 5. host: range bytes, in chunks of at most [`BUFFER_SEGMENT_DATA_SIZE`]

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{DbiObserver, LogLevel};
use crate::protocol::{
    BUFFER_SEGMENT_DATA_SIZE, CodecError, CommandHeader, CommandId, MAX_RANGE_REQUEST_SIZE,
    RangeRequest,
};
use crate::transport::UsbTransport;

use super::{HandleResult, HandlerContext, HandlerError};

/// Failure that aborts a single range transfer.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("'{name}' is not in the catalog")]
    NotInCatalog { name: String },

    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read file metadata: {0}")]
    Metadata(#[source] io::Error),

    #[error("Failed to seek to offset {offset}: {source}")]
    Seek {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read file: {0}")]
    Read(#[source] io::Error),
}

/// FILE_RANGE - deliver `range_size` bytes of a named file from `range_offset`.
pub fn handle_file_range<T: UsbTransport, O: DbiObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    data_size: u32,
) -> Result<HandleResult, HandlerError> {
    ctx.transport
        .write_header(&CommandHeader::ack(CommandId::FileRange, data_size))?;

    if data_size as usize > MAX_RANGE_REQUEST_SIZE {
        return Err(CodecError::OversizedPayload {
            limit: MAX_RANGE_REQUEST_SIZE,
            actual: data_size as usize,
        }
        .into());
    }
    let payload = ctx.transport.read_exact(data_size as usize)?;
    let request = RangeRequest::from_bytes(&payload)?;
    info!(
        name = %request.name,
        range_size = request.range_size,
        range_offset = request.range_offset,
        "FILE_RANGE: Range requested"
    );

    if ctx.tracker.is_completed(&request.name) {
        debug!(name = %request.name, "FILE_RANGE: Already completed, skipping");
        return Ok(HandleResult::Continue);
    }

    let end = request.end().ok_or_else(|| {
        HandlerError::Unexpected(format!(
            "range {}+{} for '{}' overflows",
            request.range_offset, request.range_size, request.name
        ))
    })?;

    ctx.transport.write_header(&CommandHeader::response(
        CommandId::FileRange,
        request.range_size,
    ))?;
    ctx.wait_for_ack()?;

    let path = ctx
        .catalog
        .get(&request.name)
        .ok_or_else(|| TransferError::NotInCatalog {
            name: request.name.clone(),
        })?;
    let mut file = File::open(path).map_err(|source| TransferError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let total_size = file.metadata().map_err(TransferError::Metadata)?.len();

    ctx.tracker.start();
    ctx.tracker
        .begin_file(&request.name, total_size, request.range_offset);

    file.seek(SeekFrom::Start(request.range_offset))
        .map_err(|source| TransferError::Seek {
            offset: request.range_offset,
            source,
        })?;

    let streamed = stream_range(ctx, &mut file, &request.name, request.range_size as u64)?;

    if streamed.cancelled {
        ctx.log(
            LogLevel::Warn,
            format!(
                "Transfer of {} cancelled after {} of {} bytes",
                request.name, streamed.sent, request.range_size
            ),
        );
    } else if end >= total_size {
        ctx.tracker.complete_file(&request.name);
    }

    Ok(HandleResult::Continue)
}

/// How far a range got.
struct Streamed {
    sent: u64,
    cancelled: bool,
}

/// Copy up to `len` bytes from `file` to the transport.
///
/// Stops early on cancel, or at end-of-file when the range runs past it.
fn stream_range<T: UsbTransport, O: DbiObserver>(
    ctx: &mut HandlerContext<'_, T, O>,
    file: &mut File,
    name: &str,
    len: u64,
) -> Result<Streamed, HandlerError> {
    let mut buffer = vec![0u8; (BUFFER_SEGMENT_DATA_SIZE as u64).min(len) as usize];
    let mut sent = 0u64;

    while sent < len {
        if ctx.cancel.is_cancelled() {
            warn!(name = %name, sent, len, "Cancelled mid-range");
            return Ok(Streamed {
                sent,
                cancelled: true,
            });
        }
        let chunk_len = (len - sent).min(buffer.len() as u64) as usize;
        let filled = fill(file, &mut buffer[..chunk_len])?;
        if filled == 0 {
            debug!(name = %name, sent, len, "End of file before end of range");
            break;
        }
        ctx.transport.write(&buffer[..filled])?;
        sent += filled as u64;
        ctx.tracker.advance(name, filled as u64);
        if filled < chunk_len {
            debug!(name = %name, sent, len, "End of file before end of range");
            break;
        }
    }

    debug!(name = %name, sent, "FILE_RANGE: Range streamed");
    Ok(Streamed {
        sent,
        cancelled: false,
    })
}

/// Read into `buf` until it is full or the file ends.
fn fill(file: &mut File, buf: &mut [u8]) -> Result<usize, TransferError> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(TransferError::Read(e)),
        }
    }
    Ok(filled)
}
