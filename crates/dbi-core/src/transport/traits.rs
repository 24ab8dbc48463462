//! USB Transport layer abstraction.
//!
//! Defines the `UsbTransport` trait for USB communication,
//! allowing different implementations (nusb, mock, etc.).

use crate::protocol::{CodecError, CommandHeader, HEADER_SIZE};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to reset device: {0}")]
    ResetFailed(String),

    #[error("Failed to set configuration: {0}")]
    ConfigurationFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract USB transport interface.
///
/// One bound endpoint pair: reads come from the bulk IN endpoint
/// (device -> host), writes go to the bulk OUT endpoint (host -> device).
/// Every call blocks until it completes, fails, or times out.
pub trait UsbTransport: Send + Sync {
    /// Write raw bytes to the OUT endpoint.
    fn write(&self, data: &[u8]) -> Result<usize, TransportError>;

    /// Read up to `max_len` bytes from the IN endpoint.
    fn read(&self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    /// Read exactly `len` bytes from the IN endpoint.
    fn read_exact(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let bytes = self.read(len)?;
        if bytes.len() != len {
            return Err(TransportError::ShortRead {
                expected: len,
                actual: bytes.len(),
            });
        }
        Ok(bytes)
    }

    /// Encode and send a command header.
    fn write_header(&self, header: &CommandHeader) -> Result<(), TransportError> {
        self.write(&header.to_bytes())?;
        Ok(())
    }

    /// Read one 16-byte frame and decode it as a command header.
    ///
    /// The outer `Result` carries transport failures, the inner one decode
    /// failures, so callers can treat them differently.
    fn read_header(&self) -> Result<Result<CommandHeader, CodecError>, TransportError> {
        let bytes = self.read(HEADER_SIZE)?;
        Ok(CommandHeader::from_bytes(&bytes))
    }

    /// Get the current VID.
    fn vendor_id(&self) -> u16;

    /// Get the current PID.
    fn product_id(&self) -> u16;
}
