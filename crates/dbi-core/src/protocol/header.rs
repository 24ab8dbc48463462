//! Command header and payload structures for the DBI protocol.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::Cursor;
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Malformed header: expected {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },
    #[error("Truncated payload: expected at least {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },
    #[error("Payload of {actual} bytes exceeds the {limit} byte limit")]
    OversizedPayload { limit: usize, actual: usize },
    #[error("File name is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command type carried in the second header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Request,
    Response,
    Ack,
    Unrecognized(u32),
}

impl CommandType {
    pub fn from_u32(v: u32) -> Self {
        match v {
            CMD_TYPE_REQUEST => Self::Request,
            CMD_TYPE_RESPONSE => Self::Response,
            CMD_TYPE_ACK => Self::Ack,
            other => Self::Unrecognized(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Request => CMD_TYPE_REQUEST,
            Self::Response => CMD_TYPE_RESPONSE,
            Self::Ack => CMD_TYPE_ACK,
            Self::Unrecognized(v) => *v,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Request => write!(f, "REQUEST"),
            CommandType::Response => write!(f, "RESPONSE"),
            CommandType::Ack => write!(f, "ACK"),
            CommandType::Unrecognized(v) => write!(f, "TYPE({})", v),
        }
    }
}

/// Command id carried in the third header field.
///
/// Ids outside the known set (including the deprecated legacy listing)
/// decode to [`CommandId::Unrecognized`] and are ignored by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandId {
    Exit,
    FileRange,
    List,
    Unrecognized(u32),
}

impl CommandId {
    pub fn from_u32(v: u32) -> Self {
        match v {
            CMD_ID_EXIT => Self::Exit,
            CMD_ID_FILE_RANGE => Self::FileRange,
            CMD_ID_LIST => Self::List,
            other => Self::Unrecognized(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Exit => CMD_ID_EXIT,
            Self::FileRange => CMD_ID_FILE_RANGE,
            Self::List => CMD_ID_LIST,
            Self::Unrecognized(v) => *v,
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandId::Exit => write!(f, "EXIT"),
            CommandId::FileRange => write!(f, "FILE_RANGE"),
            CommandId::List => write!(f, "LIST"),
            CommandId::Unrecognized(CMD_ID_LIST_OLD) => write!(f, "LIST_OLD"),
            CommandId::Unrecognized(v) => write!(f, "ID({})", v),
        }
    }
}

/// Command Header (16 bytes / 0x10)
///
/// `[magic:4][cmd_type:u32 LE][cmd_id:u32 LE][payload_size:u32 LE]`
///
/// A header with a foreign magic still decodes; callers check
/// [`CommandHeader::has_valid_magic`] and drop the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandHeader {
    pub magic: [u8; 4],
    pub cmd_type: CommandType,
    pub cmd_id: CommandId,
    pub data_size: u32,
}

impl CommandHeader {
    pub const SIZE: usize = HEADER_SIZE;

    pub fn new(cmd_type: CommandType, cmd_id: CommandId, data_size: u32) -> Self {
        Self {
            magic: MAGIC,
            cmd_type,
            cmd_id,
            data_size,
        }
    }

    /// Host acknowledgment of a device request.
    pub fn ack(cmd_id: CommandId, data_size: u32) -> Self {
        Self::new(CommandType::Ack, cmd_id, data_size)
    }

    /// Host response announcing `data_size` bytes to follow.
    pub fn response(cmd_id: CommandId, data_size: u32) -> Self {
        Self::new(CommandType::Response, cmd_id, data_size)
    }

    pub fn has_valid_magic(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(&self.magic);
        let mut tail = &mut buf[4..];
        // Writing into a fixed 12-byte slice cannot run out of space.
        let _ = tail.write_u32::<LittleEndian>(self.cmd_type.as_u32());
        let _ = tail.write_u32::<LittleEndian>(self.cmd_id.as_u32());
        let _ = tail.write_u32::<LittleEndian>(self.data_size);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < Self::SIZE {
            return Err(CodecError::MalformedHeader {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[..4]);
        let mut cursor = Cursor::new(&data[4..Self::SIZE]);
        Ok(Self {
            magic,
            cmd_type: CommandType::from_u32(cursor.read_u32::<LittleEndian>()?),
            cmd_id: CommandId::from_u32(cursor.read_u32::<LittleEndian>()?),
            data_size: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

impl fmt::Display for CommandHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} size={}",
            self.cmd_type, self.cmd_id, self.data_size
        )
    }
}

/// FileRange request payload.
///
/// `[range_size:u32][range_offset:u64][name_len:u32][name:UTF-8 to end]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub range_size: u32,
    pub range_offset: u64,
    /// Length declared by the peer. Advisory only: the name runs to the end
    /// of the payload.
    pub declared_name_len: u32,
    pub name: String,
}

impl RangeRequest {
    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < RANGE_REQUEST_PREFIX_SIZE {
            return Err(CodecError::TruncatedPayload {
                expected: RANGE_REQUEST_PREFIX_SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let range_size = cursor.read_u32::<LittleEndian>()?;
        let range_offset = cursor.read_u64::<LittleEndian>()?;
        let declared_name_len = cursor.read_u32::<LittleEndian>()?;

        // Trailing NUL padding is not part of the name.
        let raw = &data[RANGE_REQUEST_PREFIX_SIZE..];
        let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let name = std::str::from_utf8(&raw[..end])?.to_string();

        if name.len() != declared_name_len as usize {
            tracing::debug!(
                declared = declared_name_len,
                actual = name.len(),
                "Range request name length mismatch, using payload boundary"
            );
        }

        Ok(Self {
            range_size,
            range_offset,
            declared_name_len,
            name,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RANGE_REQUEST_PREFIX_SIZE + self.name.len());
        buf.extend_from_slice(&self.range_size.to_le_bytes());
        buf.extend_from_slice(&self.range_offset.to_le_bytes());
        buf.extend_from_slice(&self.declared_name_len.to_le_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf
    }

    /// Exclusive end of the requested range, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.range_offset.checked_add(self.range_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = CommandHeader::response(CommandId::FileRange, 0x12345678);
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), CommandHeader::SIZE);
        assert_eq!(&bytes[..4], b"DBI0");

        let parsed = CommandHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_wire_layout() {
        let bytes = CommandHeader::ack(CommandId::List, 7).to_bytes();
        assert_eq!(
            bytes,
            [b'D', b'B', b'I', b'0', 2, 0, 0, 0, 3, 0, 0, 0, 7, 0, 0, 0]
        );
    }

    #[test]
    fn test_header_too_short() {
        let err = CommandHeader::from_bytes(&[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            CodecError::MalformedHeader {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn test_foreign_magic_still_decodes() {
        let mut bytes = CommandHeader::response(CommandId::Exit, 0).to_bytes();
        bytes[..4].copy_from_slice(b"ABCD");
        let parsed = CommandHeader::from_bytes(&bytes).unwrap();
        assert!(!parsed.has_valid_magic());
        assert_eq!(parsed.cmd_id, CommandId::Exit);
    }

    #[test]
    fn test_unknown_ids_are_preserved() {
        let mut bytes = CommandHeader::new(CommandType::Request, CommandId::Unrecognized(1), 0)
            .to_bytes();
        bytes[4..8].copy_from_slice(&9u32.to_le_bytes());
        let parsed = CommandHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.cmd_id, CommandId::Unrecognized(CMD_ID_LIST_OLD));
        assert_eq!(parsed.cmd_type, CommandType::Unrecognized(9));
        assert_eq!(parsed.cmd_id.to_string(), "LIST_OLD");
    }

    #[test]
    fn test_range_request_decode() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&2048u32.to_le_bytes());
        payload.extend_from_slice(&4096u64.to_le_bytes());
        payload.extend_from_slice(&8u32.to_le_bytes());
        payload.extend_from_slice(b"game.nsp");

        let req = RangeRequest::from_bytes(&payload).unwrap();
        assert_eq!(req.range_size, 2048);
        assert_eq!(req.range_offset, 4096);
        assert_eq!(req.declared_name_len, 8);
        assert_eq!(req.name, "game.nsp");
        assert_eq!(req.end(), Some(6144));
    }

    #[test]
    fn test_range_request_name_runs_to_payload_end() {
        let req = RangeRequest {
            range_size: 1,
            range_offset: 0,
            declared_name_len: 3,
            name: "longer name.xci".to_string(),
        };
        let parsed = RangeRequest::from_bytes(&req.to_bytes()).unwrap();
        assert_eq!(parsed.name, "longer name.xci");
    }

    #[test]
    fn test_range_request_strips_nul_padding() {
        let mut payload = RangeRequest {
            range_size: 1,
            range_offset: 0,
            declared_name_len: 5,
            name: "a.nsp".to_string(),
        }
        .to_bytes();
        payload.extend_from_slice(&[0, 0, 0]);
        assert_eq!(RangeRequest::from_bytes(&payload).unwrap().name, "a.nsp");
    }

    #[test]
    fn test_range_request_invalid_utf8() {
        let mut payload = vec![0u8; RANGE_REQUEST_PREFIX_SIZE];
        payload.extend_from_slice(&[0xFF, 0xFE, b'x']);
        assert!(matches!(
            RangeRequest::from_bytes(&payload),
            Err(CodecError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn test_range_request_truncated() {
        assert!(matches!(
            RangeRequest::from_bytes(&[0u8; 10]),
            Err(CodecError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_range_end_overflow() {
        let req = RangeRequest {
            range_size: 10,
            range_offset: u64::MAX,
            declared_name_len: 0,
            name: String::new(),
        };
        assert_eq!(req.end(), None);
    }

    proptest! {
        #[test]
        fn test_any_header_fields_roundtrip(cmd_type: u32, cmd_id: u32, data_size: u32) {
            let header = CommandHeader::new(
                CommandType::from_u32(cmd_type),
                CommandId::from_u32(cmd_id),
                data_size,
            );
            let bytes = header.to_bytes();
            prop_assert_eq!(bytes.len(), CommandHeader::SIZE);

            let parsed = CommandHeader::from_bytes(&bytes).unwrap();
            prop_assert_eq!(parsed, header);
            prop_assert!(parsed.has_valid_magic());
            prop_assert_eq!(parsed.cmd_type.as_u32(), cmd_type);
            prop_assert_eq!(parsed.cmd_id.as_u32(), cmd_id);
            prop_assert_eq!(parsed.data_size, data_size);
        }
    }
}
