//! Protocol module - DBI wire format definitions.

pub mod constants;
pub mod header;

pub use constants::*;
pub use header::{CodecError, CommandHeader, CommandId, CommandType, RangeRequest};
