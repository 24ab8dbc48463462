//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{HandleResult, HandlerContext, HandlerError, TransferError, handle_command};
pub use machine::{LoopState, SessionContext};
