//! DBI-Core: host-side DBI USB file transfer in Rust.
//!
//! This crate serves local files to the DBI homebrew client on a Nintendo
//! Switch over USB bulk endpoints: the device lists the offered files and
//! pulls arbitrary byte ranges of them on demand.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, 16-byte command header, range request payload
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Connection**: Device discovery, binding, and backoff
//! - **State**: Session loop state and command handlers
//! - **Progress**: Per-file transfer tracking
//! - **Catalog**: Name to path mapping and file validation
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use dbi_core::catalog::CatalogBuilder;
//! use dbi_core::session::{DbiSession, SessionConfig};
//!
//! let mut builder = CatalogBuilder::new(None);
//! builder.add_path(Path::new("games/"));
//!
//! let mut session = DbiSession::new(SessionConfig::default(), builder.build());
//! let outcome = session.run().expect("DBI session failed");
//! println!("{:?}", outcome);
//! ```

pub mod cancel;
pub mod catalog;
pub mod connection;
pub mod events;
pub mod progress;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use cancel::CancelToken;
pub use catalog::{CatalogBuilder, ExtensionFilter, FileCatalog, ValidationError, validate_file};
pub use connection::{BackoffPolicy, ConnectionManager, DeviceBinder};
pub use events::{DbiEvent, DbiObserver, LogLevel, TracingObserver};
pub use progress::{FileProgress, TransferTracker};
pub use protocol::{CodecError, CommandHeader, CommandId, CommandType, RangeRequest};
pub use session::{DbiSession, SessionConfig, SessionError, SessionOutcome};
pub use state::{HandlerError, TransferError};
pub use transport::{MockTransport, NusbBinder, NusbTransport, TransportError, UsbTransport};
