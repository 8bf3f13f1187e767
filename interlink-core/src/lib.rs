#![forbid(unsafe_code)]

//! Interlink core: launches heterogeneous blockchain node implementations as
//! interactive console processes and links them over their peer sync protocol.
//!
//! - [`ResourceAllocator`]: non-colliding ports and working directories
//! - [`Node`]: uniform handle over each implementation's console dialect
//!   ([`EpochNode`], [`ElixirNode`])
//! - [`link`]: directed connect between two handles
//! - [`Session`]: the nodes of one run, interactive hand-off and teardown

pub mod allocator;
pub mod config;
pub mod error;
pub mod linker;
pub mod node;
pub mod repl;
pub mod sanitize;
pub mod session;

pub use allocator::ResourceAllocator;
pub use config::{ElixirSettings, EpochSettings, HarnessConfig, ReplSettings};
pub use error::{HarnessError, Result};
pub use linker::link;
pub use node::{ElixirNode, EpochNode, Node, NodeKind, SyncEndpoint};
pub use repl::{ReplProcess, DETACH_LINE};
pub use session::{CleanupReport, Session};
