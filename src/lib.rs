//! replink - drive a line-oriented remote interpreter as if it exposed
//! ordinary procedures, and keep its filesystem in sync with a local tree.
//!
//! # Layout
//!
//! ```text
//! Device (lifecycle, sync entry point)
//!   +-- rpc::Registry      setup / task / teardown procedures
//!   +-- rpc::Executor      one command -> one response, sessions
//!   |     +-- rpc::protocol   response markers
//!   |     +-- literal         closed literal grammar
//!   +-- sync::SyncEngine   batched remote hashing, uploads, deletes
//!         +-- sync::planner   local discovery (pure)
//!         +-- sync::hash      FNV-1a
//! transport::Channel / transport::Transport   collaborator seams
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod literal;
pub mod rpc;
pub mod sync;
pub mod transport;

pub use device::Device;
pub use error::{Error, Result};
pub use literal::Value;
pub use rpc::{Args, Executor, ProcedureKind, RegisterOptions, Registry, Session, SessionStatus};
pub use sync::{HashStrategy, IgnoreSpec, KeepSpec, SyncOptions, SyncPlan, SyncReport};
pub use transport::{Channel, Transport};
