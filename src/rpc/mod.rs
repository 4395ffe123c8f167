//! Remote procedure calls over a REPL channel.
//!
//! # Architecture
//!
//! ```text
//! Registry ---> Executor ---> Channel (write / read_until)
//!                  |
//!                  +-- protocol (response markers)
//!                  +-- literal  (argument and result values)
//! ```
//!
//! Procedures are shipped as text the first time they are used on a
//! connection. Calls go through a small prelude on the remote side that turns
//! results and exceptions into marker lines.

pub mod executor;
pub mod protocol;
pub mod registry;
pub mod signature;

pub use executor::{Args, Executor, Session, SessionStatus, PRELUDE};
pub use protocol::{parse_line, parse_response, ResponseEvent, RESPONSE_PREFIX};
pub use registry::{Procedure, ProcedureKind, RegisterOptions, Registry};
pub use signature::{dedent, remove_signature, Signature};
