//! Sequential-node lock protocol
//!
//! - `directory`: root binding and path resolution
//! - `request`: acquisition state machine
//! - `ranking` / `admission`: ordering and admission cap over a sibling listing
//! - `contender` / `timer`: shared release state and the timeout racer
//! - `handle`: the token returned to callers

pub mod admission;
mod contender;
pub mod directory;
mod handle;
pub mod ranking;
mod request;
mod timer;

pub use contender::Phase;
pub use directory::{ContenderPath, LockClient, LockDirectory};
pub use handle::LockHandle;
