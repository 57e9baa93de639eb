//! Workspace umbrella crate. The integration tests under `tests/` drive the
//! `server` and `shared` crates through it.

pub use server;
pub use shared;
