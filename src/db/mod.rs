//! Persistence module for batlink.
//!
//! Provides the key-value stores and the session store built on them.

mod models;
mod session;
mod store;

pub use models::*;
pub use session::*;
pub use store::*;
