//! Custom CDP implementation
//!
//! Minimal DevTools protocol plumbing with stealth command filtering,
//! per-session event routing, and a scripted mock backend for tests.

pub mod connection;
pub mod mock;
pub mod transport;
pub mod types;

pub use connection::{Connection, Session};
pub use mock::MockState;
pub use transport::{launch_chrome, CdpEvent, Transport};
pub use types::*;
