//! `metro_client`
//!
//! Client-side systems:
//! - Connection management (lifecycle, bounded reconnection, typed events)
//! - Transports (TCP link task)
//! - Client store fed by authoritative snapshots
//! - Routes for the two views

pub mod connection;
pub mod route;
pub mod store;
pub mod transport;

pub use connection::{ConnectionManager, Lifecycle};
pub use store::MapStore;
pub use transport::TcpTransport;
