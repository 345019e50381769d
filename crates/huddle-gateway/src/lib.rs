//! Realtime dispatch layer: authenticates socket sessions, tracks room
//! membership, persists inbound events and fans them out.

pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod gateway;
pub mod registry;
pub mod session;
pub mod store;

pub use gateway::Gateway;
