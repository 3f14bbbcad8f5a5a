// Download session tracking — registry, durable snapshot, and the
// websocket connection state machine.

pub mod connection;
pub mod manager;
pub mod model;
pub mod registry;
pub mod store;
