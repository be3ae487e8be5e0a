//! Typed event bus: a fixed, closed event set delivered over a
//! `broadcast` channel, rather than an open-ended listener map.

use kvb_protocol::Value;

#[derive(Clone, Debug)]
pub enum ClientEvent {
    Connected,
    Ready,
    Disconnected,
    Error(String),
    DataUpdate {
        collection: String,
        key: String,
        operation: String,
        value: Option<Value>,
    },
    MaxReconnectAttemptsReached,
}
