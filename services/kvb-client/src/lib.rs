//! `kvb-client` (C8): a reconnecting WebSocket client for the key/value
//! broker.

pub mod config;
pub mod error;
pub mod events;
pub mod session;
pub mod state;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::ClientEvent;
pub use session::BrokerClient;
pub use state::ClientState;

pub use kvb_protocol::{RequestType, Value};
