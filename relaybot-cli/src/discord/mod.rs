//! Discord adapter: REST platform, gateway client and wire types.

pub mod gateway;
pub mod http;
pub mod model;

pub use gateway::{Gateway, GatewayEvent};
pub use http::DiscordPlatform;
