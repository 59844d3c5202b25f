//! Coinbase module - Client implementation for the Coinbase Exchange API

pub mod auth;
pub mod gateway;
pub mod messages;
pub mod rest;
pub mod websocket;

pub use gateway::CoinbaseOrderGateway;
pub use rest::CoinbaseRestClient;
pub use websocket::{parse_feed_message, CoinbaseFeedClient, FeedMessage};
