//! SMS Relay - forwards incoming short messages to a chat webhook
//!
//! Classifies each message as a verification code or not, applies the
//! forwarding policy, and delivers accepted messages in the background with
//! bounded retry.

pub mod classifier;
pub mod clock;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod messages;
pub mod network;
pub mod policy;
pub mod store;

pub use error::{DeliveryError, Error, Result};
