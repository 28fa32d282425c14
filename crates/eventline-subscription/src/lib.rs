//! Eventline Subscription — catch-up subscriptions over the event log.
//!
//! A [`CatchUpSubscription`] leases the partitions of the log for one
//! subscriber, replays every record past the saved checkpoints, then keeps
//! polling for new ones. Records are delivered to an [`EventHandler`] before
//! the checkpoint that covers them is saved, so delivery is at-least-once.

pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod state;

pub use config::SubscriptionConfig;
pub use engine::{CatchUpSubscription, SubscriptionHandle, SubscriptionOutcome};
pub use error::SubscriptionError;
pub use handler::{EventHandler, HandlerError};
pub use state::SubscriptionState;
