//! Message distribution across local chat participants
//!
//! A shared broadcast bus stands in for cross-tab messaging: every store
//! and simulator in the process sees every envelope.

mod channel;
mod store;

pub use channel::BroadcastBus;
pub use store::ChatStore;
