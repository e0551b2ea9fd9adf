//! OSC transport to the AbletonOSC control surface
//!
//! The session layer talks to Live through the [`OscTransport`] trait;
//! [`OscClient`] is the UDP implementation.

pub mod client;
pub mod codec;
pub mod correlation;

use async_trait::async_trait;

use crate::error::BridgeResult;

pub use client::OscClient;
pub use codec::{decode_packet, OscArg, OscMessage};
pub use correlation::{CorrelationKey, PendingTable};

/// Request/response access to the control surface
///
/// All methods take `&self` so one transport can be shared as
/// `Arc<dyn OscTransport>` by concurrent callers.
#[async_trait]
pub trait OscTransport: Send + Sync {
    /// Send a query and wait for its correlated reply.
    ///
    /// Returns the reply arguments with the echoed query arguments removed,
    /// e.g. `/live/track/get/name 3` answers `[name]`.
    async fn query(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<Vec<OscArg>>;

    /// Send a command that has no reply
    async fn send(&self, address: &str, args: Vec<OscArg>) -> BridgeResult<()>;

    /// Release the underlying channel; the next call reopens it
    async fn close(&self) {}
}
