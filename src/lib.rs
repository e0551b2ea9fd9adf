//! Ableton Live bridge for AI assistants
//!
//! Talks to Live through the AbletonOSC control surface and publishes the
//! operations as MCP tools over stdio. Stem export drives Live's export
//! dialog with GUI automation (macOS).

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod mcp;
pub mod osc;
pub mod paths;
pub mod session;

#[cfg(test)]
mod testing;

pub use context::BridgeContext;
pub use error::{BridgeError, BridgeResult, ErrorKind, ErrorReport};
