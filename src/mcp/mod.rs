//! MCP surface: tool registry, argument schemas and the stdio JSON-RPC server

pub mod params;
pub mod server;
pub mod stdio;

pub use server::{tool_definitions, AbletonMcp, ToolDefinition};
pub use stdio::{serve, serve_stdio, PROTOCOL_VERSION};
