//! Domain logic exposed over the MCP protocol
//!
//! Request configuration resolution, the n8n tool catalogue and resources.

pub mod request_config;
pub mod resources;
pub mod tools;
