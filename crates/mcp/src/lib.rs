//! Tool layer and JSON-RPC dispatch over `roux_store::Store` (spec §6/§7):
//! input validation, content truncation, and the MCP-shaped request/response
//! envelopes the `roux` binary speaks over stdio.

pub mod dispatch;
pub mod tools;
pub mod truncate;

pub use dispatch::{dispatch_jsonrpc, run_stdio_loop};
