//! Integration tests for MULTISCAN.
//!
//! Exercise the public library API end to end with in-memory
//! collaborators.

mod mock_sources;
mod scan_flow;
