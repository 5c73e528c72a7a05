//! oms-daemon library surface.
//!
//! `main.rs` stays thin; everything testable lives here so the scenario
//! tests can compose the router in-process.

pub mod api_types;
pub mod auth;
pub mod commands;
pub mod routes;
pub mod state;
