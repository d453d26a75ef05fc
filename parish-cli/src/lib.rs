//! Parish CLI - operator tool for the tenant connection manager.
//!
//! Runs the HTTP server and administers the tenant registry: listing,
//! enabling, disabling and purging tenants, and reconciling stores left by
//! interrupted provisioning.

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
