//! CLI argument definitions using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Parish - database-per-tenant connection manager
#[derive(Parser, Debug)]
#[command(name = "parish")]
#[command(version)]
#[command(about = "Parish - database-per-tenant connection manager", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to parish.toml
    #[arg(short, long, global = true, env = "PARISH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP server
    Serve(ServeArgs),

    /// Inspect and administer tenants
    Tenants(TenantsArgs),

    /// Configuration commands
    Config(ConfigArgs),

    /// Display version information
    Version,
}

// =============================================================================
// Serve Command
// =============================================================================

/// Arguments for the `serve` command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind, overriding [server] bind
    #[arg(short, long)]
    pub bind: Option<String>,
}

// =============================================================================
// Tenants Command
// =============================================================================

/// Arguments for the `tenants` command
#[derive(Args, Debug)]
pub struct TenantsArgs {
    #[command(subcommand)]
    pub command: TenantsSubcommand,
}

/// Tenant subcommands
#[derive(Subcommand, Debug)]
pub enum TenantsSubcommand {
    /// List registered tenants
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one tenant
    Show {
        /// Tenant id
        id: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop serving a tenant
    Disable {
        /// Tenant id
        id: String,
    },

    /// Resume serving a disabled tenant
    Enable {
        /// Tenant id
        id: String,
    },

    /// Delete a tenant record and its store
    Purge {
        /// Tenant id
        id: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove stores and reservations left by interrupted provisioning
    SweepOrphans,
}

// =============================================================================
// Config Command
// =============================================================================

/// Arguments for the `config` command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigSubcommand {
    /// Validate the effective configuration
    Check,

    /// Print the effective configuration as TOML
    Show,
}
