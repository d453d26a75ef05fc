//! `parish version` command - Display version information.

use crate::error::CliResult;
use crate::output::{self, kv};

/// Package version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command
pub async fn run() -> CliResult<()> {
    output::header("Parish");

    kv("Version", VERSION);

    #[cfg(debug_assertions)]
    let build_mode = "debug";
    #[cfg(not(debug_assertions))]
    let build_mode = "release";

    kv("Build", build_mode);
    kv("Storage engine", "sqlite");

    output::newline();
    output::section("Components");
    kv("parish-core", VERSION);
    kv("parish-sqlite", VERSION);
    kv("parish-axum", VERSION);

    Ok(())
}
