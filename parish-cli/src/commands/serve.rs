//! `parish serve` - Run the HTTP server.

use std::path::Path;

use parish_core::logging;

use crate::cli::ServeArgs;
use crate::error::CliResult;
use crate::output;

/// Run the serve command
pub async fn run(config_path: Option<&Path>, args: ServeArgs) -> CliResult<()> {
    logging::init();

    let mut config = super::load_config(config_path)?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config.validate()?;

    output::header("Parish");
    output::kv("Bind", &config.server.bind);
    output::kv("Registry", &config.registry.url);
    output::kv("Data dir", &config.storage.data_dir.display().to_string());
    output::kv("Pool capacity", &config.pool.capacity.to_string());
    output::newline();

    parish_axum::run(&config).await?;
    output::success("Server stopped");
    Ok(())
}
