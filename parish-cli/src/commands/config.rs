//! `parish config` commands.

use std::path::Path;

use parish_core::config::ParishConfig;

use crate::cli::{ConfigArgs, ConfigSubcommand};
use crate::error::CliResult;
use crate::output::{self, kv, success};

const REDACTED: &str = "<redacted>";

/// Run the config command
pub async fn run(config_path: Option<&Path>, args: ConfigArgs) -> CliResult<()> {
    let config = super::load_config(config_path)?;
    match args.command {
        ConfigSubcommand::Check => check(&config),
        ConfigSubcommand::Show => show(config),
    }
}

fn check(config: &ParishConfig) -> CliResult<()> {
    config.validate()?;

    output::header("Configuration");
    kv("Registry", &config.registry.url);
    kv("Data dir", &config.storage.data_dir.display().to_string());
    kv("Bind", &config.server.bind);
    kv(
        "Pool",
        &format!(
            "capacity {}, {} per tenant",
            config.pool.capacity, config.pool.max_per_tenant
        ),
    );
    kv(
        "Cache",
        if config.cache.enabled {
            "enabled"
        } else {
            "disabled"
        },
    );
    output::newline();
    success("Configuration is valid");
    Ok(())
}

fn show(mut config: ParishConfig) -> CliResult<()> {
    if config.auth.jwt_secret.is_some() {
        config.auth.jwt_secret = Some(REDACTED.to_string());
    }
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
