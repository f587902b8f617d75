//! Init and Config commands.

use crate::config::Settings;

/// Run init command - create `.dirwatch/settings.toml` in the current directory.
pub fn run_init(force: bool) -> anyhow::Result<()> {
    let path = Settings::init_config_file(".", force).map_err(|e| anyhow::anyhow!("{e}"))?;

    println!("Created configuration file at: {}", path.display());
    println!("Edit this file to customize your settings.");
    Ok(())
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) -> anyhow::Result<()> {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
