use clap::Parser;
use dirwatch::cli::commands::{init, watch};
use dirwatch::cli::{Cli, Commands};
use dirwatch::{Settings, WatchError};

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let command = cli.command();

    // Init writes the file that later commands load
    if let Commands::Init { force } = command {
        dirwatch::logging::init();
        return init::run_init(force);
    }

    let config = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| WatchError::Settings {
        reason: e.to_string(),
    })?;

    dirwatch::logging::init_with_config(&config.logging);

    match command {
        Commands::Watch { dir, filter } => watch::run_watch(dir, filter, &config),
        Commands::Config => init::run_config(&config),
        // Handled above
        Commands::Init { .. } => Ok(()),
    }
}
