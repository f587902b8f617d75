//! CLI argument parsing using clap.

use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Watch a directory and report file changes
#[derive(Parser, Debug)]
#[command(
    name = "dirwatch",
    version = env!("CARGO_PKG_VERSION"),
    about = "Watch a directory and report file changes",
    long_about = "Watch one directory (non-recursively) and print created, deleted, \
                  modified and renamed entries until Enter is pressed.",
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true, env = "DIRWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// The subcommand to run; `watch` of the configured directory when none is given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Watch {
            dir: None,
            filter: None,
        })
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Watch a directory until Enter is pressed
    Watch {
        /// Directory to watch (overrides config)
        dir: Option<PathBuf>,

        /// Glob matched against file names (overrides config)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Create .dirwatch/settings.toml in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,
}
