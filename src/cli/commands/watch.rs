//! Watch command: print every change in a directory until Enter is pressed.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::Context;

use crate::config::Settings;
use crate::watcher::{EventKind, FileEvent, WatchError, WatchSession};

/// Console line for one event.
pub fn describe(event: &FileEvent) -> String {
    match event.old_path() {
        Some(old) => format!(
            "{:<9}{} => {}",
            event.kind().as_str(),
            old.display(),
            event.path().display()
        ),
        None => format!("{:<9}{}", event.kind().as_str(), event.path().display()),
    }
}

/// Console line for an error from the session.
pub fn describe_error(error: &WatchError) -> String {
    if error.is_terminal() {
        format!("Watching stopped: {error}")
    } else {
        format!("Error: {error}")
    }
}

/// Run watch command.
///
/// `dir` and `filter` override the loaded settings.
pub fn run_watch(
    dir: Option<PathBuf>,
    filter: Option<String>,
    config: &Settings,
) -> anyhow::Result<()> {
    let mut settings = config.clone();
    if let Some(dir) = dir {
        settings.directory = Some(dir);
    }
    if let Some(filter) = filter {
        settings.watch.filter = filter;
    }

    if settings.directory.is_none() {
        anyhow::bail!(
            "No directory to watch. Pass one as an argument or set `directory` in .dirwatch/settings.toml"
        );
    }

    let mut session = WatchSession::from_settings(&settings)?;

    for kind in EventKind::ALL {
        session.on(kind, |event: &FileEvent| {
            println!("{}", describe(event));
            Ok(())
        });
    }
    session.on_error(|error| eprintln!("{}", describe_error(error)));

    session.start()?;
    println!("Watching {}", session.directory().display());
    println!("Press Enter to stop.");

    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;

    session.stop();
    println!("Stopped watching {}", session.directory().display());
    Ok(())
}
