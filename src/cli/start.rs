use anyhow::Result;

use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};

/// Parse arguments, install logging/tracing, and return the action to run.
///
/// # Errors
/// Returns an error on invalid arguments or telemetry setup failure.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity_level = match matches.get_one::<u8>("verbosity").map_or(0, |&v| v) {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    telemetry::init(Some(verbosity_level))?;

    let action = handler(&matches)?;

    Ok(action)
}
