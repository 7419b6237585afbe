//! Subscriber set-up for the binary.

use tracing_subscriber::FmtSubscriber;

use crate::config::LogLevel;

/// Install the global `tracing` subscriber at the given verbosity.
pub fn init(level: LogLevel) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level.as_level())
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
