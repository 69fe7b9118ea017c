use crate::config::LogConfig;

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// configured level.
#[cfg(feature = "trace")]
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    use crate::config::LogFormat;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .try_init()?,
    }

    Ok(())
}

#[cfg(not(feature = "trace"))]
pub fn init_tracing(_config: &LogConfig) -> anyhow::Result<()> {
    Ok(())
}
