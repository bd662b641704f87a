use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, Layer, Registry};

/// Install the global subscriber used by the binaries.
///
/// `RUST_LOG` directives take precedence over `level`. Set
/// `UDP_BATCH_DISABLE_LOGS` to silence output entirely.
pub fn init_tracer(level: Option<LevelFilter>) -> anyhow::Result<()> {
    let default_filter = if cfg!(any(test, debug_assertions)) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let default_filter = level.unwrap_or(default_filter);
    let filter_layer = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env_lossy();

    if std::env::var("UDP_BATCH_DISABLE_LOGS").is_ok() {
        return Ok(());
    }

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_writer(std::io::stderr);
    let fmt_layer = if cfg!(any(test, debug_assertions)) {
        fmt_layer.with_file(true).with_line_number(true).boxed()
    } else {
        fmt_layer.boxed()
    };

    let subscriber = Registry::default().with(fmt_layer.with_filter(filter_layer));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
