use tracing::Level;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Logs go to stderr; stdout carries script output only.
pub fn init_tracing() {
    let envfilter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::Registry::default()
        .with(
            tracing_subscriber::fmt::Layer::default()
                .with_writer(std::io::stderr)
                .with_filter(envfilter),
        )
        .init();
}
