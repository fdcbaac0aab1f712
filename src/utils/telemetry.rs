use tracing::Level;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber shared by both binaries
pub fn config_tracing(default_level: Level) {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "1")
    }

    let tracing_layer = tracing_subscriber::fmt::layer();
    let filter = filter::Targets::new()
        .with_target("hyper::proto", Level::INFO)
        .with_target("sqlx::query", Level::WARN)
        .with_target("tower_http::trace", Level::DEBUG)
        .with_default(default_level);

    tracing_subscriber::registry()
        .with(tracing_layer)
        .with(filter)
        .init();
}
