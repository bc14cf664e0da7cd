use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides `default_level`;
/// later calls are no-ops.
pub fn init_logging(default_level: &str, format: LogFormat) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level))
            .add_directive(quiet("hyper=warn"))
            .add_directive(quiet("reqwest=warn"));
        let builder = tracing_subscriber::fmt()
            .with_target(true)
            .with_env_filter(filter);
        let installed = match format {
            LogFormat::Json => builder.json().with_thread_ids(true).try_init(),
            LogFormat::Text => builder.try_init(),
        };
        if installed.is_ok() {
            tracing::info!(level = default_level, ?format, "logging initialized");
        }
    });
}

fn quiet(directive: &str) -> tracing_subscriber::filter::Directive {
    directive
        .parse()
        .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::WARN.into())
}
