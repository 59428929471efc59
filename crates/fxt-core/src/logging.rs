//! Process-wide `tracing` subscriber for binaries embedding the engine.
//!
//! The engine crates only emit events. Every worker thread is named
//! (`fxt-dist-{i}`, `fxt-d{i}-{subscriber}-{n}`), so the thread name is
//! printed instead of the thread id: it tells which shard and which delivery
//! lane an event came from.
//!
//! Output goes to the console and, when a directory is given, to a daily
//! rotating file. [`LogFormat::Json`] switches both sinks to one JSON object
//! per line for log shippers.

use std::str::FromStr;

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Line format of every sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format {other:?} (expected text or json)")),
        }
    }
}

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

fn sink_layer<W>(writer: W, format: LogFormat, ansi: bool) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true);
    match format {
        LogFormat::Text => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Install the global subscriber. Call once at program start.
///
/// `RUST_LOG` wins over `log_level`. `module_name` is the file prefix used
/// under `log_dir`.
pub fn init_logging(log_level: &str, log_dir: Option<&str>, module_name: &str, format: LogFormat) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let mut layers = vec![sink_layer(std::io::stdout, format, true)];
    if let Some(dir) = log_dir {
        let file_appender = tracing_appender::rolling::daily(dir, module_name);
        layers.push(sink_layer(file_appender, format, false));
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();
}
