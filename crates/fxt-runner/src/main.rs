//! # fxt-runner
//!
//! Demonstration entry point for the FX rate throttler.
//!
//! Loads an optional JSON configuration file, starts the engine, attaches a
//! logging subscriber and a deliberately slow one, and drives every symbol
//! with a synthetic random walk from its own producer thread until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! fxt-runner config.json --log-level info --interval-us 50
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use fxt_core::config::ThrottlerConfig;
use fxt_core::logging::LogFormat;
use fxt_throttle::{PriceProcessor, PriceThrottler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

/// FX Rate Throttler Demo Runner.
#[derive(Parser)]
#[command(name = "fxt-runner", about = "FX Rate Throttler Demo Runner")]
struct Cli {
    /// Configuration file path (JSON). Built-in defaults when omitted.
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Optional log directory for file output.
    #[arg(long)]
    log_dir: Option<String>,

    /// Log line format (text or json). Overrides the config file.
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Pause between two updates of the same symbol, in microseconds.
    #[arg(long, default_value_t = 100)]
    interval_us: u64,

    /// Delay of the slow subscriber per callback, in milliseconds.
    #[arg(long, default_value_t = 250)]
    slow_ms: u64,

    /// Statistics report period in seconds.
    #[arg(long, default_value_t = 5)]
    report_secs: u64,
}

/// Counts callbacks and logs them at debug level.
struct LoggingProcessor {
    name: &'static str,
    received: AtomicU64,
    delay: Option<Duration>,
}

impl LoggingProcessor {
    fn new(name: &'static str, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self { name, received: AtomicU64::new(0), delay })
    }
}

impl PriceProcessor for LoggingProcessor {
    fn on_price(&self, symbol: &str, rate: f64) {
        if let Some(d) = self.delay {
            std::thread::sleep(d);
        }
        self.received.fetch_add(1, Ordering::Relaxed);
        debug!("[{}] {symbol} = {rate:.5}", self.name);
    }
}

/// Seeded multiplicative random walk around `start`.
struct Walk {
    rng: StdRng,
    rate: f64,
}

impl Walk {
    fn new(seed: u64, start: f64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), rate: start }
    }

    fn next(&mut self) -> f64 {
        let step: f64 = self.rng.random_range(-1.0..=1.0);
        self.rate = (self.rate * (1.0 + step * 1e-4)).max(1e-6);
        self.rate
    }
}

fn spawn_producers(
    throttler: &Arc<PriceThrottler>,
    running: &Arc<AtomicBool>,
    interval: Duration,
) -> Result<Vec<std::thread::JoinHandle<()>>> {
    let symbols: Vec<String> = throttler.universe().iter().map(|(_, s)| s.to_string()).collect();
    let mut handles = Vec::with_capacity(symbols.len());

    // One thread per symbol keeps a single writer per registry cell.
    for (i, symbol) in symbols.into_iter().enumerate() {
        let throttler = Arc::clone(throttler);
        let running = Arc::clone(running);
        let handle = std::thread::Builder::new()
            .name(format!("fxt-prod-{i}"))
            .spawn(move || {
                let mut walk = Walk::new(0x9E37_79B9_7F4A_7C15 ^ i as u64, 1.0 + i as f64);
                while running.load(Ordering::Relaxed) {
                    if let Err(e) = throttler.on_price(&symbol, walk.next()) {
                        error!("producer {symbol} stopping: {e}");
                        break;
                    }
                    if !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
            })?;
        handles.push(handle);
    }
    Ok(handles)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = match &cli.config {
        Some(path) => fxt_core::config::load_config(path)?,
        None => ThrottlerConfig::default(),
    }
    .with_env_overrides()?;

    // 2. Initialize logging
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    let log_format = cli.log_format.unwrap_or_else(|| config.log_format());
    fxt_core::logging::init_logging(&cli.log_level, log_dir.as_deref(), &config.module_name(), log_format);

    info!(
        "fxt-runner starting — symbols={:?}, distributors={}, channels/subscriber={}",
        config.symbols, config.distributors_count, config.notifiers_per_processor_count,
    );

    // 3. Start the engine and subscribers
    let throttler = Arc::new(PriceThrottler::new(&config)?);
    let fast = LoggingProcessor::new("fast", None);
    let slow = LoggingProcessor::new("slow", Some(Duration::from_millis(cli.slow_ms)));
    throttler.subscribe(Arc::clone(&fast) as Arc<dyn PriceProcessor>)?;
    throttler.subscribe(Arc::clone(&slow) as Arc<dyn PriceProcessor>)?;

    // 4. Start producers
    let running = Arc::new(AtomicBool::new(true));
    let producers = spawn_producers(&throttler, &running, Duration::from_micros(cli.interval_us))?;
    info!("{} producer(s) started — press Ctrl+C to stop", producers.len());

    // 5. Report until shutdown signal
    let mut ticker = tokio::time::interval(Duration::from_secs(cli.report_secs.max(1)));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                info!(
                    "{} | fast={} slow={}",
                    throttler.stats(),
                    fast.received.load(Ordering::Relaxed),
                    slow.received.load(Ordering::Relaxed),
                );
            }
            res = tokio::signal::ctrl_c() => {
                res?;
                info!("shutdown signal received");
                break;
            }
        }
    }

    // 6. Stop producers, then the engine
    running.store(false, Ordering::Relaxed);
    for handle in producers {
        if handle.join().is_err() {
            error!("producer thread panicked");
        }
    }
    throttler.shutdown();

    info!("stopped — goodbye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_is_deterministic_and_positive() {
        let mut a = Walk::new(42, 1.1);
        let mut b = Walk::new(42, 1.1);
        for _ in 0..10_000 {
            let x = a.next();
            assert_eq!(x, b.next());
            assert!(x > 0.0);
        }
    }

    #[test]
    fn walk_steps_stay_small() {
        let mut w = Walk::new(7, 1.25);
        let mut prev = 1.25;
        for _ in 0..1_000 {
            let x = w.next();
            assert!((x / prev - 1.0).abs() <= 1e-4 + 1e-12);
            prev = x;
        }
        let mut other = Walk::new(8, 1.25);
        assert_ne!(Walk::new(7, 1.25).next(), other.next());
    }

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::try_parse_from(["fxt-runner"]).unwrap();
        assert!(cli.config.is_none());
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.interval_us, 100);
        assert!(cli.log_format.is_none());
    }

    #[test]
    fn cli_parses_log_format() {
        let cli = Cli::try_parse_from(["fxt-runner", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, Some(LogFormat::Json));
        assert!(Cli::try_parse_from(["fxt-runner", "--log-format", "xml"]).is_err());
    }
}
