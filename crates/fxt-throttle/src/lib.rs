//! # fxt-throttle
//!
//! Rate-throttling fan-out engine for high-frequency FX price feeds.
//!
//! ## Architecture
//!
//! Producers call [`PriceThrottler::on_price`]. The rate is stored in the
//! versioned registry, then one of D [`distributor::Distributor`]s (chosen by
//! symbol hash) forwards the symbol to each subscriber's conflating
//! [`delivery::DeliveryChannel`]. The channel worker reads the live rate and
//! calls the subscriber only if the version is newer than the last one it
//! delivered, so bursts collapse and slow subscribers never hold up fast
//! ones.
//!
//! ## Modules
//!
//! - [`throttler`] — ingress, subscribe/unsubscribe, shutdown
//! - [`distributor`] — per-shard sequential dispatch
//! - [`delivery`] — conflating queue + worker
//! - [`notifier`] — version-gated subscriber calls
//! - [`processor`] — the subscriber capability
//! - [`stats`] — engine counters

pub mod delivery;
pub mod distributor;
pub mod notifier;
pub mod processor;
pub mod stats;
pub mod throttler;

pub use processor::{PriceProcessor, ProcessorKey, processor_fn};
pub use stats::EngineStats;
pub use throttler::PriceThrottler;
