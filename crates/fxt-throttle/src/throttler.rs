//! Ingress and lifecycle of the throttling engine.
//!
//! # Architecture
//!
//! ```text
//! on_price(S, r) ──► RateRegistry.publish(S)          (version + 1)
//!                ──► distributors[hash(S) % D]         (bounded queue)
//!                        └─► per subscriber: channels[hash'(S) % N]
//!                                └─► worker ─► notifier ─► subscriber.on_price
//! ```
//!
//! All updates of one symbol land on the same distributor and, per
//! subscriber, on the same channel, so each subscriber observes that symbol
//! with strictly increasing versions.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fxt_core::config::ThrottlerConfig;
use fxt_core::cpu_affinity::core_for_worker;
use fxt_core::error::{Result, ThrottleError};
use fxt_core::rate::{RateRegistry, RateSnapshot};
use fxt_core::shard::distributor_index;
use fxt_core::types::SymbolUniverse;
use tracing::{debug, info, warn};

use crate::distributor::{Distributor, DistributorContext};
use crate::processor::{PriceProcessor, ProcessorKey};
use crate::stats::{EngineCounters, EngineStats, bump};

/// Rate-throttling fan-out engine.
///
/// `on_price` for a given symbol must not be called concurrently from two
/// threads; otherwise the order of the racing values is unspecified.
pub struct PriceThrottler {
    registry: Arc<RateRegistry>,
    distributors: Box<[Distributor]>,
    counters: Arc<EngineCounters>,
    stopped: AtomicBool,
}

impl PriceThrottler {
    /// Build the registry and spawn the distributor workers.
    pub fn new(config: &ThrottlerConfig) -> Result<Self> {
        config.validate()?;

        let universe = Arc::new(SymbolUniverse::new(&config.symbols)?);
        let registry = Arc::new(RateRegistry::new(universe));
        let counters = Arc::new(EngineCounters::default());
        let ctx = DistributorContext {
            registry: Arc::clone(&registry),
            counters: Arc::clone(&counters),
            channels_per_subscriber: config.notifiers_per_processor_count,
            queue_capacity: config.dispatch_queue_capacity,
        };

        let cores = config.distributor_cpu_affinity.as_deref();
        let distributors = (0..config.distributors_count)
            .map(|i| Distributor::spawn(i, ctx.clone(), core_for_worker(cores, i)))
            .collect::<Result<Box<[_]>>>()?;

        info!(
            "throttler started — {} symbol(s), {} distributor(s), {} channel(s) per subscriber",
            registry.universe().len(),
            config.distributors_count,
            config.notifiers_per_processor_count,
        );

        Ok(Self {
            registry,
            distributors,
            counters,
            stopped: AtomicBool::new(false),
        })
    }

    /// Publish a new rate and hand it to its distributor. Does not wait for
    /// delivery.
    ///
    /// Fails with `UnknownSymbol` outside the universe and `EngineStopped`
    /// after [`shutdown`](Self::shutdown).
    pub fn on_price(&self, symbol: &str, rate: f64) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ThrottleError::EngineStopped);
        }
        let universe = self.registry.universe();
        let id = universe.id_of(symbol)?;
        self.registry.publish(id, rate);
        bump(&self.counters.published);

        let d = distributor_index(universe.hash_of(id), self.distributors.len());
        self.distributors[d].dispatch(id)
    }

    /// Register `processor` on every distributor.
    ///
    /// Returns `false` if it was already subscribed.
    pub fn subscribe(&self, processor: Arc<dyn PriceProcessor>) -> Result<bool> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(ThrottleError::EngineStopped);
        }
        let key = ProcessorKey::of(&processor);

        let mut added = Vec::new();
        for (i, dist) in self.distributors.iter().enumerate() {
            match dist.add_subscriber(&processor) {
                Ok(true) => added.push(i),
                Ok(false) => {}
                Err(e) => {
                    warn!("subscribe {key} failed on distributor {i}: {e}");
                    for &j in &added {
                        self.distributors[j].remove_subscriber(key);
                    }
                    return Err(e);
                }
            }
        }

        let added = !added.is_empty();
        if added {
            info!("subscriber {key} added");
        } else {
            debug!("subscriber {key} already subscribed");
        }
        Ok(added)
    }

    /// Remove `processor` from every distributor.
    ///
    /// After this returns no new callback is started for it. Only a callback
    /// that had already started when its channel closed may still complete.
    /// Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, processor: &Arc<dyn PriceProcessor>) -> bool {
        let key = ProcessorKey::of(processor);
        let mut removed = false;
        for dist in self.distributors.iter() {
            removed |= dist.remove_subscriber(key);
        }
        if removed {
            info!("subscriber {key} removed");
        }
        removed
    }

    /// Stop accepting work and tear down all workers.
    ///
    /// Pending conflated tasks are abandoned. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        for dist in self.distributors.iter() {
            dist.shutdown();
        }
        info!("throttler stopped — {}", self.stats());
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Number of distinct subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.distributors
            .first()
            .map(Distributor::subscriber_count)
            .unwrap_or(0)
    }

    /// Latest published rate of `symbol`.
    pub fn latest(&self, symbol: &str) -> Result<RateSnapshot> {
        self.registry.read_named(symbol)
    }

    pub fn universe(&self) -> &SymbolUniverse {
        self.registry.universe()
    }

    pub fn stats(&self) -> EngineStats {
        self.counters.snapshot()
    }
}

/// Lets one engine feed another.
impl PriceProcessor for PriceThrottler {
    fn on_price(&self, symbol: &str, rate: f64) {
        if let Err(e) = PriceThrottler::on_price(self, symbol, rate) {
            warn!("chained throttler rejected {symbol}: {e}");
        }
    }
}

impl Drop for PriceThrottler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
