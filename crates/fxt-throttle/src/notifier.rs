//! Version-gated delivery to one subscriber.
//!
//! A [`ProcessorNotifier`] is owned by exactly one delivery worker. On each
//! drained task it reads the live rate cell, compares the version against the
//! last version it delivered for that symbol, and calls the subscriber only
//! when the cell is strictly newer. Because the value is read at drain time,
//! the subscriber always gets the freshest rate, never one captured when the
//! task was enqueued.
//!
//! # Thread safety
//!
//! Not thread-safe. The last-notified table is confined to the owning worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use fxt_core::rate::RateRegistry;
use fxt_core::types::SymbolId;
use tracing::error;

use crate::processor::{PriceProcessor, ProcessorKey};
use crate::stats::{EngineCounters, bump};

/// What happened to one drained task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notified {
    /// The subscriber was called with this version.
    Delivered { version: u64, rate: f64 },
    /// The cell holds nothing newer than what was already delivered.
    Stale,
    /// The subscriber was called and panicked. The version counts as
    /// delivered.
    Panicked { version: u64 },
}

pub struct ProcessorNotifier {
    processor: Arc<dyn PriceProcessor>,
    key: ProcessorKey,
    registry: Arc<RateRegistry>,
    last_notified: Vec<u64>,
    counters: Arc<EngineCounters>,
}

impl ProcessorNotifier {
    pub fn new(
        processor: Arc<dyn PriceProcessor>,
        registry: Arc<RateRegistry>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        let symbols = registry.universe().len();
        Self {
            key: ProcessorKey::of(&processor),
            processor,
            registry,
            last_notified: vec![0; symbols],
            counters,
        }
    }

    /// Last version delivered for `id`, `0` if none.
    pub fn last_notified(&self, id: SymbolId) -> u64 {
        self.last_notified[id.index()]
    }

    /// Deliver the current rate of `id` if it is newer than the last one
    /// delivered.
    pub fn notify(&mut self, id: SymbolId) -> Notified {
        let snap = self.registry.read(id);
        let last = &mut self.last_notified[id.index()];
        if snap.version <= *last {
            bump(&self.counters.stale_skipped);
            return Notified::Stale;
        }
        // Recorded before the call so a panicking subscriber is not handed
        // the same version again.
        *last = snap.version;

        let symbol = self.registry.universe().name_of(id);
        let processor = &self.processor;
        match std::panic::catch_unwind(AssertUnwindSafe(|| processor.on_price(symbol, snap.value))) {
            Ok(()) => {
                bump(&self.counters.delivered);
                Notified::Delivered { version: snap.version, rate: snap.value }
            }
            Err(payload) => {
                bump(&self.counters.callback_panics);
                error!(
                    "subscriber {} panicked on {symbol} v{}: {}",
                    self.key,
                    snap.version,
                    panic_message(payload.as_ref())
                );
                Notified::Panicked { version: snap.version }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::processor_fn;
    use fxt_core::types::SymbolUniverse;
    use parking_lot::Mutex;

    fn setup() -> (Arc<RateRegistry>, Arc<EngineCounters>) {
        let u = SymbolUniverse::new(["EURUSD", "EURRUB", "USDRUB"]).unwrap();
        (Arc::new(RateRegistry::new(Arc::new(u))), Arc::new(EngineCounters::default()))
    }

    #[test]
    fn delivers_only_newer_versions() {
        let (registry, counters) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let p = processor_fn(move |s, r| sink.lock().push((s.to_string(), r)));
        let mut n = ProcessorNotifier::new(p, Arc::clone(&registry), Arc::clone(&counters));
        let id = registry.universe().id_of("EURUSD").unwrap();

        // Nothing published yet.
        assert_eq!(n.notify(id), Notified::Stale);

        registry.publish(id, 1.5);
        assert_eq!(n.notify(id), Notified::Delivered { version: 1, rate: 1.5 });
        assert_eq!(n.notify(id), Notified::Stale);

        registry.publish(id, 1.6);
        registry.publish(id, 1.7);
        assert_eq!(n.notify(id), Notified::Delivered { version: 3, rate: 1.7 });
        assert_eq!(n.last_notified(id), 3);

        assert_eq!(*seen.lock(), vec![("EURUSD".to_string(), 1.5), ("EURUSD".to_string(), 1.7)]);
        let stats = counters.snapshot();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.stale_skipped, 2);
    }

    #[test]
    fn versions_tracked_per_symbol() {
        let (registry, counters) = setup();
        let mut n = ProcessorNotifier::new(processor_fn(|_, _| {}), Arc::clone(&registry), counters);
        let usd = registry.universe().id_of("EURUSD").unwrap();
        let rub = registry.universe().id_of("EURRUB").unwrap();

        registry.publish(usd, 1.0);
        registry.publish(usd, 1.1);
        registry.publish(rub, 90.0);
        assert!(matches!(n.notify(usd), Notified::Delivered { version: 2, .. }));
        assert!(matches!(n.notify(rub), Notified::Delivered { version: 1, .. }));
        assert_eq!(n.last_notified(usd), 2);
        assert_eq!(n.last_notified(rub), 1);
    }

    #[test]
    fn panicking_subscriber_is_contained() {
        let (registry, counters) = setup();
        let p = processor_fn(|_, rate| {
            if rate < 0.0 {
                panic!("negative rate");
            }
        });
        let mut n = ProcessorNotifier::new(p, Arc::clone(&registry), Arc::clone(&counters));
        let id = registry.universe().id_of("USDRUB").unwrap();

        registry.publish(id, -1.0);
        assert_eq!(n.notify(id), Notified::Panicked { version: 1 });
        // Not retried.
        assert_eq!(n.notify(id), Notified::Stale);

        registry.publish(id, 75.0);
        assert!(matches!(n.notify(id), Notified::Delivered { version: 2, .. }));
        assert_eq!(counters.snapshot().callback_panics, 1);
    }
}
