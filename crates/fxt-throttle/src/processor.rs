//! Subscriber-facing capability.

use std::sync::Arc;

/// Receiver of conflated, version-ordered rate updates.
///
/// `on_price` runs synchronously on one delivery worker. It may block; doing
/// so stalls only the channel that invoked it. For a given symbol calls are
/// never concurrent and arrive with strictly increasing versions.
pub trait PriceProcessor: Send + Sync + 'static {
    fn on_price(&self, symbol: &str, rate: f64);
}

/// Identity of a subscribed processor: the address of its `Arc` allocation.
///
/// Every clone of the same `Arc` maps to the same key, so subscribing twice
/// through different clones is still recognised as a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorKey(usize);

impl ProcessorKey {
    pub fn of(processor: &Arc<dyn PriceProcessor>) -> Self {
        Self(Arc::as_ptr(processor) as *const () as usize)
    }
}

impl std::fmt::Display for ProcessorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Adapter that wraps a closure into a [`PriceProcessor`].
struct FnProcessor<F>(F);

impl<F> PriceProcessor for FnProcessor<F>
where
    F: Fn(&str, f64) + Send + Sync + 'static,
{
    fn on_price(&self, symbol: &str, rate: f64) {
        (self.0)(symbol, rate);
    }
}

/// Build a processor from a closure.
///
/// ```ignore
/// let p = processor_fn(|symbol, rate| println!("{symbol} {rate}"));
/// throttler.subscribe(p)?;
/// ```
pub fn processor_fn<F>(f: F) -> Arc<dyn PriceProcessor>
where
    F: Fn(&str, f64) + Send + Sync + 'static,
{
    Arc::new(FnProcessor(f))
}
