//! Per-shard sequential dispatch.
//!
//! A [`Distributor`] owns one worker thread that drains its dispatch queue in
//! arrival order and forwards each symbol to every subscriber registered on
//! this shard. Each subscriber has N [`DeliveryChannel`]s here; a symbol
//! always goes to the same one (`channel_index(hash, N)`), so symbols sharing
//! a channel keep their order while unrelated symbols of the same subscriber
//! are delivered independently.
//!
//! # Subscriber map
//!
//! The map is copy-on-write behind a `parking_lot::RwLock`: subscribe and
//! unsubscribe swap in a new `Arc`, the worker clones the current `Arc` per
//! request and iterates that snapshot without holding the lock.

use std::sync::Arc;
use std::thread::JoinHandle;

use ahash::AHashMap;
use crossbeam_channel::{Receiver, Sender};
use fxt_core::error::{Result, ThrottleError};
use fxt_core::rate::RateRegistry;
use fxt_core::shard::channel_index;
use fxt_core::types::SymbolId;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::delivery::DeliveryChannel;
use crate::notifier::ProcessorNotifier;
use crate::processor::{PriceProcessor, ProcessorKey};
use crate::stats::{EngineCounters, bump};

enum Dispatch {
    Rate(SymbolId),
    Stop,
}

/// The N delivery channels of one subscriber on one shard.
struct Subscription {
    channels: Box<[DeliveryChannel]>,
}

impl Subscription {
    /// Close every channel. Returns how many callbacks were still in flight.
    fn shutdown(&self) -> usize {
        self.channels.iter().filter(|ch| ch.shutdown()).count()
    }
}

type SubscriberMap = AHashMap<ProcessorKey, Arc<Subscription>>;

/// Settings shared by all distributors of an engine.
#[derive(Clone)]
pub struct DistributorContext {
    pub registry: Arc<RateRegistry>,
    pub counters: Arc<EngineCounters>,
    pub channels_per_subscriber: usize,
    pub queue_capacity: usize,
}

pub struct Distributor {
    index: usize,
    ctx: DistributorContext,
    tx: Sender<Dispatch>,
    subscribers: Arc<RwLock<Arc<SubscriberMap>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Distributor {
    /// Spawn distributor `index`, optionally pinned to `cpu_core`.
    pub fn spawn(index: usize, ctx: DistributorContext, cpu_core: Option<i32>) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded::<Dispatch>(ctx.queue_capacity);
        let subscribers: Arc<RwLock<Arc<SubscriberMap>>> = Arc::default();

        let worker_subs = Arc::clone(&subscribers);
        let worker_ctx = ctx.clone();
        let worker = std::thread::Builder::new()
            .name(format!("fxt-dist-{index}"))
            .spawn(move || {
                fxt_core::cpu_affinity::maybe_bind(cpu_core);
                run_dispatch_loop(index, rx, worker_subs, worker_ctx);
            })?;

        Ok(Self {
            index,
            ctx,
            tx,
            subscribers,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue `id` for dispatch. Waits only if the dispatch queue is full.
    pub fn dispatch(&self, id: SymbolId) -> Result<()> {
        self.tx
            .send(Dispatch::Rate(id))
            .map_err(|_| ThrottleError::EngineStopped)
    }

    /// Create the subscriber's N channels on this shard.
    ///
    /// Returns `false` without side effects if it is already registered, and
    /// `EngineStopped` once [`shutdown`](Self::shutdown) has begun. The
    /// channel threads are spawned before the map lock is taken, so the
    /// dispatch worker is never held up by a subscribe.
    pub fn add_subscriber(&self, processor: &Arc<dyn PriceProcessor>) -> Result<bool> {
        let key = ProcessorKey::of(processor);
        if self.subscribers.read().contains_key(&key) {
            return Ok(false);
        }

        let symbols = self.ctx.registry.universe().len();
        let channels = (0..self.ctx.channels_per_subscriber)
            .map(|n| {
                let notifier = ProcessorNotifier::new(
                    Arc::clone(processor),
                    Arc::clone(&self.ctx.registry),
                    Arc::clone(&self.ctx.counters),
                );
                DeliveryChannel::spawn(
                    format!("fxt-d{}-{key}-{n}", self.index),
                    notifier,
                    symbols,
                    Arc::clone(&self.ctx.counters),
                )
            })
            .collect::<Result<Box<[_]>>>()?;

        // Dropping `channels` on the early returns below closes them again.
        let mut guard = self.subscribers.write();
        // shutdown() takes the worker before it drains the map under this lock.
        if self.worker.lock().is_none() {
            return Err(ThrottleError::EngineStopped);
        }
        if guard.contains_key(&key) {
            return Ok(false);
        }
        let mut next = SubscriberMap::clone(&guard);
        next.insert(key, Arc::new(Subscription { channels }));
        *guard = Arc::new(next);
        debug!("[dist-{}] subscriber {key} added ({} channels)", self.index, self.ctx.channels_per_subscriber);
        Ok(true)
    }

    /// Unregister the subscriber and shut down its channels before returning.
    ///
    /// Tasks already queued on those channels are discarded, and a callback
    /// currently running is not waited for.
    pub fn remove_subscriber(&self, key: ProcessorKey) -> bool {
        let removed = {
            let mut guard = self.subscribers.write();
            if !guard.contains_key(&key) {
                return false;
            }
            let mut next = SubscriberMap::clone(&guard);
            let removed = next.remove(&key);
            *guard = Arc::new(next);
            removed
        };

        if let Some(sub) = removed {
            let in_flight = sub.shutdown();
            debug!("[dist-{}] subscriber {key} removed ({in_flight} callback(s) in flight)", self.index);
        }
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Stop the worker, then shut down every subscriber's channels.
    ///
    /// Requests still queued behind the stop marker are dropped. Idempotent.
    pub fn shutdown(&self) {
        let Some(worker) = self.worker.lock().take() else {
            return;
        };

        let _ = self.tx.send(Dispatch::Stop);
        if worker.thread().id() == std::thread::current().id() {
            warn!("[dist-{}] shutdown from own worker; not joining", self.index);
        } else if worker.join().is_err() {
            warn!("[dist-{}] worker panicked", self.index);
        }

        let subs = std::mem::take(&mut *self.subscribers.write());
        for sub in subs.values() {
            sub.shutdown();
        }
        info!("[dist-{}] stopped ({} subscriber(s) released)", self.index, subs.len());
    }
}

impl Drop for Distributor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_dispatch_loop(
    index: usize,
    rx: Receiver<Dispatch>,
    subscribers: Arc<RwLock<Arc<SubscriberMap>>>,
    ctx: DistributorContext,
) {
    info!("[dist-{index}] dispatch loop started");
    let universe = Arc::clone(ctx.registry.universe());

    while let Ok(msg) = rx.recv() {
        let id = match msg {
            Dispatch::Rate(id) => id,
            Dispatch::Stop => break,
        };

        let snapshot = Arc::clone(&*subscribers.read());
        let slot = channel_index(universe.hash_of(id), ctx.channels_per_subscriber);
        for sub in snapshot.values() {
            sub.channels[slot].publish(id);
        }
        bump(&ctx.counters.dispatched);
    }

    info!("[dist-{index}] dispatch loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::processor_fn;
    use fxt_core::types::SymbolUniverse;
    use std::sync::mpsc;
    use std::time::Duration;

    fn ctx(channels: usize) -> DistributorContext {
        let u = SymbolUniverse::new(["EURUSD", "EURRUB", "USDRUB"]).unwrap();
        DistributorContext {
            registry: Arc::new(RateRegistry::new(Arc::new(u))),
            counters: Arc::new(EngineCounters::default()),
            channels_per_subscriber: channels,
            queue_capacity: 64,
        }
    }

    fn recorder() -> (Arc<dyn PriceProcessor>, mpsc::Receiver<(String, f64)>) {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let p = processor_fn(move |s, r| {
            let _ = tx.lock().send((s.to_string(), r));
        });
        (p, rx)
    }

    #[test]
    fn forwards_to_every_subscriber() {
        let ctx = ctx(4);
        let registry = Arc::clone(&ctx.registry);
        let d = Distributor::spawn(0, ctx, None).unwrap();
        let (p1, rx1) = recorder();
        let (p2, rx2) = recorder();
        assert!(d.add_subscriber(&p1).unwrap());
        assert!(d.add_subscriber(&p2).unwrap());
        assert_eq!(d.subscriber_count(), 2);

        let (id, _) = registry.publish_named("EURRUB", 91.25).unwrap();
        d.dispatch(id).unwrap();

        let expect = ("EURRUB".to_string(), 91.25);
        assert_eq!(rx1.recv_timeout(Duration::from_secs(2)).unwrap(), expect);
        assert_eq!(rx2.recv_timeout(Duration::from_secs(2)).unwrap(), expect);
    }

    #[test]
    fn duplicate_add_is_noop() {
        let d = Distributor::spawn(0, ctx(2), None).unwrap();
        let (p, _rx) = recorder();
        assert!(d.add_subscriber(&p).unwrap());
        assert!(!d.add_subscriber(&Arc::clone(&p)).unwrap());
        assert_eq!(d.subscriber_count(), 1);
    }

    #[test]
    fn removed_subscriber_gets_nothing() {
        let ctx = ctx(2);
        let registry = Arc::clone(&ctx.registry);
        let d = Distributor::spawn(0, ctx, None).unwrap();
        let (p, rx) = recorder();
        d.add_subscriber(&p).unwrap();

        assert!(d.remove_subscriber(ProcessorKey::of(&p)));
        assert!(!d.remove_subscriber(ProcessorKey::of(&p)));

        let (id, _) = registry.publish_named("EURUSD", 1.0).unwrap();
        d.dispatch(id).unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn dispatch_after_shutdown_fails() {
        let ctx = ctx(1);
        let registry = Arc::clone(&ctx.registry);
        let d = Distributor::spawn(0, ctx, None).unwrap();
        let (p, _rx) = recorder();
        d.add_subscriber(&p).unwrap();

        d.shutdown();
        d.shutdown();
        assert_eq!(d.subscriber_count(), 0);

        let id = registry.universe().id_of("USDRUB").unwrap();
        assert!(matches!(d.dispatch(id), Err(ThrottleError::EngineStopped)));
    }

    #[test]
    fn add_after_shutdown_fails() {
        let d = Distributor::spawn(0, ctx(2), None).unwrap();
        d.shutdown();
        let (p, _rx) = recorder();
        assert!(matches!(d.add_subscriber(&p), Err(ThrottleError::EngineStopped)));
        assert_eq!(d.subscriber_count(), 0);
    }

    #[test]
    fn concurrent_adds_register_once() {
        let d = Arc::new(Distributor::spawn(0, ctx(3), None).unwrap());
        let (p, _rx) = recorder();
        let barrier = Arc::new(std::sync::Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let (d, p, barrier) = (Arc::clone(&d), Arc::clone(&p), Arc::clone(&barrier));
                std::thread::spawn(move || {
                    barrier.wait();
                    d.add_subscriber(&p).unwrap()
                })
            })
            .collect();

        let added = handles.into_iter().map(|h| h.join().unwrap()).filter(|&a| a).count();
        assert_eq!(added, 1);
        assert_eq!(d.subscriber_count(), 1);
    }

    #[test]
    fn dispatch_continues_while_subscribing() {
        let ctx = ctx(8);
        let registry = Arc::clone(&ctx.registry);
        let d = Arc::new(Distributor::spawn(0, ctx, None).unwrap());
        let (p, rx) = recorder();
        d.add_subscriber(&p).unwrap();

        let adder = {
            let d = Arc::clone(&d);
            std::thread::spawn(move || {
                for _ in 0..20 {
                    let (extra, _rx) = recorder();
                    d.add_subscriber(&extra).unwrap();
                }
            })
        };
        for v in 1..=50 {
            let (id, _) = registry.publish_named("EURUSD", v as f64).unwrap();
            d.dispatch(id).unwrap();
        }
        adder.join().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut last = 0.0;
        while last < 50.0 && std::time::Instant::now() < deadline {
            if let Ok((_, r)) = rx.recv_timeout(Duration::from_millis(50)) {
                last = r;
            }
        }
        assert_eq!(last, 50.0);
        assert_eq!(d.subscriber_count(), 21);
    }
}
