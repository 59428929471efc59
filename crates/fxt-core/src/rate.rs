//! Versioned rate storage.
//!
//! Every symbol of the universe owns one [`RateCell`] for the whole engine
//! lifetime. A cell is a sequence lock over two native atomics: the sequence
//! word doubles as the version stamp, so a reader always observes a
//! `(value, version)` pair that was written together.
//!
//! # Memory layout
//!
//! ```text
//! RateRegistry
//! ├── universe: Arc<SymbolUniverse>   name ↔ SymbolId
//! └── cells[SymbolId]                 CachePadded<{ seq: AtomicU64, bits: AtomicU64 }>
//! ```
//!
//! `seq` is `2 * version` while the cell is stable and odd while a write is
//! in progress. Readers never block: they retry only if a write overlapped
//! their read. No state is shared between cells, so writers of different
//! symbols never contend.
//!
//! Writers are expected to be one thread per symbol. A writer claims the cell
//! with a compare-and-swap on `seq`, so racing writers never produce
//! duplicate or regressing versions; only the relative order of their values
//! is unspecified.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering, fence};

use crossbeam_utils::{Backoff, CachePadded};

use crate::error::Result;
use crate::types::symbol::{SymbolId, SymbolUniverse};

/// A consistent `(value, version)` pair read from a [`RateCell`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSnapshot {
    pub value: f64,
    /// `0` means the symbol has never been published.
    pub version: u64,
}

/// Latest rate of one symbol plus its version stamp.
pub struct RateCell {
    seq: AtomicU64,
    bits: AtomicU64,
}

impl RateCell {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            bits: AtomicU64::new(f64::NAN.to_bits()),
        }
    }

    /// Store `value` stamped with `previous_version + 1` and return the new
    /// version.
    #[inline]
    pub fn publish(&self, value: f64) -> u64 {
        let backoff = Backoff::new();
        let mut seq = self.seq.load(Ordering::Relaxed);
        loop {
            if seq & 1 == 1 {
                // Another writer of this symbol is mid-write.
                backoff.snooze();
                seq = self.seq.load(Ordering::Relaxed);
                continue;
            }
            match self.seq.compare_exchange_weak(seq, seq + 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => break,
                Err(cur) => seq = cur,
            }
        }

        fence(Ordering::Release);
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        self.seq.store(seq + 2, Ordering::Release);
        (seq + 2) / 2
    }

    #[inline]
    pub fn read(&self) -> RateSnapshot {
        let backoff = Backoff::new();
        loop {
            let before = self.seq.load(Ordering::Acquire);
            if before & 1 == 0 {
                let bits = self.bits.load(Ordering::Relaxed);
                fence(Ordering::Acquire);
                if self.seq.load(Ordering::Relaxed) == before {
                    return RateSnapshot { value: f64::from_bits(bits), version: before / 2 };
                }
            }
            backoff.spin();
        }
    }
}

impl Default for RateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// One [`RateCell`] per symbol of a fixed universe.
pub struct RateRegistry {
    universe: Arc<SymbolUniverse>,
    cells: Box<[CachePadded<RateCell>]>,
}

impl RateRegistry {
    /// Create a cell for every symbol of `universe`, all unpublished.
    pub fn new(universe: Arc<SymbolUniverse>) -> Self {
        let cells = (0..universe.len()).map(|_| CachePadded::new(RateCell::new())).collect();
        Self { universe, cells }
    }

    pub fn universe(&self) -> &Arc<SymbolUniverse> {
        &self.universe
    }

    /// Publish by interned id. Returns the new version.
    #[inline]
    pub fn publish(&self, id: SymbolId, value: f64) -> u64 {
        self.cells[id.index()].publish(value)
    }

    /// Publish by name, failing with `UnknownSymbol` outside the universe.
    pub fn publish_named(&self, symbol: &str, value: f64) -> Result<(SymbolId, u64)> {
        let id = self.universe.id_of(symbol)?;
        Ok((id, self.publish(id, value)))
    }

    #[inline]
    pub fn read(&self, id: SymbolId) -> RateSnapshot {
        self.cells[id.index()].read()
    }

    /// Read by name, failing with `UnknownSymbol` outside the universe.
    pub fn read_named(&self, symbol: &str) -> Result<RateSnapshot> {
        Ok(self.read(self.universe.id_of(symbol)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ThrottleError;

    fn registry() -> RateRegistry {
        let u = SymbolUniverse::new(["EURUSD", "EURRUB", "USDRUB"]).unwrap();
        RateRegistry::new(Arc::new(u))
    }

    #[test]
    fn unpublished_cell_has_version_zero() {
        let r = registry();
        let snap = r.read_named("EURUSD").unwrap();
        assert_eq!(snap.version, 0);
        assert!(snap.value.is_nan());
    }

    #[test]
    fn versions_increment_per_symbol() {
        let r = registry();
        assert_eq!(r.publish_named("EURUSD", 1.10).unwrap().1, 1);
        assert_eq!(r.publish_named("EURUSD", 1.11).unwrap().1, 2);
        assert_eq!(r.publish_named("EURRUB", 90.5).unwrap().1, 1);

        let snap = r.read_named("EURUSD").unwrap();
        assert_eq!(snap, RateSnapshot { value: 1.11, version: 2 });
        assert_eq!(r.read_named("USDRUB").unwrap().version, 0);
    }

    #[test]
    fn unknown_symbol_fails() {
        let r = registry();
        assert!(matches!(r.publish_named("XYZABC", 1.0), Err(ThrottleError::UnknownSymbol(_))));
        assert!(matches!(r.read_named("XYZABC"), Err(ThrottleError::UnknownSymbol(_))));
    }

    #[test]
    fn reads_never_tear() {
        // Writer stores value == version; any torn read would break equality.
        let r = Arc::new(registry());
        let id = r.universe().id_of("EURUSD").unwrap();
        let writer = {
            let r = Arc::clone(&r);
            std::thread::spawn(move || {
                for i in 1..=50_000u64 {
                    r.publish(id, i as f64);
                }
            })
        };

        let mut last = 0;
        while last < 50_000 {
            let snap = r.read(id);
            if snap.version > 0 {
                assert_eq!(snap.value, snap.version as f64);
                assert!(snap.version >= last);
                last = snap.version;
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn racing_writers_keep_versions_unique() {
        let r = Arc::new(registry());
        let id = r.universe().id_of("USDRUB").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    (0..1_000).map(|_| r.publish(id, 1.0)).collect::<Vec<u64>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 4_000);
        assert_eq!(r.read(id).version, 4_000);
    }

    #[test]
    fn cell_uses_native_atomics() {
        assert!(cfg!(target_has_atomic = "64"));
        assert_eq!(std::mem::size_of::<RateCell>(), 2 * std::mem::size_of::<AtomicU64>());
    }

    #[test]
    fn stalled_writer_does_not_block_other_cells() {
        let r = Arc::new(registry());
        let usd = r.universe().id_of("EURUSD").unwrap();
        let rub = r.universe().id_of("USDRUB").unwrap();

        // Leave EURUSD mid-write, as if its writer had been descheduled.
        r.cells[usd.index()].seq.store(1, Ordering::Release);

        let (tx, rx) = std::sync::mpsc::channel();
        let other = {
            let r = Arc::clone(&r);
            std::thread::spawn(move || {
                let version = r.publish(rub, 91.5);
                let _ = tx.send((version, r.read(rub)));
            })
        };
        let (version, snap) = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(version, 1);
        assert_eq!(snap, RateSnapshot { value: 91.5, version: 1 });
        other.join().unwrap();

        r.cells[usd.index()].seq.store(0, Ordering::Release);
        assert_eq!(r.publish(usd, 1.1), 1);
    }
}
