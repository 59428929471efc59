//! Interned symbol universe.
//!
//! The set of tradable currency pairs is fixed before any traffic arrives, so
//! every symbol is interned once into a dense [`SymbolId`]. Hot-path tables
//! (rate cells, last-notified versions, pending flags) are plain vectors
//! indexed by that id instead of string-keyed maps.

use ahash::AHashMap;

use crate::error::{Result, ThrottleError};
use crate::shard::symbol_hash;

/// Dense index of a symbol inside its [`SymbolUniverse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(u32);

impl SymbolId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

struct SymbolEntry {
    name: Box<str>,
    hash: u64,
}

/// The static set of symbols known to an engine.
pub struct SymbolUniverse {
    entries: Vec<SymbolEntry>,
    by_name: AHashMap<Box<str>, SymbolId>,
}

impl SymbolUniverse {
    /// Intern `symbols` in the given order.
    ///
    /// Fails with [`ThrottleError::Config`] on an empty list, an empty name or
    /// a duplicate.
    pub fn new<I, S>(symbols: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = Vec::new();
        let mut by_name = AHashMap::new();

        for sym in symbols {
            let name = sym.as_ref().trim();
            if name.is_empty() {
                return Err(ThrottleError::Config("empty symbol name".into()));
            }
            let id = SymbolId(entries.len() as u32);
            if by_name.insert(Box::from(name), id).is_some() {
                return Err(ThrottleError::Config(format!("duplicate symbol: {name}")));
            }
            entries.push(SymbolEntry {
                name: Box::from(name),
                hash: symbol_hash(name),
            });
        }

        if entries.is_empty() {
            return Err(ThrottleError::Config("symbol universe is empty".into()));
        }

        Ok(Self { entries, by_name })
    }

    /// Look up the id of `name`, failing with [`ThrottleError::UnknownSymbol`].
    #[inline]
    pub fn id_of(&self, name: &str) -> Result<SymbolId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ThrottleError::UnknownSymbol(name.to_string()))
    }

    /// Name of an interned symbol.
    ///
    /// Ids are only ever minted by this universe, so indexing cannot go out of
    /// bounds for ids obtained from it.
    #[inline]
    pub fn name_of(&self, id: SymbolId) -> &str {
        &self.entries[id.index()].name
    }

    /// Precomputed deterministic hash of the symbol name.
    #[inline]
    pub fn hash_of(&self, id: SymbolId) -> u64 {
        self.entries[id.index()].hash
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(id, name)` pairs in interning order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &str)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (SymbolId(i as u32), &*e.name))
    }
}

impl std::fmt::Debug for SymbolUniverse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.entries.iter().map(|e| &e.name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_dense_and_ordered() {
        let u = SymbolUniverse::new(["EURUSD", "EURRUB", "USDRUB"]).unwrap();
        assert_eq!(u.len(), 3);
        let ids: Vec<usize> = u.iter().map(|(id, _)| id.index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(u.name_of(u.id_of("EURRUB").unwrap()), "EURRUB");
    }

    #[test]
    fn unknown_symbol_rejected() {
        let u = SymbolUniverse::new(["EURUSD", "EURRUB", "USDRUB"]).unwrap();
        match u.id_of("XYZABC") {
            Err(ThrottleError::UnknownSymbol(s)) => assert_eq!(s, "XYZABC"),
            other => panic!("expected UnknownSymbol, got {other:?}"),
        }
    }

    #[test]
    fn duplicates_and_empty_rejected() {
        assert!(SymbolUniverse::new(["EURUSD", "EURUSD"]).is_err());
        assert!(SymbolUniverse::new(["EURUSD", " "]).is_err());
        assert!(SymbolUniverse::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn hash_matches_shard_hash() {
        let u = SymbolUniverse::new(["EURUSD"]).unwrap();
        let id = u.id_of("EURUSD").unwrap();
        assert_eq!(u.hash_of(id), symbol_hash("EURUSD"));
    }
}
