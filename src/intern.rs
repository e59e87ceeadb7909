//! Process-wide string interner, modeled on `string_table_symbol_t` (design note §9).
//!
//! Stock descriptor fields (name, country, sector, ...) are interned so that a [`Stock`]
//! slot stores a cheap `u32` rather than an owned `String`, and so that repeated values
//! across many stocks (e.g. `"Technology"`, `"NASDAQ"`) share storage.
//!
//! [`Stock`]: crate::stockdb::Stock

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A handle into a [`StringTable`]. `0` is the reserved null symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringTableSymbol(pub u32);

impl StringTableSymbol {
    /// The reserved symbol denoting "absent" / not-yet-populated.
    pub const NULL: StringTableSymbol = StringTableSymbol(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Interns strings behind a shared reader-writer lock.
#[derive(Debug, Default)]
pub struct StringTable {
    inner: RwLock<StringTableInner>,
}

#[derive(Debug, Default)]
struct StringTableInner {
    strings: Vec<Arc<str>>,
    index: HashMap<Arc<str>, u32>,
}

impl StringTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StringTableInner {
                strings: vec![Arc::from("")],
                index: HashMap::new(),
            }),
        }
    }

    /// Interns `s`, returning its stable symbol. Repeated calls with an equal string return
    /// the same symbol.
    pub fn intern(&self, s: &str) -> StringTableSymbol {
        if s.is_empty() {
            return StringTableSymbol::NULL;
        }
        {
            let guard = self.inner.read().expect("string table lock poisoned");
            if let Some(&id) = guard.index.get(s) {
                return StringTableSymbol(id);
            }
        }
        let mut guard = self.inner.write().expect("string table lock poisoned");
        // Re-check: another writer may have interned it between the read and write locks.
        if let Some(&id) = guard.index.get(s) {
            return StringTableSymbol(id);
        }
        let arc: Arc<str> = Arc::from(s);
        let id = u32::try_from(guard.strings.len()).expect("string table overflow");
        guard.strings.push(arc.clone());
        guard.index.insert(arc, id);
        StringTableSymbol(id)
    }

    /// Resolves a symbol back to its string, or `""` for the null symbol or an unknown id.
    #[must_use]
    pub fn resolve(&self, symbol: StringTableSymbol) -> Arc<str> {
        let guard = self.inner.read().expect("string table lock poisoned");
        guard
            .strings
            .get(symbol.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from(""))
    }
}

/// A "compute-once" memoized value driven by a fetcher closure (design note §9,
/// `double_option_t` / `string_option_t`). Models a single-shot `Pending -> Resolved`
/// transition.
#[derive(Debug, Clone)]
pub enum Lazy<T> {
    /// Not yet computed.
    Pending,
    /// Computed and cached.
    Resolved(T),
}

impl<T> Default for Lazy<T> {
    fn default() -> Self {
        Lazy::Pending
    }
}

impl<T: Clone> Lazy<T> {
    #[must_use]
    pub fn get(&self) -> Option<T> {
        match self {
            Lazy::Pending => None,
            Lazy::Resolved(v) => Some(v.clone()),
        }
    }

    pub fn set(&mut self, value: T) {
        *self = Lazy::Resolved(value);
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Lazy::Resolved(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_returns_same_symbol() {
        let table = StringTable::new();
        let a = table.intern("Technology");
        let b = table.intern("Technology");
        assert_eq!(a, b);
        assert_eq!(&*table.resolve(a), "Technology");
    }

    #[test]
    fn empty_string_is_null_symbol() {
        let table = StringTable::new();
        assert!(table.intern("").is_null());
    }

    #[test]
    fn lazy_defaults_to_pending() {
        let lazy: Lazy<f64> = Lazy::default();
        assert!(!lazy.is_resolved());
        assert_eq!(lazy.get(), None);
    }
}
