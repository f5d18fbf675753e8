//! Name interning for values and basic blocks.
//!
//! Analysis structures refer to IR entities by dense ids; the only strings
//! the crate keeps are display names, interned here so that nodes, edges,
//! and regions stay `Copy`.

use string_interner::{StringInterner, DefaultSymbol, backend::StringBackend, Symbol as SymbolTrait};
use std::fmt;
use std::sync::RwLock;
use serde::{Serialize, Deserialize};
use once_cell::sync::Lazy;

type Backend = StringBackend<DefaultSymbol>;

/// A symbol representing an interned name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    pub(crate) fn from_raw(index: u32) -> Self { Symbol(index) }

    /// The raw interner index.
    pub fn as_raw(&self) -> u32 { self.0 }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match resolve(*self) {
            Some(name) => write!(f, "Symbol({:?})", name),
            None => write!(f, "Symbol(#{})", self.0),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match resolve(*self) {
            Some(name) => f.write_str(&name),
            None => write!(f, "#{}", self.0),
        }
    }
}

/// Global name interner (thread-safe).
static GLOBAL_INTERNER: Lazy<RwLock<StringInterner<Backend>>> =
    Lazy::new(|| RwLock::new(StringInterner::new()));

/// Intern a name in the global interner.
pub fn intern(s: &str) -> Symbol {
    let mut interner = GLOBAL_INTERNER.write().unwrap();
    let sym = interner.get_or_intern(s);
    Symbol(sym.to_usize() as u32)
}

/// Resolve a symbol from the global interner.
pub fn resolve(sym: Symbol) -> Option<String> {
    let interner = GLOBAL_INTERNER.read().unwrap();
    let internal_sym = DefaultSymbol::try_from_usize(sym.0 as usize)?;
    interner.resolve(internal_sym).map(|s| s.to_string())
}

/// Look up a symbol without interning.
pub fn get(s: &str) -> Option<Symbol> {
    let interner = GLOBAL_INTERNER.read().unwrap();
    interner.get(s).map(|sym| Symbol(sym.to_usize() as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_roundtrip() {
        let a = intern("%sum");
        let b = intern("%sum");
        assert_eq!(a, b);
        assert_eq!(resolve(a).as_deref(), Some("%sum"));
    }

    #[test]
    fn test_lookup_without_interning() {
        assert!(get("never-interned-name-xyz").is_none());
        let a = intern("header");
        assert_eq!(get("header"), Some(a));
    }
}
