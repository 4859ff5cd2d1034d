//! Symbol minting (spec.md §4.C1).
//!
//! A pure namespacing function, used by the engine and by patch modules to
//! stash references that must survive even after a patch has replaced the
//! public name they were originally reachable under (e.g. an unpatched
//! timer, a native resolved-future handle).

use std::fmt;

/// A minted, namespaced key. Thin newtype over `String` so a raw,
/// un-minted string can't accidentally be used where a symbol is expected.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

impl Symbol {
    /// Mints a symbol for `name`, i.e. `"__zone_symbol__" + name`.
    pub fn new(name: impl AsRef<str>) -> Self {
        Symbol(format!("__zone_symbol__{}", name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Free-function form, kept alongside [`Symbol::new`] since external patch
/// modules (spec.md §6) reach for this the same way `chronographer_core`'s
/// users reach for a free `symbol(name)` helper rather than a type.
pub fn symbol(name: impl AsRef<str>) -> Symbol {
    Symbol::new(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_namespaced_key() {
        assert_eq!(symbol("setTimeout").as_str(), "__zone_symbol__setTimeout");
    }

    #[test]
    fn distinct_names_mint_distinct_symbols() {
        assert_ne!(symbol("a"), symbol("b"));
    }
}
