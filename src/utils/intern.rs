//! Symbol interning for array, variable and field identifiers.
//!
//! Every identifier the extraction engine compares (array names, scalar
//! variables bound in a context, struct fields, summary parameters) is an
//! interned [`Symbol`], so identity checks are a `u32` comparison.

use string_interner::{StringInterner, DefaultSymbol, backend::StringBackend, Symbol as SymbolTrait};
use std::fmt;
use std::sync::RwLock;
use serde::{Serialize, Deserialize};
use once_cell::sync::Lazy;

/// Type alias for our interner backend
type Backend = StringBackend<DefaultSymbol>;

/// A symbol representing an interned string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    /// Intern `name` in the global interner.
    pub fn new(name: &str) -> Self {
        intern(name)
    }

    /// The interned text.
    pub fn name(&self) -> String {
        resolve(*self).unwrap_or_else(|| format!("#{}", self.0))
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({}, {:?})", self.0, self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Global symbol interner (thread-safe).
static GLOBAL_INTERNER: Lazy<RwLock<StringInterner<Backend>>> =
    Lazy::new(|| RwLock::new(StringInterner::new()));

/// Intern a string in the global interner.
pub fn intern(s: &str) -> Symbol {
    let mut interner = GLOBAL_INTERNER
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let sym = interner.get_or_intern(s);
    Symbol(sym.to_usize() as u32)
}

/// Resolve a symbol from the global interner.
pub fn resolve(sym: Symbol) -> Option<String> {
    let interner = GLOBAL_INTERNER
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let internal_sym = DefaultSymbol::try_from_usize(sym.0 as usize)?;
    interner.resolve(internal_sym).map(|s| s.to_string())
}

/// Builtin function names recognized by affine extraction.
pub mod builtins {
    use super::Symbol;
    use once_cell::sync::Lazy;

    /// `min(a, b)`
    pub static MIN: Lazy<Symbol> = Lazy::new(|| super::intern("min"));
    /// `max(a, b)`
    pub static MAX: Lazy<Symbol> = Lazy::new(|| super::intern("max"));
    /// Pencil signed minimum
    pub static IMIN: Lazy<Symbol> = Lazy::new(|| super::intern("imin"));
    /// Pencil unsigned minimum
    pub static UMIN: Lazy<Symbol> = Lazy::new(|| super::intern("umin"));
    /// Pencil signed maximum
    pub static IMAX: Lazy<Symbol> = Lazy::new(|| super::intern("imax"));
    /// Pencil unsigned maximum
    pub static UMAX: Lazy<Symbol> = Lazy::new(|| super::intern("umax"));
    /// Pencil non-negative remainder
    pub static INT_MOD: Lazy<Symbol> = Lazy::new(|| super::intern("intMod"));
    /// Pencil floor division
    pub static INT_FLOOR: Lazy<Symbol> = Lazy::new(|| super::intern("intFloor"));
    /// Pencil ceiling division
    pub static INT_CEIL: Lazy<Symbol> = Lazy::new(|| super::intern("intCeil"));
    /// Floor division by a literal
    pub static FLOORD: Lazy<Symbol> = Lazy::new(|| super::intern("floord"));
    /// Ceiling division by a literal
    pub static CEILD: Lazy<Symbol> = Lazy::new(|| super::intern("ceild"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_interner() {
        let sym1 = intern("test_string");
        let sym2 = Symbol::new("test_string");
        assert_eq!(sym1, sym2);
        assert_eq!(resolve(sym1), Some("test_string".to_string()));
        assert_eq!(sym1.to_string(), "test_string");
    }

    #[test]
    fn test_builtins_are_interned() {
        assert_eq!(*builtins::MIN, Symbol::new("min"));
        assert_ne!(*builtins::MIN, *builtins::MAX);
    }
}
