use std::fmt;

/// Database reference: a signed integer naming an object in the arena.
///
/// Negative values are sentinels and never index the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Dbref(pub i32);

/// No object / not found.
pub const NOTHING: Dbref = Dbref(-1);
/// Name matched more than one object.
pub const AMBIGUOUS: Dbref = Dbref(-2);
/// The mover's home, wherever that currently is.
pub const HOME: Dbref = Dbref(-3);
/// Explicit "no destination" exit target.
pub const NIL: Dbref = Dbref(-4);
/// Synthetic result for permission-denied lookups.
pub const PERMDENIED: Dbref = Dbref(-5);

/// The environment root room.
pub const GLOBAL_ENVIRONMENT: Dbref = Dbref(0);

impl Dbref {
    /// Whether this ref could name a real object (it may still be past
    /// `db_top` or garbage; the arena decides that).
    pub fn is_objref(self) -> bool {
        self.0 >= 0
    }

    pub fn is_sentinel(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Dbref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Default for Dbref {
    fn default() -> Self {
        NOTHING
    }
}

impl From<i32> for Dbref {
    fn from(n: i32) -> Self {
        Dbref(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_not_objrefs() {
        for d in [NOTHING, AMBIGUOUS, HOME, NIL, PERMDENIED] {
            assert!(d.is_sentinel());
            assert!(!d.is_objref());
        }
        assert!(GLOBAL_ENVIRONMENT.is_objref());
    }

    #[test]
    fn display_uses_hash_notation() {
        assert_eq!(Dbref(42).to_string(), "#42");
        assert_eq!(NOTHING.to_string(), "#-1");
    }
}
