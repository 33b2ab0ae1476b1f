//! Compiled lock expressions.
//!
//! Infix grammar: `!` binds tightest, then `&`, then `|`, with
//! parentheses for grouping. Atoms either name an object (the lock
//! passes if the tester is, carries, or stands inside it) or test a
//! property as `name:value`.

use crate::dbref::Dbref;
use crate::error::Error;

/// A compiled lock. `True` is the unlocked sentinel.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Boolexp {
    True,
    And(Box<Boolexp>, Box<Boolexp>),
    Or(Box<Boolexp>, Box<Boolexp>),
    Not(Box<Boolexp>),
    Const(Dbref),
    Prop(String, String),
}

pub const TRUE_BOOLEXP: Boolexp = Boolexp::True;

impl Boolexp {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, Boolexp::True)
    }

    /// Node count, for size accounting.
    pub fn size(&self) -> usize {
        match self {
            Boolexp::True => 0,
            Boolexp::And(a, b) | Boolexp::Or(a, b) => 1 + a.size() + b.size(),
            Boolexp::Not(a) => 1 + a.size(),
            Boolexp::Const(_) => 1,
            Boolexp::Prop(n, v) => 1 + n.len() + v.len(),
        }
    }

    /// Parse a lock. `resolve` turns an object-name atom into a dbref
    /// for the compiling player; returning NOTHING fails the parse.
    pub fn parse<F>(text: &str, resolve: &mut F) -> Result<Boolexp, Error>
    where
        F: FnMut(&str) -> Dbref,
    {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(Boolexp::True);
        }
        let mut p = Parser { rest: trimmed, resolve };
        let expr = p.parse_or()?;
        if !p.rest.trim_start().is_empty() {
            return Err(Error::LockParse(format!("trailing input: {:?}", p.rest)));
        }
        Ok(expr)
    }

    /// Render the lock back to text. `name_of` supplies display names
    /// when `fullnames` is set; otherwise refs print as `#n`.
    pub fn unparse<F>(&self, fullnames: bool, name_of: &F) -> String
    where
        F: Fn(Dbref) -> String,
    {
        match self {
            Boolexp::True => "*UNLOCKED*".to_string(),
            Boolexp::And(a, b) => format!(
                "({}&{})",
                a.unparse(fullnames, name_of),
                b.unparse(fullnames, name_of)
            ),
            Boolexp::Or(a, b) => format!(
                "({}|{})",
                a.unparse(fullnames, name_of),
                b.unparse(fullnames, name_of)
            ),
            Boolexp::Not(a) => format!("!{}", a.unparse(fullnames, name_of)),
            Boolexp::Const(d) => {
                if fullnames {
                    format!("{}({})", name_of(*d), d)
                } else {
                    d.to_string()
                }
            }
            Boolexp::Prop(n, v) => format!("{}:{}", n, v),
        }
    }
}

struct Parser<'a, F> {
    rest: &'a str,
    resolve: &'a mut F,
}

impl<'a, F> Parser<'a, F>
where
    F: FnMut(&str) -> Dbref,
{
    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, ch: char) -> bool {
        self.skip_ws();
        if let Some(stripped) = self.rest.strip_prefix(ch) {
            self.rest = stripped;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Boolexp, Error> {
        let mut lhs = self.parse_and()?;
        while self.eat('|') {
            let rhs = self.parse_and()?;
            lhs = Boolexp::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Boolexp, Error> {
        let mut lhs = self.parse_unary()?;
        while self.eat('&') {
            let rhs = self.parse_unary()?;
            lhs = Boolexp::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Boolexp, Error> {
        if self.eat('!') {
            return Ok(Boolexp::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat('(') {
            let inner = self.parse_or()?;
            if !self.eat(')') {
                return Err(Error::LockParse("missing )".to_string()));
            }
            return Ok(inner);
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Boolexp, Error> {
        self.skip_ws();
        let end = self
            .rest
            .find(|c| matches!(c, '&' | '|' | ')' | '('))
            .unwrap_or(self.rest.len());
        let atom = self.rest[..end].trim();
        self.rest = &self.rest[end..];
        if atom.is_empty() {
            return Err(Error::LockParse("empty atom".to_string()));
        }
        if let Some((name, value)) = atom.split_once(':') {
            return Ok(Boolexp::Prop(name.trim().to_string(), value.trim().to_string()));
        }
        let resolved = (self.resolve)(atom);
        if !resolved.is_objref() {
            return Err(Error::LockParse(format!("I don't see {:?} here", atom)));
        }
        Ok(Boolexp::Const(resolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dbref::{Dbref, NOTHING};

    fn resolver(name: &str) -> Dbref {
        match name {
            "me" => Dbref(2),
            "sword" => Dbref(7),
            s if s.starts_with('#') => s[1..].parse().map(Dbref).unwrap_or(NOTHING),
            _ => NOTHING,
        }
    }

    #[test]
    fn parses_precedence_and_grouping() {
        let mut r = resolver;
        let e = Boolexp::parse("me | sword & !#9", &mut r).unwrap();
        // & binds tighter than |
        assert_eq!(
            e,
            Boolexp::Or(
                Box::new(Boolexp::Const(Dbref(2))),
                Box::new(Boolexp::And(
                    Box::new(Boolexp::Const(Dbref(7))),
                    Box::new(Boolexp::Not(Box::new(Boolexp::Const(Dbref(9)))))
                ))
            )
        );
    }

    #[test]
    fn empty_text_is_unlocked() {
        let mut r = resolver;
        assert_eq!(Boolexp::parse("  ", &mut r).unwrap(), Boolexp::True);
        assert!(TRUE_BOOLEXP.is_unlocked());
    }

    #[test]
    fn unknown_names_fail() {
        let mut r = resolver;
        assert!(Boolexp::parse("dragon", &mut r).is_err());
        assert!(Boolexp::parse("(me", &mut r).is_err());
    }

    #[test]
    fn prop_atoms_and_unparse() {
        let mut r = resolver;
        let e = Boolexp::parse("_guild:mage & me", &mut r).unwrap();
        let text = e.unparse(false, &|d| d.to_string());
        assert_eq!(text, "(_guild:mage&#2)");
        let full = e.unparse(true, &|d| format!("Obj{}", d.0));
        assert_eq!(full, "(_guild:mage&Obj2(#2))");
    }
}
