//! Payload values
//!
//! A payload is the externally supplied input a view model depends on. It is
//! immutable: updating a view model replaces the whole payload, never a part
//! of it. Compound variants are reference counted so that cloning is cheap
//! and so that *identity* is observable, which the equality policies in
//! [`crate::equality`] rely on:
//!
//! - scalars and strings compare by value under every policy
//! - lists, maps and opaque values have an identity (their allocation)
//!
//! ```ignore
//! let a = Payload::map([("x", 1.into())]);
//! let b = Payload::map([("x", 1.into())]);
//! assert!(!a.same(&b));          // different allocations
//! assert!(a.shallow_eq(&b));     // same keys, identical values
//! ```

use indexmap::IndexMap;
use std::any::Any;
use std::fmt;
use std::rc::Rc;

/// Key/value body of [`Payload::Map`]
pub type PayloadMap = IndexMap<String, Payload>;

/// An immutable, cheaply clonable payload value
#[derive(Clone, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<Vec<Payload>>),
    Map(Rc<PayloadMap>),
    /// Arbitrary typed data, compared by identity only
    Opaque(Rc<dyn Any>),
}

impl Payload {
    /// Build a map payload from key/value pairs
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(Rc::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// Build a list payload
    pub fn list(items: impl IntoIterator<Item = Payload>) -> Self {
        Payload::List(Rc::new(items.into_iter().collect()))
    }

    /// Wrap typed data
    pub fn opaque<T: Any>(value: T) -> Self {
        Payload::Opaque(Rc::new(value))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }

    /// Field of a map payload
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Payload::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Element of a list payload
    pub fn at(&self, index: usize) -> Option<&Payload> {
        match self {
            Payload::List(items) => items.get(index),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Payload::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Payload::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Payload::Float(f) => Some(*f),
            Payload::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::Str(s) => Some(&**s),
            _ => None,
        }
    }

    /// Borrow typed data stored with [`Payload::opaque`]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Payload::Opaque(value) => value.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// A new top-level allocation with the same contents
    ///
    /// Nested values are shared, so the copy is shallow-equal but not
    /// identical to `self`.
    pub fn shallow_copy(&self) -> Self {
        match self {
            Payload::List(items) => Payload::List(Rc::new(items.as_ref().clone())),
            Payload::Map(map) => Payload::Map(Rc::new(map.as_ref().clone())),
            other => other.clone(),
        }
    }

    /// Identity comparison
    ///
    /// Scalars and strings compare by value; compound values compare by
    /// allocation.
    pub fn same(&self, other: &Payload) -> bool {
        match (self, other) {
            (Payload::Null, Payload::Null) => true,
            (Payload::Bool(a), Payload::Bool(b)) => a == b,
            (Payload::Int(a), Payload::Int(b)) => a == b,
            (Payload::Float(a), Payload::Float(b)) => a == b,
            (Payload::Str(a), Payload::Str(b)) => a == b,
            (Payload::List(a), Payload::List(b)) => Rc::ptr_eq(a, b),
            (Payload::Map(a), Payload::Map(b)) => Rc::ptr_eq(a, b),
            (Payload::Opaque(a), Payload::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Own-key comparison: every top-level entry must be identical
    pub fn shallow_eq(&self, other: &Payload) -> bool {
        if self.same(other) {
            return true;
        }
        match (self, other) {
            (Payload::List(a), Payload::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same(y))
            }
            (Payload::Map(a), Payload::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.same(other)))
            }
            _ => false,
        }
    }

    /// Recursive value comparison; opaque values still compare by identity
    ///
    /// Floats are equal when `==` holds or their bits match, so a `NaN`
    /// equals itself.
    pub fn structural_eq(&self, other: &Payload) -> bool {
        if self.same(other) {
            return true;
        }
        match (self, other) {
            (Payload::Float(a), Payload::Float(b)) => a.to_bits() == b.to_bits(),
            (Payload::List(a), Payload::List(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.structural_eq(y))
            }
            (Payload::Map(a), Payload::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.structural_eq(other)))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Null => f.write_str("null"),
            Payload::Bool(b) => write!(f, "{b}"),
            Payload::Int(i) => write!(f, "{i}"),
            Payload::Float(x) => write!(f, "{x}"),
            Payload::Str(s) => write!(f, "{s:?}"),
            Payload::List(items) => f.debug_list().entries(items.iter()).finish(),
            Payload::Map(map) => f.debug_map().entries(map.iter()).finish(),
            Payload::Opaque(_) => f.write_str("<opaque>"),
        }
    }
}

impl From<bool> for Payload {
    fn from(value: bool) -> Self {
        Payload::Bool(value)
    }
}

impl From<i32> for Payload {
    fn from(value: i32) -> Self {
        Payload::Int(value.into())
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Payload::Int(value)
    }
}

impl From<f64> for Payload {
    fn from(value: f64) -> Self {
        Payload::Float(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Str(value.into())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Str(value.into())
    }
}

impl<T: Into<Payload>> From<Option<T>> for Payload {
    fn from(value: Option<T>) -> Self {
        value.map_or(Payload::Null, Into::into)
    }
}
