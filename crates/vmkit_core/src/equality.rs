//! Payload equality policies
//!
//! A policy answers one question: is the incoming payload the same as the
//! stored one? When it is, `set_payload` does nothing. When it is not, the
//! view model is told about the change and the stored payload is replaced.
//!
//! [`PayloadCompare::Off`] never reports equality. Every `set_payload` call is
//! then a change, which is exactly what feeds a render loop when a consumer
//! derives its next payload from the current one.

use crate::payload::Payload;
use serde::Deserialize;
use std::fmt;
use std::rc::Rc;

/// User supplied payload comparison
pub type PayloadEqFn = Rc<dyn Fn(&Payload, &Payload) -> bool>;

/// How `set_payload` decides whether a payload changed
#[derive(Clone, Default)]
pub enum PayloadCompare {
    /// Same allocation (or same scalar value)
    Identity,
    /// Same top-level keys with identical values
    Shallow,
    /// Recursive value equality
    #[default]
    Structural,
    /// Caller supplied comparison
    Custom(PayloadEqFn),
    /// Always treated as changed
    Off,
}

impl PayloadCompare {
    /// Wrap a comparison closure
    pub fn custom(eq: impl Fn(&Payload, &Payload) -> bool + 'static) -> Self {
        PayloadCompare::Custom(Rc::new(eq))
    }

    /// Whether `prev` and `next` should be considered the same payload
    pub fn equals(&self, prev: &Payload, next: &Payload) -> bool {
        match self {
            PayloadCompare::Identity => prev.same(next),
            PayloadCompare::Shallow => prev.shallow_eq(next),
            PayloadCompare::Structural => prev.structural_eq(next),
            PayloadCompare::Custom(eq) => eq(prev, next),
            PayloadCompare::Off => false,
        }
    }
}

impl fmt::Debug for PayloadCompare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadCompare::Identity => f.write_str("Identity"),
            PayloadCompare::Shallow => f.write_str("Shallow"),
            PayloadCompare::Structural => f.write_str("Structural"),
            PayloadCompare::Custom(_) => f.write_str("Custom"),
            PayloadCompare::Off => f.write_str("Off"),
        }
    }
}

/// How the stored payload is exposed to observers
///
/// A [`Payload`] is never mutated in place, so there are no members to
/// observe below the stored value itself. `Shallow` and `Deep` therefore
/// track the payload exactly like `Ref`: observers re-run on every
/// replacement and read nested values through the new payload. Only `Off`
/// and `Structural` change what is notified.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadObservable {
    /// Plain field; reads are not tracked and writes notify nobody
    Off,
    /// Every replacement notifies
    #[default]
    Ref,
    /// Same notifications as `Ref`
    Shallow,
    /// Replacements notify only when structurally different
    Structural,
    /// Same notifications as `Ref`
    Deep,
}

impl PayloadObservable {
    /// Whether reads register a dependency
    pub fn is_tracked(self) -> bool {
        self != PayloadObservable::Off
    }

    /// Equality that suppresses notifications, if any
    pub fn notify_filter(self) -> Option<PayloadEqFn> {
        match self {
            PayloadObservable::Structural => {
                Some(Rc::new(|a: &Payload, b: &Payload| a.structural_eq(b)))
            }
            _ => None,
        }
    }
}

/// Whether reads go through a memoized derivation, and how it compares
#[derive(Clone, Default)]
pub enum PayloadComputed {
    /// Read the stored payload directly
    Off,
    /// Memoize; dependents are notified when the identity changes
    On,
    /// Memoize; dependents are notified when the value changes structurally
    #[default]
    Struct,
    /// Memoize with a caller supplied equality
    Custom(PayloadEqFn),
}

impl PayloadComputed {
    /// Equality used by the memo, `None` when no memo is used
    pub fn memo_equality(&self) -> Option<PayloadEqFn> {
        match self {
            PayloadComputed::Off => None,
            PayloadComputed::On => Some(Rc::new(|a: &Payload, b: &Payload| a.same(b))),
            PayloadComputed::Struct => {
                Some(Rc::new(|a: &Payload, b: &Payload| a.structural_eq(b)))
            }
            PayloadComputed::Custom(eq) => Some(eq.clone()),
        }
    }
}

impl fmt::Debug for PayloadComputed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadComputed::Off => f.write_str("Off"),
            PayloadComputed::On => f.write_str("On"),
            PayloadComputed::Struct => f.write_str("Struct"),
            PayloadComputed::Custom(_) => f.write_str("Custom"),
        }
    }
}
