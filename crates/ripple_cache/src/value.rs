//! Structural views of values for fingerprinting.
//!
//! Rust has no runtime field reflection, so values crossing the cache
//! boundary expose their public state explicitly: every fingerprintable
//! value produces a [`ValueView`], an owned tree of scalars, collections,
//! and named-field records that [`ObjectHasher`](crate::ObjectHasher)
//! walks. Values that cannot (or should not) be inspected structurally
//! opt into one of two escape hatches: an explicit cache key, or an
//! identity/rendered fallback declared in the view itself.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// A structural view of a value.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueView {
    /// The absence of a value.
    Null,
    /// A boolean scalar.
    Bool(bool),
    /// A signed integer scalar.
    Int(i64),
    /// An unsigned integer scalar.
    UInt(u64),
    /// A floating-point scalar, hashed by bit pattern.
    Float(f64),
    /// A string scalar.
    Str(String),
    /// A raw byte sequence, hashed as one byte string. Reached through
    /// the [`Bytes`] wrapper or a hand-built view.
    Bytes(Vec<u8>),
    /// An ordered sequence; element order is significant.
    Seq(Vec<ValueView>),
    /// An unordered collection; fingerprints identically regardless of
    /// element order.
    Set(Vec<ValueView>),
    /// A key-value mapping; entries are ordered by key fingerprint before
    /// hashing, so insertion order is irrelevant.
    Map(Vec<(ValueView, ValueView)>),
    /// A structured value with named fields.
    ///
    /// `identity` is a per-instance token (see [`instance_identity`]) used
    /// when the record exposes no fields or the hasher's depth budget is
    /// exhausted; in either case the record fingerprints by
    /// `(type_name, identity)` instead of by structure.
    Record {
        /// Name of the value's type.
        type_name: String,
        /// Instance identity for the no-public-state fallback.
        identity: u64,
        /// Named fields in declaration order; the hasher sorts them.
        fields: Vec<(String, ValueView)>,
    },
    /// An explicit cache key supplied by the value itself. Produced by
    /// [`view_of`] for values whose [`Fingerprintable::cache_key`]
    /// returns `Some`; bypasses all structural inspection.
    Keyed(String),
    /// An opaque value reduced to its string rendering.
    ///
    /// This is the lossy escape valve: two values whose renderings omit
    /// relevant state will collide. Hashing one of these is logged as a
    /// degraded fingerprint.
    Rendered(String),
}

impl ValueView {
    /// Convenience constructor for a [`ValueView::Record`].
    pub fn record(
        type_name: impl Into<String>,
        identity: u64,
        fields: Vec<(String, ValueView)>,
    ) -> Self {
        ValueView::Record {
            type_name: type_name.into(),
            identity,
            fields,
        }
    }
}

/// A value that can be fingerprinted for cache signatures.
pub trait Fingerprintable {
    /// Explicit cache key override.
    ///
    /// Returning `Some` is the sanctioned capability for stateful or
    /// otherwise structurally unhashable values: the key is used verbatim
    /// and the structural view is never consulted. Defaults to `None`.
    fn cache_key(&self) -> Option<String> {
        None
    }

    /// Structural view of the value's public state.
    fn view(&self) -> ValueView;
}

/// Builds the view for a value, honoring the cache-key capability.
///
/// Container impls and the hasher go through this instead of calling
/// [`Fingerprintable::view`] directly, so the capability applies at any
/// nesting depth, not just at the top level.
pub fn view_of<T: Fingerprintable + ?Sized>(value: &T) -> ValueView {
    match value.cache_key() {
        Some(key) => ValueView::Keyed(key),
        None => value.view(),
    }
}

/// Derives an identity token from a value's address.
///
/// Stand-in for runtime object identity: no two live instances share a
/// token, so identity-fingerprinted values never collide. The flip side is
/// that they also never hit the cache across runs; values meant to be
/// equivalent by configuration should expose fields or implement
/// [`Fingerprintable::cache_key`] instead.
pub fn instance_identity<T>(value: &T) -> u64 {
    value as *const T as usize as u64
}

impl<T: Fingerprintable + ?Sized> Fingerprintable for &T {
    fn cache_key(&self) -> Option<String> {
        (**self).cache_key()
    }

    fn view(&self) -> ValueView {
        (**self).view()
    }
}

impl Fingerprintable for bool {
    fn view(&self) -> ValueView {
        ValueView::Bool(*self)
    }
}

/// Wrapper that fingerprints a byte payload as a single byte string.
///
/// `Vec<u8>` and `&[u8]` hash element-wise through the generic sequence
/// impls; wrap raw payloads in this to reach [`ValueView::Bytes`] and
/// hash them as one canonical value.
#[derive(Debug, Clone, Copy)]
pub struct Bytes<'a>(pub &'a [u8]);

impl Fingerprintable for Bytes<'_> {
    fn view(&self) -> ValueView {
        ValueView::Bytes(self.0.to_vec())
    }
}

macro_rules! int_fingerprintable {
    ($($t:ty),*) => {
        $(impl Fingerprintable for $t {
            fn view(&self) -> ValueView {
                ValueView::Int(*self as i64)
            }
        })*
    };
}

macro_rules! uint_fingerprintable {
    ($($t:ty),*) => {
        $(impl Fingerprintable for $t {
            fn view(&self) -> ValueView {
                ValueView::UInt(*self as u64)
            }
        })*
    };
}

int_fingerprintable!(i8, i16, i32, i64, isize);
uint_fingerprintable!(u8, u16, u32, u64, usize);

impl Fingerprintable for f32 {
    fn view(&self) -> ValueView {
        ValueView::Float(f64::from(*self))
    }
}

impl Fingerprintable for f64 {
    fn view(&self) -> ValueView {
        ValueView::Float(*self)
    }
}

impl Fingerprintable for str {
    fn view(&self) -> ValueView {
        ValueView::Str(self.to_string())
    }
}

impl Fingerprintable for String {
    fn view(&self) -> ValueView {
        ValueView::Str(self.clone())
    }
}

impl<T: Fingerprintable> Fingerprintable for Option<T> {
    fn view(&self) -> ValueView {
        match self {
            Some(value) => view_of(value),
            None => ValueView::Null,
        }
    }
}

impl<T: Fingerprintable> Fingerprintable for Vec<T> {
    fn view(&self) -> ValueView {
        ValueView::Seq(self.iter().map(view_of).collect())
    }
}

impl<T: Fingerprintable> Fingerprintable for [T] {
    fn view(&self) -> ValueView {
        ValueView::Seq(self.iter().map(view_of).collect())
    }
}

impl<T: Fingerprintable> Fingerprintable for HashSet<T> {
    fn view(&self) -> ValueView {
        ValueView::Set(self.iter().map(view_of).collect())
    }
}

impl<T: Fingerprintable> Fingerprintable for BTreeSet<T> {
    fn view(&self) -> ValueView {
        ValueView::Set(self.iter().map(view_of).collect())
    }
}

impl<K: Fingerprintable, V: Fingerprintable> Fingerprintable for HashMap<K, V> {
    fn view(&self) -> ValueView {
        ValueView::Map(self.iter().map(|(k, v)| (view_of(k), view_of(v))).collect())
    }
}

impl<K: Fingerprintable, V: Fingerprintable> Fingerprintable for BTreeMap<K, V> {
    fn view(&self) -> ValueView {
        ValueView::Map(self.iter().map(|(k, v)| (view_of(k), view_of(v))).collect())
    }
}

impl Fingerprintable for serde_json::Value {
    fn view(&self) -> ValueView {
        match self {
            serde_json::Value::Null => ValueView::Null,
            serde_json::Value::Bool(b) => ValueView::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ValueView::Int(i)
                } else if let Some(u) = n.as_u64() {
                    ValueView::UInt(u)
                } else {
                    ValueView::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => ValueView::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ValueView::Seq(items.iter().map(|v| v.view()).collect())
            }
            serde_json::Value::Object(entries) => ValueView::Map(
                entries
                    .iter()
                    .map(|(k, v)| (ValueView::Str(k.clone()), v.view()))
                    .collect(),
            ),
        }
    }
}
