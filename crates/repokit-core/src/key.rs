//! # Key Tuples
//!
//! Every entity is identified by an ordered tuple of key components.
//!
//! ## Key Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Key Tuples                                      │
//! │                                                                         │
//! │  Single column          Key::from(1)            → (1)                  │
//! │  Text key               Key::from("COKE-330")   → ("COKE-330")         │
//! │  Composite key          Key::from((7, "eu"))    → (7, "eu")            │
//! │                                                                         │
//! │  The repository's key extractor produces the same shape:               │
//! │                                                                         │
//! │    |o: &Order| Key::from((o.tenant, o.number.clone()))                 │
//! │                                                                         │
//! │  Arity and order passed to find/remove/exists/update must match.       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Key Component
// =============================================================================

/// One component of a key tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Uuid(Uuid),
    Bool(bool),
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Text(v) => write!(f, "{:?}", v),
            KeyValue::Uuid(v) => write!(f, "{}", v),
            KeyValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

macro_rules! key_value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for KeyValue {
                fn from(v: $ty) -> Self {
                    KeyValue::Int(i64::from(v))
                }
            }
        )*
    };
}

key_value_from_int!(i64, i32, i16, u32, u16, u8);

impl From<&str> for KeyValue {
    fn from(v: &str) -> Self {
        KeyValue::Text(v.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(v: String) -> Self {
        KeyValue::Text(v)
    }
}

impl From<&String> for KeyValue {
    fn from(v: &String) -> Self {
        KeyValue::Text(v.clone())
    }
}

impl From<Uuid> for KeyValue {
    fn from(v: Uuid) -> Self {
        KeyValue::Uuid(v)
    }
}

impl From<bool> for KeyValue {
    fn from(v: bool) -> Self {
        KeyValue::Bool(v)
    }
}

// =============================================================================
// Key Tuple
// =============================================================================

/// An ordered tuple of key components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Vec<KeyValue>);

impl Key {
    /// Creates a key from its components.
    pub fn new(components: Vec<KeyValue>) -> Self {
        Key(components)
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the zero-component key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The components in order.
    pub fn components(&self) -> &[KeyValue] {
        &self.0
    }

    /// Canonical text form: a JSON array of the components.
    ///
    /// Used as the document key by the document adapter.
    ///
    /// ## Example
    /// ```rust
    /// use repokit_core::Key;
    ///
    /// assert_eq!(Key::from((1, "eu")).encode(), r#"[1,"eu"]"#);
    /// ```
    pub fn encode(&self) -> String {
        // A Vec of plain scalars always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, component) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", component)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(components: Vec<KeyValue>) -> Self {
        Key(components)
    }
}

impl From<KeyValue> for Key {
    fn from(v: KeyValue) -> Self {
        Key(vec![v])
    }
}

macro_rules! key_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(v: $ty) -> Self {
                    Key(vec![KeyValue::from(v)])
                }
            }
        )*
    };
}

key_from_scalar!(i64, i32, i16, u32, u16, u8, &str, String, &String, Uuid, bool);

impl<A, B> From<(A, B)> for Key
where
    A: Into<KeyValue>,
    B: Into<KeyValue>,
{
    fn from((a, b): (A, B)) -> Self {
        Key(vec![a.into(), b.into()])
    }
}

impl<A, B, C> From<(A, B, C)> for Key
where
    A: Into<KeyValue>,
    B: Into<KeyValue>,
    C: Into<KeyValue>,
{
    fn from((a, b, c): (A, B, C)) -> Self {
        Key(vec![a.into(), b.into(), c.into()])
    }
}

// =============================================================================
// Key Extractor
// =============================================================================

/// Caller-supplied function mapping an entity to its key tuple.
pub type KeyExtractor<T> = Arc<dyn Fn(&T) -> Key + Send + Sync>;

// =============================================================================
// Unit Tests
// =============================================================================
