//! # Patches
//!
//! Partial updates applied to a stored entity.
//!
//! ## Patch Kinds
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Patch<T>                                        │
//! │                                                                         │
//! │  Closure            |o: &mut Order| o.status = Status::Paid            │
//! │  ────────           Checked at compile time, touches exactly the       │
//! │                     fields it names.                                   │
//! │                                                                         │
//! │  Typed patch        struct OrderPatch { status: Option<Status> }       │
//! │  ───────────        impl Patch<Order> for OrderPatch { ... }           │
//! │                                                                         │
//! │  MergePatch         MergePatch::new(json!({ "status": "paid" }))       │
//! │  ──────────         JSON merge patch (RFC 7386) matched by field name  │
//! │                     at run time. Same-named fields are copied, all     │
//! │                     other fields are left untouched.                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::RepoResult;

/// A partial update applied in place to a `T`.
pub trait Patch<T: ?Sized> {
    /// Applies the patch to `target`.
    fn apply(self, target: &mut T) -> RepoResult<()>;
}

impl<T: ?Sized, F> Patch<T> for F
where
    F: FnOnce(&mut T),
{
    fn apply(self, target: &mut T) -> RepoResult<()> {
        self(target);
        Ok(())
    }
}

// =============================================================================
// Merge Patch
// =============================================================================

/// A JSON merge patch applied by field name.
///
/// ## Null Handling
/// A `null` in the patch removes the field from the target's JSON form
/// before it is converted back, so it only makes sense for optional or
/// defaulted fields. Serialize partial structs with
/// `#[serde(skip_serializing_if = "Option::is_none")]` to leave absent
/// fields untouched.
///
/// ## Example
/// ```rust
/// use repokit_core::{MergePatch, Patch};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Item { id: i64, value: String }
///
/// let mut item = Item { id: 1, value: "a".into() };
/// MergePatch::new(serde_json::json!({ "value": "b" })).apply(&mut item).unwrap();
/// assert_eq!(item.value, "b");
/// assert_eq!(item.id, 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MergePatch(Value);

impl MergePatch {
    /// Wraps a JSON value as a merge patch.
    pub fn new(patch: Value) -> Self {
        MergePatch(patch)
    }

    /// Builds a merge patch from any serializable value (a partial struct).
    pub fn from_serialize<P: Serialize>(patch: &P) -> RepoResult<Self> {
        Ok(MergePatch(serde_json::to_value(patch)?))
    }

    /// Parses a merge patch from JSON text.
    pub fn from_json(json: &str) -> RepoResult<Self> {
        Ok(MergePatch(serde_json::from_str(json)?))
    }

    /// The underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

impl<T> Patch<T> for MergePatch
where
    T: Serialize + DeserializeOwned,
{
    fn apply(self, target: &mut T) -> RepoResult<()> {
        let mut value = serde_json::to_value(&*target)?;
        merge_json(&mut value, &self.0);
        *target = serde_json::from_value(value)?;
        Ok(())
    }
}

/// Applies `patch` onto `target` following RFC 7386.
///
/// ## Rules
/// - Object patch: each member is merged recursively, `null` removes
/// - Any other patch value replaces the target outright
pub fn merge_json(target: &mut Value, patch: &Value) {
    let Value::Object(patch_members) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(target_members) = target {
        for (name, value) in patch_members {
            if value.is_null() {
                target_members.remove(name);
            } else {
                merge_json(
                    target_members.entry(name.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Inner {
        value1: Option<i64>,
        value2: String,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Outer {
        key: i64,
        value2: String,
        property: Inner,
    }

    fn sample() -> Outer {
        Outer {
            key: 1,
            value2: "old".to_string(),
            property: Inner {
                value1: Some(1),
                value2: "old".to_string(),
            },
        }
    }

    #[test]
    fn test_closure_patch() {
        let mut outer = sample();
        (|o: &mut Outer| o.value2 = "new".to_string())
            .apply(&mut outer)
            .unwrap();
        assert_eq!(outer.value2, "new");
        assert_eq!(outer.property.value2, "old");
    }

    #[test]
    fn test_merge_patch_touches_only_named_fields() {
        let mut outer = sample();
        MergePatch::new(json!({ "value2": "new" }))
            .apply(&mut outer)
            .unwrap();

        assert_eq!(outer.key, 1);
        assert_eq!(outer.value2, "new");
        assert_eq!(outer.property, sample().property);
    }

    #[test]
    fn test_merge_patch_on_nested_object() {
        let mut outer = sample();
        MergePatch::new(json!({ "value2": "new" }))
            .apply(&mut outer.property)
            .unwrap();

        assert_eq!(outer.value2, "old");
        assert_eq!(outer.property.value2, "new");
        assert_eq!(outer.property.value1, Some(1));
    }

    #[test]
    fn test_merge_patch_null_clears_optional() {
        let mut inner = sample().property;
        MergePatch::new(json!({ "value1": null }))
            .apply(&mut inner)
            .unwrap();
        assert_eq!(inner.value1, None);
    }

    #[test]
    fn test_merge_patch_type_mismatch_fails() {
        let mut outer = sample();
        let result = MergePatch::new(json!({ "key": "not a number" })).apply(&mut outer);
        assert!(result.is_err());
    }

    #[test]
    fn test_merge_json_rfc_examples() {
        let mut target = json!({ "a": "b", "c": { "d": "e", "f": "g" } });
        merge_json(&mut target, &json!({ "a": "z", "c": { "f": null } }));
        assert_eq!(target, json!({ "a": "z", "c": { "d": "e" } }));

        let mut target = json!({ "a": ["b"] });
        merge_json(&mut target, &json!({ "a": "c" }));
        assert_eq!(target, json!({ "a": "c" }));

        let mut target = json!("scalar");
        merge_json(&mut target, &json!({ "a": 1 }));
        assert_eq!(target, json!({ "a": 1 }));
    }
}
