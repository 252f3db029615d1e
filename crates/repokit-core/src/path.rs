//! # Path Updates
//!
//! Structured partial updates addressed by a property path.
//!
//! ## How It Works
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    update_path("address.lines[1]", json, Set)           │
//! │                                                                         │
//! │  Entity ──serde──► JSON value                                          │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  Parse path:  [Field("address"), Field("lines"), Index(1)]             │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  Navigate to the parent, apply at the last segment:                    │
//! │    Set   → replace the value                                           │
//! │    Merge → RFC 7386 merge patch onto the existing value                │
//! │                       │                                                 │
//! │                       ▼                                                 │
//! │  JSON value ──serde──► Entity (fails if the shape no longer fits)      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Path Syntax
//! - `""` addresses the entity root
//! - `a.b.c` addresses nested object members
//! - `items[2]` addresses an array element (must already exist)

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{RepoError, RepoResult};
use crate::patch::merge_json;

// =============================================================================
// Update Type
// =============================================================================

/// How JSON is applied at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// Replace the addressed value.
    #[default]
    Set,

    /// Merge the JSON object into the addressed value (RFC 7386).
    Merge,
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateType::Set => write!(f, "set"),
            UpdateType::Merge => write!(f, "merge"),
        }
    }
}

impl FromStr for UpdateType {
    type Err = RepoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "set" | "replace" => Ok(UpdateType::Set),
            "merge" | "patch" => Ok(UpdateType::Merge),
            other => Err(RepoError::Configuration(format!(
                "Unknown update type: '{}'. Valid options: set, merge",
                other
            ))),
        }
    }
}

// =============================================================================
// Property Path
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => write!(f, "'{}'", name),
            Segment::Index(i) => write!(f, "[{}]", i),
        }
    }
}

/// A parsed property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    raw: String,
    segments: Vec<Segment>,
}

impl PropertyPath {
    /// Parses a path such as `a.b[2].c`.
    pub fn parse(raw: &str) -> RepoResult<Self> {
        let trimmed = raw.trim();
        let mut segments = Vec::new();

        if trimmed.is_empty() {
            return Ok(PropertyPath {
                raw: String::new(),
                segments,
            });
        }

        for (position, part) in trimmed.split('.').enumerate() {
            if part.is_empty() {
                return Err(RepoError::invalid_path(raw, "empty segment"));
            }

            let (name, mut rest) = match part.find('[') {
                Some(idx) => part.split_at(idx),
                None => (part, ""),
            };

            if name.is_empty() && position > 0 {
                return Err(RepoError::invalid_path(
                    raw,
                    "index must follow a field name",
                ));
            }
            if name.contains(']') {
                return Err(RepoError::invalid_path(raw, "unbalanced ']'"));
            }
            if !name.is_empty() {
                segments.push(Segment::Field(name.to_string()));
            }

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| RepoError::invalid_path(raw, "unclosed '['"))?;
                let index = rest[1..close].parse::<usize>().map_err(|_| {
                    RepoError::invalid_path(raw, format!("'{}' is not an index", &rest[1..close]))
                })?;
                segments.push(Segment::Index(index));

                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(RepoError::invalid_path(
                        raw,
                        "unexpected characters after ']'",
                    ));
                }
            }
        }

        Ok(PropertyPath {
            raw: trimmed.to_string(),
            segments,
        })
    }

    /// Returns true if the path addresses the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// The path as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Applies `value` at this path inside `doc`.
    pub fn apply(&self, doc: &mut Value, value: Value, update_type: UpdateType) -> RepoResult<()> {
        let Some((last, parents)) = self.segments.split_last() else {
            apply_value(doc, value, update_type);
            return Ok(());
        };

        let mut current = doc;
        for segment in parents {
            current = self.child_mut(current, segment)?;
        }

        match (last, current) {
            (Segment::Field(name), Value::Object(members)) => {
                match update_type {
                    UpdateType::Set => {
                        members.insert(name.clone(), value);
                    }
                    UpdateType::Merge => {
                        merge_json(members.entry(name.clone()).or_insert(Value::Null), &value);
                    }
                }
                Ok(())
            }
            (Segment::Index(i), Value::Array(items)) => {
                let len = items.len();
                let slot = items.get_mut(*i).ok_or_else(|| {
                    RepoError::invalid_path(
                        &self.raw,
                        format!("index {} out of range (length {})", i, len),
                    )
                })?;
                apply_value(slot, value, update_type);
                Ok(())
            }
            (segment, other) => Err(RepoError::invalid_path(
                &self.raw,
                format!("cannot address {} inside {}", segment, kind(other)),
            )),
        }
    }

    fn child_mut<'v>(&self, parent: &'v mut Value, segment: &Segment) -> RepoResult<&'v mut Value> {
        match (segment, parent) {
            (Segment::Field(name), Value::Object(members)) => members
                .get_mut(name)
                .ok_or_else(|| RepoError::invalid_path(&self.raw, format!("missing parent '{}'", name))),
            (Segment::Index(i), Value::Array(items)) => {
                let len = items.len();
                items.get_mut(*i).ok_or_else(|| {
                    RepoError::invalid_path(
                        &self.raw,
                        format!("index {} out of range (length {})", i, len),
                    )
                })
            }
            (segment, other) => Err(RepoError::invalid_path(
                &self.raw,
                format!("cannot address {} inside {}", segment, kind(other)),
            )),
        }
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            write!(f, "<root>")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

fn apply_value(slot: &mut Value, value: Value, update_type: UpdateType) {
    match update_type {
        UpdateType::Set => *slot = value,
        UpdateType::Merge => merge_json(slot, &value),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// =============================================================================
// Entity Updates
// =============================================================================

/// Applies JSON text at `path` to an entity through its serde form.
///
/// ## Arguments
/// * `entity` - Entity to update in place (left untouched on error)
/// * `path` - Property path, empty for the root
/// * `json` - JSON text of the new value
/// * `update_type` - Replace or merge
///
/// ## Errors
/// * `InvalidPath` - Bad syntax or a path that does not exist
/// * `Serialization` - Bad JSON, or the result no longer fits `T`
pub fn update_entity<T>(entity: &mut T, path: &str, json: &str, update_type: UpdateType) -> RepoResult<()>
where
    T: Serialize + DeserializeOwned,
{
    let path = PropertyPath::parse(path)?;
    let value: Value = serde_json::from_str(json)?;

    let mut doc = serde_json::to_value(&*entity)?;
    path.apply(&mut doc, value, update_type)?;

    *entity = serde_json::from_value(doc).map_err(|e| {
        RepoError::Serialization(format!("update at {} does not fit the entity: {}", path, e))
    })?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Address {
        city: String,
        lines: Vec<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Customer {
        id: i64,
        name: String,
        address: Address,
        #[serde(default)]
        note: Option<String>,
    }

    fn sample() -> Customer {
        Customer {
            id: 1,
            name: "Ada".to_string(),
            address: Address {
                city: "London".to_string(),
                lines: vec!["1 Main St".to_string(), "Flat 2".to_string()],
            },
            note: None,
        }
    }

    #[test]
    fn test_parse_paths() {
        assert!(PropertyPath::parse("").unwrap().is_root());
        assert_eq!(PropertyPath::parse("a.b[2].c").unwrap().segments.len(), 4);
        assert_eq!(PropertyPath::parse("[0]").unwrap().segments, vec![Segment::Index(0)]);
        assert_eq!(
            PropertyPath::parse("m[1][2]").unwrap().segments,
            vec![
                Segment::Field("m".to_string()),
                Segment::Index(1),
                Segment::Index(2)
            ]
        );

        assert!(PropertyPath::parse("a..b").is_err());
        assert!(PropertyPath::parse("a.").is_err());
        assert!(PropertyPath::parse("a[x]").is_err());
        assert!(PropertyPath::parse("a[1").is_err());
        assert!(PropertyPath::parse("a[1]b").is_err());
        assert!(PropertyPath::parse("a.[1]").is_err());
    }

    #[test]
    fn test_set_nested_field() {
        let mut customer = sample();
        update_entity(&mut customer, "address.city", "\"Paris\"", UpdateType::Set).unwrap();
        assert_eq!(customer.address.city, "Paris");
        assert_eq!(customer.name, "Ada");
    }

    #[test]
    fn test_set_array_element() {
        let mut customer = sample();
        update_entity(&mut customer, "address.lines[1]", "\"Flat 3\"", UpdateType::Set).unwrap();
        assert_eq!(customer.address.lines, vec!["1 Main St", "Flat 3"]);
    }

    #[test]
    fn test_index_out_of_range() {
        let mut customer = sample();
        let err = update_entity(&mut customer, "address.lines[5]", "\"x\"", UpdateType::Set)
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidPath { .. }));
        assert_eq!(customer, sample());
    }

    #[test]
    fn test_missing_parent() {
        let mut customer = sample();
        let err = update_entity(&mut customer, "billing.city", "\"x\"", UpdateType::Set)
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidPath { .. }));
    }

    #[test]
    fn test_merge_at_path() {
        let mut customer = sample();
        update_entity(&mut customer, "address", r#"{ "city": "Rome" }"#, UpdateType::Merge)
            .unwrap();
        assert_eq!(customer.address.city, "Rome");
        assert_eq!(customer.address.lines.len(), 2);
    }

    #[test]
    fn test_merge_at_root() {
        let mut customer = sample();
        update_entity(&mut customer, "", r#"{ "note": "vip" }"#, UpdateType::Merge).unwrap();
        assert_eq!(customer.note.as_deref(), Some("vip"));
        assert_eq!(customer.address, sample().address);
    }

    #[test]
    fn test_set_root_requires_full_entity() {
        let mut customer = sample();
        let err = update_entity(&mut customer, "", r#"{ "id": 2 }"#, UpdateType::Set).unwrap_err();
        assert!(matches!(err, RepoError::Serialization(_)));
        assert_eq!(customer, sample());
    }

    #[test]
    fn test_wrong_shape_is_rejected() {
        let mut customer = sample();
        let err = update_entity(&mut customer, "id", "\"one\"", UpdateType::Set).unwrap_err();
        assert!(matches!(err, RepoError::Serialization(_)));

        let err = update_entity(&mut customer, "name.first", "\"x\"", UpdateType::Set).unwrap_err();
        assert!(matches!(err, RepoError::InvalidPath { .. }));
    }

    #[test]
    fn test_raw_value_apply() {
        let mut doc = json!({ "a": { "b": [1, 2] } });
        PropertyPath::parse("a.b[0]")
            .unwrap()
            .apply(&mut doc, json!(9), UpdateType::Set)
            .unwrap();
        assert_eq!(doc, json!({ "a": { "b": [9, 2] } }));
    }

    #[test]
    fn test_update_type_parsing() {
        assert_eq!("set".parse::<UpdateType>().unwrap(), UpdateType::Set);
        assert_eq!("MERGE".parse::<UpdateType>().unwrap(), UpdateType::Merge);
        assert!("append".parse::<UpdateType>().is_err());
    }
}
