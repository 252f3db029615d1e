//! # Validation Module
//!
//! Construction-time validation for repository configuration.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Repository construction (THIS MODULE)                        │
//! │  ├── Table / collection / column identifiers                           │
//! │  └── Batch and page sizes                                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Adapter call                                                 │
//! │  └── Key arity against the collection's key columns                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── UNIQUE / PRIMARY KEY constraints                                  │
//! │                                                                         │
//! │  Construction fails fast: nothing is deferred to first use.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest identifier accepted for tables, columns and collections.
pub const MAX_IDENTIFIER_LEN: usize = 64;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a SQL identifier (table or column name).
///
/// ## Rules
/// - Must not be empty
/// - At most 64 characters
/// - ASCII letters, digits and underscores only, not starting with a digit
///
/// Identifiers are interpolated into SQL text, so anything else is refused.
///
/// ## Example
/// ```rust
/// use repokit_core::validation::validate_identifier;
///
/// assert!(validate_identifier("table", "test_objects").is_ok());
/// assert!(validate_identifier("table", "objects; DROP TABLE x").is_err());
/// ```
pub fn validate_identifier(field: &str, name: &str) -> ValidationResult<()> {
    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    let mut chars = name.chars();
    let starts_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if !starts_ok || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!(
                "'{}' must contain only ASCII letters, digits and underscores, and not start with a digit",
                name
            ),
        });
    }

    Ok(())
}

/// Validates a document collection name.
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 64 characters
/// - Letters, digits, hyphens, underscores and dots
pub fn validate_collection_name(name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "collection".to_string(),
        });
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::TooLong {
            field: "collection".to_string(),
            max: MAX_IDENTIFIER_LEN,
        });
    }

    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ValidationError::InvalidFormat {
            field: "collection".to_string(),
            reason: "must contain only letters, numbers, hyphens, underscores, and dots".to_string(),
        });
    }

    Ok(())
}

/// Validates a list of identifiers, rejecting empties and duplicates.
pub fn validate_identifier_list(field: &str, names: &[String]) -> ValidationResult<()> {
    if names.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    for (i, name) in names.iter().enumerate() {
        validate_identifier(field, name)?;
        if names[..i].contains(name) {
            return Err(ValidationError::Duplicate {
                field: field.to_string(),
                value: name.clone(),
            });
        }
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a positive size setting (batch size, page size, parallelism).
///
/// ## Rules
/// - Must be at least 1
/// - Must not exceed `max`
pub fn validate_size(field: &str, value: usize, max: usize) -> ValidationResult<()> {
    if value == 0 || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: max as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier() {
        // Valid identifiers
        assert!(validate_identifier("table", "objects").is_ok());
        assert!(validate_identifier("table", "_private").is_ok());
        assert!(validate_identifier("column", "value2").is_ok());

        // Invalid identifiers
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "2fast").is_err());
        assert!(validate_identifier("table", "has space").is_err());
        assert!(validate_identifier("table", "quote\"d").is_err());
        assert!(validate_identifier("table", &"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("customers").is_ok());
        assert!(validate_collection_name("eu.customers-v2").is_ok());

        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("   ").is_err());
        assert!(validate_collection_name("a/b").is_err());
    }

    #[test]
    fn test_validate_identifier_list() {
        let ok = vec!["id".to_string(), "value".to_string()];
        assert!(validate_identifier_list("columns", &ok).is_ok());

        let dup = vec!["id".to_string(), "id".to_string()];
        assert!(matches!(
            validate_identifier_list("columns", &dup),
            Err(ValidationError::Duplicate { .. })
        ));

        assert!(validate_identifier_list("columns", &[]).is_err());
    }

    #[test]
    fn test_validate_size() {
        assert!(validate_size("batch_size", 1, 10_000).is_ok());
        assert!(validate_size("batch_size", 100, 10_000).is_ok());

        assert!(validate_size("batch_size", 0, 10_000).is_err());
        assert!(validate_size("batch_size", 10_001, 10_000).is_err());
    }
}
