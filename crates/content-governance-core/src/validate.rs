use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::{display_value, is_missing, CollectionData, CollectionShape, Record};
use crate::schema::CollectionSchema;

/// Outcome of validating one collection. Data problems live here, never in an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub collection: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub total_items: usize,
}

/// The first few errors of a result, for scannable output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorSample {
    pub shown: Vec<String>,
    pub omitted: usize,
}

impl ValidationResult {
    /// Result for a collection that could not be loaded at all.
    #[must_use]
    pub fn unavailable(collection: &str, message: String) -> Self {
        Self {
            collection: collection.to_string(),
            valid: false,
            errors: vec![message],
            warnings: Vec::new(),
            total_items: 0,
        }
    }

    #[must_use]
    pub fn sample_errors(&self, limit: usize) -> ErrorSample {
        ErrorSample {
            shown: self.errors.iter().take(limit).cloned().collect(),
            omitted: self.errors.len().saturating_sub(limit),
        }
    }
}

/// Validate `data` against `schema`, reporting every violation in one pass.
///
/// A missing schema is not an error: the collection passes with a warning.
#[must_use]
pub fn validate_collection(
    name: &str,
    schema: Option<&CollectionSchema>,
    data: &CollectionData,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let total_items = data.len();

    let Some(schema) = schema else {
        warnings.push(format!("no schema registered for `{name}`; validation skipped"));
        return ValidationResult {
            collection: name.to_string(),
            valid: true,
            errors,
            warnings,
            total_items,
        };
    };

    if data.shape() != schema.shape {
        errors.push(format!(
            "collection `{name}` is declared as a {} but holds a {}",
            schema.shape.as_str(),
            data.shape().as_str()
        ));
    }

    if data.is_empty() {
        warnings.push(format!("collection `{name}` is empty"));
    }

    let records = data.records();
    for (index, record) in records.iter().enumerate() {
        validate_record(schema, index, record, &mut errors);
    }

    if schema.shape == CollectionShape::Sequence {
        if let Some(field) = schema.unique_field.as_deref() {
            let duplicates = duplicate_values(records, field);
            if !duplicates.is_empty() {
                let listed =
                    duplicates.iter().map(|value| format!("\"{value}\"")).collect::<Vec<_>>();
                errors.push(format!("duplicate {field} values: {}", listed.join(", ")));
            }
        }
    }

    ValidationResult {
        collection: name.to_string(),
        valid: errors.is_empty(),
        errors,
        warnings,
        total_items,
    }
}

fn validate_record(
    schema: &CollectionSchema,
    index: usize,
    record: &Record,
    errors: &mut Vec<String>,
) {
    for field in &schema.required_fields {
        if is_missing(record.get(field)) {
            errors.push(format!("item {index}: missing required field `{field}`"));
        }
    }

    for (field, value) in record {
        if value.is_null() {
            continue;
        }
        let Some(rules) = schema.field_validators.get(field) else {
            continue;
        };
        for rule in rules {
            if let Some(message) = rule.check(field, value) {
                errors.push(format!("item {index}: {message}"));
            }
        }
    }
}

/// Values of `field` that occur more than once, sorted.
#[must_use]
pub fn duplicate_values(records: &[Record], field: &str) -> BTreeSet<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for value in records.iter().filter_map(|record| key_value(record.get(field))) {
        *counts.entry(value).or_default() += 1;
    }
    counts.into_iter().filter(|(_, count)| *count > 1).map(|(value, _)| value).collect()
}

/// Identifier-like values only; missing and structured values never collide.
pub(crate) fn key_value(value: Option<&Value>) -> Option<String> {
    match value {
        Some(value @ (Value::String(_) | Value::Number(_))) if !is_missing(Some(value)) => {
            Some(display_value(value))
        }
        _ => None,
    }
}
