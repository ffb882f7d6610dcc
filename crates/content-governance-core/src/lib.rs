//! Domain model for governing flat record collections: schemas and validation,
//! versioned migrations, quality metrics and cross-collection consistency.
//!
//! Nothing in this crate touches the filesystem; persistence lives in the store
//! crate and reaches the domain through [`CollectionSource`].

pub mod alerts;
pub mod catalog;
pub mod collection;
pub mod consistency;
pub mod error;
pub mod migration;
pub mod quality;
pub mod schema;
pub mod trends;
pub mod validate;
pub mod version;

pub use alerts::{derive_alerts, Alert, AlertLevel, AlertThresholds};
pub use catalog::{site_consistency_checks, site_migrations, site_registry};
pub use collection::{
    display_value, is_missing, CollectionData, CollectionShape, CollectionSource, Record, ValueKind,
};
pub use consistency::{run_checks, CheckResult, ConsistencyCheck, ConsistencyReport};
pub use error::GovernanceError;
pub use migration::{
    Direction, MigrationCatalog, MigrationPlan, MigrationStep, PlannedStep,
};
pub use quality::{
    compute_metrics, CompletenessBucket, MetricsInput, QualityMetrics, QualityReport,
    QualitySummary, ReferenceStatus, ValidationSummary,
};
pub use schema::{CollectionSchema, FieldKind, FieldRule, ReferenceRule, SchemaRegistry};
pub use trends::{compute_trends, TrendReport, TrendSeries};
pub use validate::{validate_collection, ErrorSample, ValidationResult};
pub use version::SchemaVersion;

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::{json, Value};

    use super::*;

    fn loose_record() -> impl Strategy<Value = Value> {
        (
            prop::option::of("[a-z]{0,3}"),
            prop::option::of(prop_oneof![
                Just(json!("fiction")),
                Just(json!("poetry")),
                Just(json!(7)),
                Just(Value::Null),
            ]),
            prop::option::of(0_i64..3000),
            prop::option::of("(https://x\\.io/[a-z]{1,3})|(cover\\.jpg)|(/img/a\\.png)"),
        )
            .prop_map(|(slug, category, year, cover)| {
                let mut record = serde_json::Map::new();
                if let Some(slug) = slug {
                    record.insert("slug".to_string(), json!(slug));
                }
                if let Some(category) = category {
                    record.insert("category".to_string(), category);
                }
                if let Some(year) = year {
                    record.insert("year".to_string(), json!(year));
                }
                if let Some(cover) = cover {
                    record.insert("cover".to_string(), json!(cover));
                }
                Value::Object(record)
            })
    }

    proptest! {
        #[test]
        fn property_validation_is_deterministic(
            records in prop::collection::vec(loose_record(), 0..12),
        ) {
            let registry = site_registry();
            let data = CollectionData::from_value("books", Value::Array(records))
                .unwrap_or_else(|err| panic!("fixture: {err}"));
            let first = validate_collection("books", registry.schema("books"), &data);
            let second = validate_collection("books", registry.schema("books"), &data);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.valid, first.errors.is_empty());
        }

        #[test]
        fn property_duplicate_slugs_yield_exactly_one_aggregated_error(
            slug in "[a-z]{1,6}",
            copies in 2_usize..6,
        ) {
            let records = (0..copies)
                .map(|index| json!({"slug": slug, "category": format!("c{index}")}))
                .collect::<Vec<_>>();
            let schema = CollectionSchema::sequence("books").unique("slug");
            let data = CollectionData::from_value("books", Value::Array(records))
                .unwrap_or_else(|err| panic!("fixture: {err}"));
            let result = validate_collection("books", Some(&schema), &data);
            let duplicate_errors =
                result.errors.iter().filter(|error| error.contains("duplicate")).count();
            prop_assert!(!result.valid);
            prop_assert_eq!(duplicate_errors, 1);
            let quoted = format!("\"{slug}\"");
            prop_assert!(result.errors.iter().any(|error| error.contains(&quoted)));
        }
    }
}
