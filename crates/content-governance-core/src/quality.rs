use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::collection::{is_missing, CollectionData, CollectionSource, Record, ValueKind};
use crate::schema::{CollectionSchema, ReferenceRule};
use crate::validate::{duplicate_values, key_value, ValidationResult};
use crate::GovernanceError;

/// Identifier fields whose uniqueness is always tracked.
pub const KEY_FIELDS: [&str; 2] = ["slug", "id"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
#[serde(rename_all = "snake_case")]
pub enum CompletenessBucket {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl CompletenessBucket {
    #[must_use]
    pub fn from_percent(percent: f64) -> Self {
        if percent >= 90.0 {
            Self::Excellent
        } else if percent >= 75.0 {
            Self::Good
        } else if percent >= 50.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldCompleteness {
    pub field: String,
    pub present: usize,
    pub total: usize,
    pub percent: f64,
    pub bucket: CompletenessBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldTypes {
    pub field: String,
    pub kinds: BTreeSet<ValueKind>,
    /// More than one non-null kind was observed.
    pub drift: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UniquenessStatus {
    pub field: String,
    pub total: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub duplicate_values: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceStatus {
    Ok,
    Broken,
    MissingTarget,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokenReference {
    pub item: usize,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceHealth {
    pub field: String,
    pub target: String,
    pub target_field: String,
    pub status: ReferenceStatus,
    pub checked: usize,
    pub broken: usize,
    /// At most the configured sample limit of broken references.
    pub sample: Vec<BrokenReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationSummary {
    pub valid: bool,
    pub error_count: usize,
    pub warning_count: usize,
}

impl From<&ValidationResult> for ValidationSummary {
    fn from(result: &ValidationResult) -> Self {
        Self {
            valid: result.valid,
            error_count: result.errors.len(),
            warning_count: result.warnings.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityMetrics {
    pub collection: String,
    pub item_count: usize,
    pub byte_size: u64,
    pub validation: ValidationSummary,
    /// Mean of the per-field completeness percentages.
    pub completeness: f64,
    pub fields: Vec<FieldCompleteness>,
    pub field_types: Vec<FieldTypes>,
    pub uniqueness: Vec<UniquenessStatus>,
    pub references: Vec<ReferenceHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
}

impl QualityMetrics {
    /// Metrics placeholder for a collection that could not be loaded.
    #[must_use]
    pub fn unavailable(collection: &str, error: &GovernanceError) -> Self {
        Self {
            collection: collection.to_string(),
            item_count: 0,
            byte_size: 0,
            validation: ValidationSummary {
                valid: false,
                error_count: 1,
                warning_count: 0,
            },
            completeness: 0.0,
            fields: Vec::new(),
            field_types: Vec::new(),
            uniqueness: Vec::new(),
            references: Vec::new(),
            load_error: Some(error.to_string()),
        }
    }

    #[must_use]
    pub fn has_broken_references(&self) -> bool {
        self.references.iter().any(|reference| reference.status != ReferenceStatus::Ok)
    }

    #[must_use]
    pub fn has_duplicate_keys(&self) -> bool {
        self.uniqueness.iter().any(|status| status.duplicates > 0)
    }
}

/// Everything needed to measure one loaded collection.
pub struct MetricsInput<'a> {
    pub name: &'a str,
    pub data: &'a CollectionData,
    pub byte_size: u64,
    pub schema: Option<&'a CollectionSchema>,
    pub validation: &'a ValidationResult,
    pub source: &'a dyn CollectionSource,
    pub broken_sample_limit: usize,
}

#[must_use]
pub fn compute_metrics(input: &MetricsInput<'_>) -> QualityMetrics {
    let records = input.data.records();
    let declared = input.schema.map(CollectionSchema::declared_fields).unwrap_or_default();
    let fields = field_completeness(records, &declared);
    let completeness = average(fields.iter().map(|field| field.percent));

    QualityMetrics {
        collection: input.name.to_string(),
        item_count: records.len(),
        byte_size: input.byte_size,
        validation: ValidationSummary::from(input.validation),
        completeness,
        fields,
        field_types: field_types(records),
        uniqueness: uniqueness(records),
        references: input
            .schema
            .map(|schema| {
                schema
                    .references
                    .iter()
                    .map(|rule| {
                        reference_health(records, rule, input.source, input.broken_sample_limit)
                    })
                    .collect()
            })
            .unwrap_or_default(),
        load_error: None,
    }
}

/// Completeness of every observed field plus every `declared` field.
///
/// A declared field that no record carries is reported at 0%.
#[must_use]
pub fn field_completeness(records: &[Record], declared: &[String]) -> Vec<FieldCompleteness> {
    let mut names: BTreeSet<&str> = declared.iter().map(String::as_str).collect();
    for record in records {
        names.extend(record.keys().map(String::as_str));
    }

    let total = records.len();
    names
        .into_iter()
        .map(|field| {
            let present = records.iter().filter(|record| !is_missing(record.get(field))).count();
            let percent = percentage(present, total);
            FieldCompleteness {
                field: field.to_string(),
                present,
                total,
                percent,
                bucket: CompletenessBucket::from_percent(percent),
            }
        })
        .collect()
}

#[must_use]
pub fn field_types(records: &[Record]) -> Vec<FieldTypes> {
    let mut observed: BTreeMap<&str, BTreeSet<ValueKind>> = BTreeMap::new();
    for record in records {
        for (field, value) in record {
            observed.entry(field.as_str()).or_default().insert(ValueKind::of(value));
        }
    }
    observed
        .into_iter()
        .map(|(field, kinds)| {
            let drift = kinds.iter().filter(|kind| **kind != ValueKind::Null).count() > 1;
            FieldTypes {
                field: field.to_string(),
                kinds,
                drift,
            }
        })
        .collect()
}

/// Uniqueness of the identifier fields present in at least one record.
#[must_use]
pub fn uniqueness(records: &[Record]) -> Vec<UniquenessStatus> {
    KEY_FIELDS
        .iter()
        .filter(|field| records.iter().any(|record| record.contains_key(**field)))
        .map(|field| {
            let values = records
                .iter()
                .filter_map(|record| key_value(record.get(*field)))
                .collect::<Vec<_>>();
            let unique = values.iter().collect::<BTreeSet<_>>().len();
            let duplicate_values = duplicate_values(records, field).into_iter().collect();
            UniquenessStatus {
                field: (*field).to_string(),
                total: values.len(),
                unique,
                duplicates: values.len() - unique,
                duplicate_values,
            }
        })
        .collect()
}

fn reference_health(
    records: &[Record],
    rule: &ReferenceRule,
    source: &dyn CollectionSource,
    sample_limit: usize,
) -> ReferenceHealth {
    let mut health = ReferenceHealth {
        field: rule.field.clone(),
        target: rule.target.clone(),
        target_field: rule.target_field.clone(),
        status: ReferenceStatus::Ok,
        checked: 0,
        broken: 0,
        sample: Vec::new(),
        error: None,
    };

    let target = match source.load_collection(&rule.target) {
        Ok(target) => target,
        Err(err) => {
            health.status = ReferenceStatus::MissingTarget;
            health.error = Some(err.to_string());
            return health;
        }
    };
    let known = target
        .records()
        .iter()
        .filter_map(|record| key_value(record.get(&rule.target_field)))
        .collect::<BTreeSet<_>>();

    for (item, record) in records.iter().enumerate() {
        for value in reference_values(record.get(&rule.field)) {
            health.checked += 1;
            if !known.contains(&value) {
                health.broken += 1;
                if health.sample.len() < sample_limit {
                    health.sample.push(BrokenReference { item, value });
                }
            }
        }
    }
    if health.broken > 0 {
        health.status = ReferenceStatus::Broken;
    }
    health
}

/// A reference field may hold one identifier or a list of them.
pub(crate) fn reference_values(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => {
            items.iter().filter_map(|item| key_value(Some(item))).collect()
        }
        other => key_value(other).into_iter().collect(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualitySummary {
    pub total_collections: usize,
    pub valid_collections: usize,
    pub invalid_collections: usize,
    pub warned_collections: usize,
    pub average_completeness: f64,
    pub critical_issues: usize,
}

/// Aggregate metrics across collections at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualityReport {
    #[serde(with = "time::serde::rfc3339")]
    pub generated_at: OffsetDateTime,
    pub collections: Vec<QualityMetrics>,
    pub summary: QualitySummary,
}

impl QualityReport {
    #[must_use]
    pub fn new(generated_at: OffsetDateTime, collections: Vec<QualityMetrics>) -> Self {
        let summary = summarize(&collections);
        Self {
            generated_at,
            collections,
            summary,
        }
    }

    #[must_use]
    pub fn collection(&self, name: &str) -> Option<&QualityMetrics> {
        self.collections.iter().find(|metrics| metrics.collection == name)
    }
}

fn summarize(collections: &[QualityMetrics]) -> QualitySummary {
    let valid_collections = collections.iter().filter(|metrics| metrics.validation.valid).count();
    let warned_collections =
        collections.iter().filter(|metrics| metrics.validation.warning_count > 0).count();
    let average_completeness = average(
        collections
            .iter()
            .filter(|metrics| metrics.load_error.is_none())
            .map(|metrics| metrics.completeness),
    );
    let critical_issues = collections
        .iter()
        .map(|metrics| {
            usize::from(metrics.load_error.is_some())
                + metrics
                    .references
                    .iter()
                    .filter(|reference| reference.status != ReferenceStatus::Ok)
                    .count()
                + metrics.uniqueness.iter().filter(|status| status.duplicates > 0).count()
        })
        .sum();

    QualitySummary {
        total_collections: collections.len(),
        valid_collections,
        invalid_collections: collections.len() - valid_collections,
        warned_collections,
        average_completeness,
        critical_issues,
    }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / total as f64)
}

#[allow(clippy::cast_precision_loss)]
fn average(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0_usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        return 0.0;
    }
    round2(sum / count as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::validate::validate_collection;
    use serde_json::json;
    use time::macros::datetime;

    struct MapSource(HashMap<String, CollectionData>);

    impl CollectionSource for MapSource {
        fn load_collection(&self, name: &str) -> Result<CollectionData, GovernanceError> {
            self.0.get(name).cloned().ok_or_else(|| GovernanceError::NotFound(name.to_string()))
        }
    }

    fn records(value: Value) -> Result<Vec<Record>, GovernanceError> {
        Ok(CollectionData::from_value("test", value)?.records().to_vec())
    }

    fn percent_of(fields: &[FieldCompleteness], name: &str) -> Option<f64> {
        fields.iter().find(|field| field.field == name).map(|field| field.percent)
    }

    #[test]
    fn completeness_boundaries_at_full_half_and_zero() -> Result<(), GovernanceError> {
        let records = records(json!([
            {"slug": "a", "cover": "/a.jpg"},
            {"slug": "b", "cover": ""},
        ]))?;
        let fields = field_completeness(&records, &["isbn".to_string()]);
        assert_eq!(percent_of(&fields, "slug"), Some(100.0));
        assert_eq!(percent_of(&fields, "cover"), Some(50.0));
        assert_eq!(percent_of(&fields, "isbn"), Some(0.0));
        let bucket_of = |name: &str| fields.iter().find(|f| f.field == name).map(|f| f.bucket);
        assert_eq!(bucket_of("slug"), Some(CompletenessBucket::Excellent));
        assert_eq!(bucket_of("cover"), Some(CompletenessBucket::Fair));
        assert_eq!(bucket_of("isbn"), Some(CompletenessBucket::Poor));
        Ok(())
    }

    #[test]
    fn buckets_follow_thresholds() {
        assert_eq!(CompletenessBucket::from_percent(90.0), CompletenessBucket::Excellent);
        assert_eq!(CompletenessBucket::from_percent(89.99), CompletenessBucket::Good);
        assert_eq!(CompletenessBucket::from_percent(75.0), CompletenessBucket::Good);
        assert_eq!(CompletenessBucket::from_percent(50.0), CompletenessBucket::Fair);
        assert_eq!(CompletenessBucket::from_percent(49.9), CompletenessBucket::Poor);
    }

    #[test]
    fn type_drift_ignores_nulls() -> Result<(), GovernanceError> {
        let records = records(json!([
            {"year": 1999, "rating": null},
            {"year": "2001", "rating": 4}
        ]))?;
        let types = field_types(&records);
        let year = types.iter().find(|t| t.field == "year").map(|t| t.drift);
        let rating = types.iter().find(|t| t.field == "rating").map(|t| t.drift);
        assert_eq!(year, Some(true));
        assert_eq!(rating, Some(false));
        Ok(())
    }

    #[test]
    fn uniqueness_counts_duplicates() -> Result<(), GovernanceError> {
        let records =
            records(json!([{"slug": "a"}, {"slug": "a"}, {"slug": "b"}, {"title": "x"}]))?;
        let status = uniqueness(&records);
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].total, 3);
        assert_eq!(status[0].unique, 2);
        assert_eq!(status[0].duplicates, 1);
        assert_eq!(status[0].duplicate_values, vec!["a".to_string()]);
        Ok(())
    }

    #[test]
    fn references_report_broken_sample_and_missing_target() -> Result<(), GovernanceError> {
        let schema = CollectionSchema::sequence("projects").reference("skills", "skills", "slug");
        let projects = CollectionData::from_value(
            "projects",
            json!([
                {"slug": "p1", "skills": ["rust", "go", "zig"]},
                {"slug": "p2", "skills": ["cobol", "rust"]}
            ]),
        )?;
        let skills = CollectionData::from_value("skills", json!([{"slug": "rust"}]))?;
        let validation = validate_collection("projects", Some(&schema), &projects);

        let source = MapSource(HashMap::from([("skills".to_string(), skills)]));
        let metrics = compute_metrics(&MetricsInput {
            name: "projects",
            data: &projects,
            byte_size: 10,
            schema: Some(&schema),
            validation: &validation,
            source: &source,
            broken_sample_limit: 2,
        });
        let health = &metrics.references[0];
        assert_eq!(health.status, ReferenceStatus::Broken);
        assert_eq!(health.checked, 5);
        assert_eq!(health.broken, 3);
        assert_eq!(health.sample.len(), 2);

        let empty = MapSource(HashMap::new());
        let metrics = compute_metrics(&MetricsInput {
            name: "projects",
            data: &projects,
            byte_size: 10,
            schema: Some(&schema),
            validation: &validation,
            source: &empty,
            broken_sample_limit: 2,
        });
        assert_eq!(metrics.references[0].status, ReferenceStatus::MissingTarget);
        assert!(metrics.has_broken_references());
        Ok(())
    }

    #[test]
    fn summary_averages_loaded_collections_and_counts_critical_issues() {
        let healthy = QualityMetrics {
            collection: "skills".to_string(),
            item_count: 2,
            byte_size: 10,
            validation: ValidationSummary {
                valid: true,
                error_count: 0,
                warning_count: 1,
            },
            completeness: 90.0,
            fields: Vec::new(),
            field_types: Vec::new(),
            uniqueness: Vec::new(),
            references: Vec::new(),
            load_error: None,
        };
        let mut duplicated = healthy.clone();
        duplicated.collection = "books".to_string();
        duplicated.completeness = 60.0;
        duplicated.validation.valid = false;
        duplicated.uniqueness.push(UniquenessStatus {
            field: "slug".to_string(),
            total: 2,
            unique: 1,
            duplicates: 1,
            duplicate_values: vec!["a".to_string()],
        });
        let missing =
            QualityMetrics::unavailable("people", &GovernanceError::NotFound("people".to_string()));

        let report = QualityReport::new(
            datetime!(2026-01-01 00:00 UTC),
            vec![healthy, duplicated, missing],
        );
        assert_eq!(report.summary.total_collections, 3);
        assert_eq!(report.summary.valid_collections, 1);
        assert_eq!(report.summary.invalid_collections, 2);
        assert_eq!(report.summary.warned_collections, 2);
        assert!((report.summary.average_completeness - 75.0).abs() < f64::EPSILON);
        assert_eq!(report.summary.critical_issues, 2);
    }
}
