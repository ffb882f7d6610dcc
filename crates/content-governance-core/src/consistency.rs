use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::collection::{display_value, is_missing, CollectionSource};
use crate::quality::reference_values;
use crate::schema::parse_calendar_date;
use crate::validate::key_value;
use crate::GovernanceError;

/// Offending entries listed in a failing check's details.
const DETAIL_SAMPLE_LIMIT: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub checks: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
}

impl ConsistencyReport {
    #[must_use]
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let passed = checks.iter().filter(|check| check.passed).count();
        let failed = checks.len() - passed;
        Self {
            checks,
            passed,
            failed,
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// A named cross-collection business rule.
pub trait ConsistencyCheck {
    fn name(&self) -> &str;

    /// Evaluate the rule.
    ///
    /// # Errors
    /// Returns an error when the data the rule needs cannot be loaded; the
    /// runner reports that as a failed check.
    fn evaluate(&self, source: &dyn CollectionSource) -> Result<CheckResult, GovernanceError>;
}

/// Run every check; a check that cannot load its data fails instead of aborting the run.
#[must_use]
pub fn run_checks(
    checks: &[Box<dyn ConsistencyCheck>],
    source: &dyn CollectionSource,
) -> ConsistencyReport {
    let results = checks
        .iter()
        .map(|check| {
            check.evaluate(source).unwrap_or_else(|err| CheckResult {
                name: check.name().to_string(),
                passed: false,
                details: format!("could not load data: {err}"),
            })
        })
        .collect();
    ConsistencyReport::from_checks(results)
}

fn outcome(name: &str, problems: &[String], passed_details: String, noun: &str) -> CheckResult {
    if problems.is_empty() {
        return CheckResult {
            name: name.to_string(),
            passed: true,
            details: passed_details,
        };
    }
    let mut details = format!(
        "{} {noun}: {}",
        problems.len(),
        problems.iter().take(DETAIL_SAMPLE_LIMIT).cloned().collect::<Vec<_>>().join("; ")
    );
    if problems.len() > DETAIL_SAMPLE_LIMIT {
        details.push_str(&format!("; and {} more", problems.len() - DETAIL_SAMPLE_LIMIT));
    }
    CheckResult {
        name: name.to_string(),
        passed: false,
        details,
    }
}

/// Every present value of `collection.field` is in `allowed`.
#[derive(Debug, Clone)]
pub struct AllowedValuesCheck {
    pub name: String,
    pub collection: String,
    pub field: String,
    pub allowed: Vec<String>,
}

impl ConsistencyCheck for AllowedValuesCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, source: &dyn CollectionSource) -> Result<CheckResult, GovernanceError> {
        let data = source.load_collection(&self.collection)?;
        let problems = data
            .records()
            .iter()
            .enumerate()
            .filter_map(|(item, record)| {
                let value = record.get(&self.field).filter(|value| !is_missing(Some(value)))?;
                let text = display_value(value);
                (!self.allowed.contains(&text)).then(|| format!("item {item} has `{text}`"))
            })
            .collect::<Vec<_>>();
        Ok(outcome(
            &self.name,
            &problems,
            format!("all {} {} use an allowed {}", data.len(), self.collection, self.field),
            &format!("{} outside the allowed set", self.field),
        ))
    }
}

/// Every identifier listed in `collection.field` exists as `target.target_field`.
#[derive(Debug, Clone)]
pub struct ReferencesExistCheck {
    pub name: String,
    pub collection: String,
    pub field: String,
    pub target: String,
    pub target_field: String,
}

impl ConsistencyCheck for ReferencesExistCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, source: &dyn CollectionSource) -> Result<CheckResult, GovernanceError> {
        let data = source.load_collection(&self.collection)?;
        let target = source.load_collection(&self.target)?;
        let known = target
            .records()
            .iter()
            .filter_map(|record| key_value(record.get(&self.target_field)))
            .collect::<BTreeSet<_>>();

        let mut checked = 0;
        let mut problems = Vec::new();
        for (item, record) in data.records().iter().enumerate() {
            for value in reference_values(record.get(&self.field)) {
                checked += 1;
                if !known.contains(&value) {
                    problems.push(format!("item {item} references unknown `{value}`"));
                }
            }
        }
        Ok(outcome(
            &self.name,
            &problems,
            format!("all {checked} {} references resolve in {}", self.field, self.target),
            &format!("unresolved {} reference(s)", self.field),
        ))
    }
}

/// Every present date field parses to a real calendar date.
#[derive(Debug, Clone)]
pub struct DateFieldsCheck {
    pub name: String,
    /// `(collection, field)` pairs.
    pub fields: Vec<(String, String)>,
}

impl ConsistencyCheck for DateFieldsCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, source: &dyn CollectionSource) -> Result<CheckResult, GovernanceError> {
        let mut checked = 0;
        let mut problems = Vec::new();
        for (collection, field) in &self.fields {
            let data = source.load_collection(collection)?;
            for (item, record) in data.records().iter().enumerate() {
                let Some(value) = record.get(field).filter(|value| !is_missing(Some(value))) else {
                    continue;
                };
                checked += 1;
                let text = display_value(value);
                if !value.is_string() || parse_calendar_date(&text).is_none() {
                    problems.push(format!("{collection} item {item} {field} `{text}`"));
                }
            }
        }
        Ok(outcome(
            &self.name,
            &problems,
            format!("all {checked} date values parse"),
            "unparseable date(s)",
        ))
    }
}

/// A singleton collection carries every listed field.
#[derive(Debug, Clone)]
pub struct RequiredFieldsCheck {
    pub name: String,
    pub collection: String,
    pub fields: Vec<String>,
}

impl ConsistencyCheck for RequiredFieldsCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate(&self, source: &dyn CollectionSource) -> Result<CheckResult, GovernanceError> {
        let data = source.load_collection(&self.collection)?;
        let mut problems = Vec::new();
        if data.is_empty() {
            problems.push(format!("`{}` has no record", self.collection));
        }
        for (item, record) in data.records().iter().enumerate() {
            for field in &self.fields {
                if is_missing(record.get(field)) {
                    problems.push(format!("item {item} lacks `{field}`"));
                }
            }
        }
        Ok(outcome(
            &self.name,
            &problems,
            format!("{} has {}", self.collection, self.fields.join(", ")),
            "missing field(s)",
        ))
    }
}
