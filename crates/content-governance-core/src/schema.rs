use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::collection::{display_value, CollectionShape, ValueKind};
use crate::version::SchemaVersion;

const SLUG_PATTERN: &str = r"^[a-z0-9]+(?:-[a-z0-9]+)*$";
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::String, Value::String(_))
                | (Self::Number, Value::Number(_))
                | (Self::Boolean, Value::Bool(_))
                | (Self::Array, Value::Array(_))
                | (Self::Object, Value::Object(_))
        )
    }
}

/// One declarative check applied to a single field value.
///
/// Rules see only the value and the field name, never sibling fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum FieldRule {
    Type { kind: FieldKind },
    ArrayOf { kind: FieldKind },
    UrlOrPath,
    Email,
    Slug,
    YearRange { min: i64, max: i64 },
    NumberRange { min: f64, max: f64 },
    OneOf { allowed: Vec<String> },
    Date,
}

impl FieldRule {
    #[must_use]
    pub fn of_type(kind: FieldKind) -> Self {
        Self::Type { kind }
    }

    #[must_use]
    pub fn one_of(allowed: &[&str]) -> Self {
        Self::OneOf {
            allowed: allowed.iter().map(|value| (*value).to_string()).collect(),
        }
    }

    /// Run the rule, returning a description of the violation if there is one.
    #[must_use]
    pub fn check(&self, field: &str, value: &Value) -> Option<String> {
        match self {
            Self::Type { kind } => (!kind.matches(value)).then(|| {
                format!(
                    "field `{field}` must be a {} (found {})",
                    kind.as_str(),
                    ValueKind::of(value)
                )
            }),
            Self::ArrayOf { kind } => match value {
                Value::Array(items) => items
                    .iter()
                    .position(|item| !kind.matches(item))
                    .map(|index| {
                        format!(
                            "field `{field}` entry {index} must be a {} (found {})",
                            kind.as_str(),
                            ValueKind::of(&items[index])
                        )
                    }),
                other => Some(format!(
                    "field `{field}` must be an array (found {})",
                    ValueKind::of(other)
                )),
            },
            Self::UrlOrPath => with_text(field, value, |text| {
                (!is_url_or_path(text)).then(|| {
                    format!("field `{field}` must be an http(s) URL or a relative path: {text}")
                })
            }),
            Self::Email => with_text(field, value, |text| {
                (!pattern_matches(email_pattern(), text))
                    .then(|| format!("field `{field}` must be an email address: {text}"))
            }),
            Self::Slug => with_text(field, value, |text| {
                (!is_slug(text)).then(|| {
                    format!("field `{field}` must be a lowercase hyphenated slug: {text}")
                })
            }),
            Self::YearRange { min, max } => match value.as_i64() {
                Some(year) if (*min..=*max).contains(&year) => None,
                Some(year) => Some(format!("field `{field}` year {year} is outside {min}..={max}")),
                None => Some(format!(
                    "field `{field}` must be a whole-number year (found {})",
                    display_value(value)
                )),
            },
            Self::NumberRange { min, max } => match value.as_f64() {
                Some(number) if number >= *min && number <= *max => None,
                Some(number) => {
                    Some(format!("field `{field}` value {number} is outside {min}..={max}"))
                }
                None => Some(format!(
                    "field `{field}` must be a number (found {})",
                    ValueKind::of(value)
                )),
            },
            Self::OneOf { allowed } => with_text(field, value, |text| {
                (!allowed.iter().any(|candidate| candidate == text)).then(|| {
                    format!("field `{field}` value `{text}` is not one of: {}", allowed.join(", "))
                })
            }),
            Self::Date => with_text(field, value, |text| {
                parse_calendar_date(text)
                    .is_none()
                    .then(|| format!("field `{field}` is not a valid calendar date: {text}"))
            }),
        }
    }
}

fn with_text<F>(field: &str, value: &Value, check: F) -> Option<String>
where
    F: FnOnce(&str) -> Option<String>,
{
    match value {
        Value::String(text) => check(text),
        other => Some(format!("field `{field}` must be a string (found {})", ValueKind::of(other))),
    }
}

fn slug_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(SLUG_PATTERN).ok()).as_ref()
}

fn email_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(EMAIL_PATTERN).ok()).as_ref()
}

fn pattern_matches(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.is_some_and(|re| re.is_match(text))
}

#[must_use]
pub fn is_slug(text: &str) -> bool {
    pattern_matches(slug_pattern(), text)
}

/// Absolute `http`/`https` URLs with a host, or scheme-less paths such as
/// `cover.jpg`, `images/a.png` and `/images/a.png`. Protocol-relative `//host`
/// references are rejected.
#[must_use]
pub fn is_url_or_path(text: &str) -> bool {
    if text.is_empty() || text.starts_with("//") || text.chars().any(char::is_whitespace) {
        return false;
    }
    match url::Url::parse(text) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https") && parsed.host_str().is_some()
        }
        Err(url::ParseError::RelativeUrlWithoutBase) => true,
        Err(_) => false,
    }
}

/// Parse `YYYY-MM-DD` or an RFC 3339 timestamp into a calendar date.
#[must_use]
pub fn parse_calendar_date(text: &str) -> Option<Date> {
    let trimmed = text.trim();
    Date::parse(trimmed, format_description!("[year]-[month]-[day]"))
        .ok()
        .or_else(|| OffsetDateTime::parse(trimmed, &Rfc3339).ok().map(OffsetDateTime::date))
}

/// Declares that values of `field` must name an existing record in `target`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReferenceRule {
    pub field: String,
    pub target: String,
    #[serde(default = "default_target_field")]
    pub target_field: String,
}

fn default_target_field() -> String {
    "slug".to_string()
}

/// Declarative schema for one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    pub shape: CollectionShape,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub field_validators: BTreeMap<String, Vec<FieldRule>>,
    #[serde(default)]
    pub unique_field: Option<String>,
    #[serde(default)]
    pub references: Vec<ReferenceRule>,
}

impl CollectionSchema {
    #[must_use]
    pub fn sequence(name: &str) -> Self {
        Self::new(name, CollectionShape::Sequence)
    }

    #[must_use]
    pub fn singleton(name: &str) -> Self {
        Self::new(name, CollectionShape::Singleton)
    }

    fn new(name: &str, shape: CollectionShape) -> Self {
        Self {
            name: name.to_string(),
            shape,
            required_fields: Vec::new(),
            field_validators: BTreeMap::new(),
            unique_field: None,
            references: Vec::new(),
        }
    }

    #[must_use]
    pub fn require(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if !self.required_fields.iter().any(|existing| existing == field) {
                self.required_fields.push((*field).to_string());
            }
        }
        self
    }

    #[must_use]
    pub fn without_required(mut self, field: &str) -> Self {
        self.required_fields.retain(|existing| existing != field);
        self
    }

    #[must_use]
    pub fn rule(mut self, field: &str, rule: FieldRule) -> Self {
        self.field_validators.entry(field.to_string()).or_default().push(rule);
        self
    }

    #[must_use]
    pub fn without_rules(mut self, field: &str) -> Self {
        self.field_validators.remove(field);
        self
    }

    #[must_use]
    pub fn unique(mut self, field: &str) -> Self {
        self.unique_field = Some(field.to_string());
        self
    }

    #[must_use]
    pub fn reference(mut self, field: &str, target: &str, target_field: &str) -> Self {
        self.references.push(ReferenceRule {
            field: field.to_string(),
            target: target.to_string(),
            target_field: target_field.to_string(),
        });
        self
    }

    /// Field names the schema mentions, in a stable order.
    #[must_use]
    pub fn declared_fields(&self) -> Vec<String> {
        let mut fields = BTreeSet::new();
        fields.extend(self.required_fields.iter().cloned());
        fields.extend(self.field_validators.keys().cloned());
        fields.extend(self.unique_field.iter().cloned());
        fields.extend(self.references.iter().map(|reference| reference.field.clone()));
        fields.into_iter().collect()
    }
}

/// Single source of truth for known collections, their shapes, and the schema
/// revision that applies at each version.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entries: BTreeMap<String, BTreeMap<SchemaVersion, CollectionSchema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the base schema (version `0.0.0`) of a collection.
    pub fn register(&mut self, schema: CollectionSchema) {
        self.register_revision(SchemaVersion::INITIAL, schema);
    }

    /// Register the schema that applies from `version` onwards, replacing any
    /// revision already registered at exactly that version.
    pub fn register_revision(&mut self, version: SchemaVersion, schema: CollectionSchema) {
        self.entries.entry(schema.name.clone()).or_default().insert(version, schema);
    }

    /// Drop every revision of the collection and install `schema` as its only one.
    pub fn replace(&mut self, schema: CollectionSchema) {
        self.entries
            .insert(schema.name.clone(), BTreeMap::from([(SchemaVersion::INITIAL, schema)]));
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Schema of the newest registered revision.
    #[must_use]
    pub fn schema(&self, name: &str) -> Option<&CollectionSchema> {
        self.entries.get(name).and_then(|revisions| revisions.values().next_back())
    }

    /// Schema governing a collection that currently sits at `version`.
    #[must_use]
    pub fn schema_at(&self, name: &str, version: SchemaVersion) -> Option<&CollectionSchema> {
        let revisions = self.entries.get(name)?;
        revisions
            .range(..=version)
            .next_back()
            .or_else(|| revisions.values().next().map(|schema| (&SchemaVersion::INITIAL, schema)))
            .map(|(_, schema)| schema)
    }

    #[must_use]
    pub fn shape(&self, name: &str) -> Option<CollectionShape> {
        self.schema(name).map(|schema| schema.shape)
    }

    #[must_use]
    pub fn revisions(&self, name: &str) -> Vec<SchemaVersion> {
        self.entries
            .get(name)
            .map(|revisions| revisions.keys().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_rule_reports_found_kind() {
        let rule = FieldRule::of_type(FieldKind::String);
        assert_eq!(rule.check("title", &json!("Dune")), None);
        let message = rule.check("title", &json!(42)).unwrap_or_default();
        assert!(message.contains("`title`"));
        assert!(message.contains("number"));
    }

    #[test]
    fn slug_rule_accepts_lowercase_hyphenated_only() {
        let rule = FieldRule::Slug;
        assert_eq!(rule.check("slug", &json!("the-left-hand-2")), None);
        for bad in ["The-Left", "double--hyphen", "-leading", "trailing-", "with space", ""] {
            assert!(rule.check("slug", &json!(bad)).is_some(), "{bad} should fail");
        }
    }

    #[test]
    fn url_or_path_accepts_http_and_relative_paths() {
        assert!(is_url_or_path("https://example.com/cover.jpg"));
        assert!(is_url_or_path("http://localhost:8080"));
        assert!(is_url_or_path("/images/cover.jpg"));
        assert!(is_url_or_path("./cover.jpg"));
        assert!(is_url_or_path("../cover.jpg"));
        assert!(is_url_or_path("cover.jpg"));
        assert!(is_url_or_path("images/books/dune.jpg"));
        assert!(!is_url_or_path("ftp://example.com"));
        assert!(!is_url_or_path("mailto:ada@example.com"));
        assert!(!is_url_or_path("//cdn.example.com/x.png"));
        assert!(!is_url_or_path("/images/my cover.jpg"));
        assert!(!is_url_or_path("has space.jpg"));
        assert!(!is_url_or_path(""));
    }

    #[test]
    fn email_year_and_allowed_set_rules() {
        assert_eq!(FieldRule::Email.check("email", &json!("ada@example.com")), None);
        assert!(FieldRule::Email.check("email", &json!("ada.example.com")).is_some());

        let years = FieldRule::YearRange { min: 1900, max: 2030 };
        assert_eq!(years.check("year", &json!(1999)), None);
        assert!(years.check("year", &json!(1899)).is_some());
        assert!(years.check("year", &json!("1999")).is_some());
        assert!(years.check("year", &json!(1999.5)).is_some());

        let categories = FieldRule::one_of(&["fiction", "science"]);
        assert_eq!(categories.check("category", &json!("science")), None);
        let message = categories.check("category", &json!("poetry")).unwrap_or_default();
        assert!(message.contains("poetry"));
    }

    #[test]
    fn array_of_rule_points_at_offending_entry() {
        let rule = FieldRule::ArrayOf { kind: FieldKind::String };
        assert_eq!(rule.check("skills", &json!(["rust", "sql"])), None);
        let message = rule.check("skills", &json!(["rust", 3])).unwrap_or_default();
        assert!(message.contains("entry 1"));
        assert!(rule.check("skills", &json!("rust")).is_some());
    }

    #[test]
    fn calendar_dates_parse_strictly() {
        assert!(parse_calendar_date("2024-02-29").is_some());
        assert!(parse_calendar_date("2023-02-29").is_none());
        assert!(parse_calendar_date("2024-13-01").is_none());
        assert!(parse_calendar_date("2024-05-01T10:00:00Z").is_some());
        assert!(parse_calendar_date("yesterday").is_none());
    }

    #[test]
    fn schema_at_picks_newest_revision_not_after_version() {
        let mut registry = SchemaRegistry::new();
        registry.register(CollectionSchema::sequence("books").require(&["slug"]));
        registry.register_revision(
            SchemaVersion::new(1, 0, 0),
            CollectionSchema::sequence("books").require(&["slug", "status"]),
        );

        let required_at = |version| {
            registry.schema_at("books", version).map(|schema| schema.required_fields.len())
        };
        let base = required_at(SchemaVersion::INITIAL);
        let mid = required_at(SchemaVersion::new(1, 0, 5));
        assert_eq!(base, Some(1));
        assert_eq!(mid, Some(2));
        assert_eq!(registry.schema("books").map(|s| s.required_fields.len()), Some(2));
        assert!(registry.schema_at("people", SchemaVersion::INITIAL).is_none());
    }

    #[test]
    fn replace_discards_later_revisions() {
        let mut registry = SchemaRegistry::new();
        registry.register(CollectionSchema::sequence("books").require(&["slug"]));
        registry.register_revision(
            SchemaVersion::new(1, 0, 0),
            CollectionSchema::sequence("books").require(&["slug", "status"]),
        );
        registry.replace(CollectionSchema::sequence("books").require(&["isbn"]));
        assert_eq!(registry.revisions("books"), vec![SchemaVersion::INITIAL]);
        let required = registry
            .schema_at("books", SchemaVersion::new(1, 0, 0))
            .map(|schema| schema.required_fields.clone());
        assert_eq!(required, Some(vec!["isbn".to_string()]));
    }

    #[test]
    fn declared_fields_merge_required_validated_and_references() {
        let schema = CollectionSchema::sequence("projects")
            .require(&["slug", "title"])
            .rule("url", FieldRule::UrlOrPath)
            .reference("skills", "skills", "slug");
        assert_eq!(schema.declared_fields(), vec!["skills", "slug", "title", "url"]);
    }
}
