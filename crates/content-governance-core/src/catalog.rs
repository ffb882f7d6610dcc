//! Built-in collections for the content site: schemas at every revision, the
//! migration plans that move between them, and the business-rule checks.

use serde_json::{Map, Value};

use crate::collection::{CollectionData, Record};
use crate::consistency::{
    AllowedValuesCheck, ConsistencyCheck, DateFieldsCheck, ReferencesExistCheck,
    RequiredFieldsCheck,
};
use crate::migration::{MigrationCatalog, MigrationPlan, MigrationStep};
use crate::schema::{CollectionSchema, FieldKind, FieldRule, SchemaRegistry};
use crate::version::SchemaVersion;
use crate::GovernanceError;

pub const BOOK_CATEGORIES: [&str; 6] =
    ["fiction", "non-fiction", "science", "technology", "philosophy", "biography"];
pub const READING_STATUSES: [&str; 3] = ["read", "reading", "want-to-read"];
pub const PROJECT_STATUSES: [&str; 3] = ["active", "completed", "archived"];
pub const SKILL_LEVELS: [&str; 4] = ["beginner", "intermediate", "advanced", "expert"];

const EARLIEST_BOOK_YEAR: i64 = 1000;
const LATEST_BOOK_YEAR: i64 = 2100;

/// Registry of every known collection with its schema revisions.
#[must_use]
pub fn site_registry() -> SchemaRegistry {
    let mut registry = SchemaRegistry::new();

    let books = books_schema();
    registry.register_revision(
        SchemaVersion::new(1, 0, 0),
        books
            .clone()
            .require(&["status"])
            .rule("status", FieldRule::one_of(&READING_STATUSES)),
    );
    registry.register_revision(
        SchemaVersion::new(1, 1, 0),
        books
            .clone()
            .require(&["status"])
            .rule("status", FieldRule::one_of(&READING_STATUSES))
            .without_required("author")
            .without_rules("author")
            .require(&["authors"])
            .rule("authors", FieldRule::ArrayOf { kind: FieldKind::String }),
    );
    registry.register(books);

    let projects = projects_schema();
    registry.register_revision(
        SchemaVersion::new(1, 0, 0),
        projects
            .clone()
            .require(&["featured"])
            .rule("featured", FieldRule::of_type(FieldKind::Boolean)),
    );
    registry.register(projects);

    registry.register(
        CollectionSchema::sequence("people")
            .require(&["slug", "name"])
            .rule("slug", FieldRule::Slug)
            .rule("name", FieldRule::of_type(FieldKind::String))
            .rule("url", FieldRule::UrlOrPath)
            .rule("email", FieldRule::Email)
            .unique("slug"),
    );
    registry.register(
        CollectionSchema::sequence("skills")
            .require(&["slug", "name", "level"])
            .rule("slug", FieldRule::Slug)
            .rule("name", FieldRule::of_type(FieldKind::String))
            .rule("level", FieldRule::one_of(&SKILL_LEVELS))
            .rule("years", FieldRule::NumberRange { min: 0.0, max: 80.0 })
            .unique("slug"),
    );
    registry.register(
        CollectionSchema::singleton("profile")
            .require(&["name", "email"])
            .rule("name", FieldRule::of_type(FieldKind::String))
            .rule("email", FieldRule::Email)
            .rule("website", FieldRule::UrlOrPath)
            .rule("avatar", FieldRule::UrlOrPath),
    );
    registry
}

fn books_schema() -> CollectionSchema {
    CollectionSchema::sequence("books")
        .require(&["slug", "title", "author", "category"])
        .rule("slug", FieldRule::Slug)
        .rule("title", FieldRule::of_type(FieldKind::String))
        .rule("author", FieldRule::of_type(FieldKind::String))
        .rule("category", FieldRule::one_of(&BOOK_CATEGORIES))
        .rule("year", FieldRule::YearRange { min: EARLIEST_BOOK_YEAR, max: LATEST_BOOK_YEAR })
        .rule("rating", FieldRule::NumberRange { min: 0.0, max: 5.0 })
        .rule("cover", FieldRule::UrlOrPath)
        .rule("url", FieldRule::UrlOrPath)
        .rule("finished", FieldRule::Date)
        .rule("recommended_by", FieldRule::ArrayOf { kind: FieldKind::String })
        .unique("slug")
        .reference("recommended_by", "people", "slug")
}

fn projects_schema() -> CollectionSchema {
    CollectionSchema::sequence("projects")
        .require(&["slug", "title", "description"])
        .rule("slug", FieldRule::Slug)
        .rule("title", FieldRule::of_type(FieldKind::String))
        .rule("description", FieldRule::of_type(FieldKind::String))
        .rule("url", FieldRule::UrlOrPath)
        .rule("repo", FieldRule::UrlOrPath)
        .rule("status", FieldRule::one_of(&PROJECT_STATUSES))
        .rule("skills", FieldRule::ArrayOf { kind: FieldKind::String })
        .rule("started", FieldRule::Date)
        .rule("ended", FieldRule::Date)
        .unique("slug")
        .reference("skills", "skills", "slug")
}

/// Migration plans for the built-in collections.
///
/// # Errors
/// Returns [`GovernanceError::Validation`] if a plan registers a version twice.
pub fn site_migrations() -> Result<MigrationCatalog, GovernanceError> {
    let mut catalog = MigrationCatalog::new();
    catalog.insert(
        MigrationPlan::new("books")
            .with_step(MigrationStep::new(
                SchemaVersion::new(1, 0, 0),
                "add reading status",
                |data| add_field(data, "status", &Value::from("read")),
                |data| remove_field(data, "status"),
            ))?
            .with_step(MigrationStep::new(
                SchemaVersion::new(1, 1, 0),
                "split author into authors list",
                |data| {
                    data.try_map_records(|record| {
                        rename_field(record, "author", "authors", author_to_list)
                    })
                },
                |data| {
                    data.try_map_records(|record| {
                        rename_field(record, "authors", "author", list_to_author)
                    })
                },
            ))?,
    );
    catalog.insert(MigrationPlan::new("projects").with_step(MigrationStep::new(
        SchemaVersion::new(1, 0, 0),
        "add featured flag",
        |data| add_field(data, "featured", &Value::Bool(false)),
        |data| remove_field(data, "featured"),
    ))?);
    Ok(catalog)
}

/// Business rules the site relies on beyond per-field schema checks.
#[must_use]
pub fn site_consistency_checks() -> Vec<Box<dyn ConsistencyCheck>> {
    vec![
        Box::new(AllowedValuesCheck {
            name: "book-categories".to_string(),
            collection: "books".to_string(),
            field: "category".to_string(),
            allowed: BOOK_CATEGORIES.iter().map(ToString::to_string).collect(),
        }),
        Box::new(AllowedValuesCheck {
            name: "project-statuses".to_string(),
            collection: "projects".to_string(),
            field: "status".to_string(),
            allowed: PROJECT_STATUSES.iter().map(ToString::to_string).collect(),
        }),
        Box::new(ReferencesExistCheck {
            name: "project-skills".to_string(),
            collection: "projects".to_string(),
            field: "skills".to_string(),
            target: "skills".to_string(),
            target_field: "slug".to_string(),
        }),
        Box::new(DateFieldsCheck {
            name: "date-fields".to_string(),
            fields: vec![
                ("books".to_string(), "finished".to_string()),
                ("projects".to_string(), "started".to_string()),
                ("projects".to_string(), "ended".to_string()),
            ],
        }),
        Box::new(RequiredFieldsCheck {
            name: "profile-contact".to_string(),
            collection: "profile".to_string(),
            fields: vec!["name".to_string(), "email".to_string()],
        }),
    ]
}

/// Marks a record whose `field` existed before the step that would add it.
fn kept_marker(field: &str) -> String {
    format!("_kept_{field}")
}

/// Holds a value that a rename would otherwise overwrite.
fn parked_key(field: &str) -> String {
    format!("_parked_{field}")
}

fn add_field(
    data: CollectionData,
    field: &str,
    default: &Value,
) -> Result<CollectionData, GovernanceError> {
    data.try_map_records(|mut record| {
        if record.contains_key(field) {
            record.insert(kept_marker(field), Value::Bool(true));
        } else {
            record.insert(field.to_string(), default.clone());
        }
        Ok(record)
    })
}

/// Undo [`add_field`]: values the record held before the upgrade stay.
fn remove_field(data: CollectionData, field: &str) -> Result<CollectionData, GovernanceError> {
    data.try_map_records(|mut record| {
        if record.shift_remove(&kept_marker(field)).is_none() {
            record.shift_remove(field);
        }
        Ok(record)
    })
}

/// Rename `from` to `to` in place, keeping the field's position in the record.
///
/// A value already stored under `to` moves to its parked key, and a value
/// parked under `from` by the opposite rename is put back, so renaming there
/// and back again returns the original record.
fn rename_field(
    record: Record,
    from: &str,
    to: &str,
    convert: fn(Value) -> Result<Option<Value>, GovernanceError>,
) -> Result<Record, GovernanceError> {
    if !record.contains_key(from) {
        return Ok(record);
    }
    let park = parked_key(to);
    let unpark = parked_key(from);
    let mut renamed = Map::with_capacity(record.len());
    for (key, value) in record {
        if key == from {
            if let Some(value) = convert(value)? {
                renamed.insert(to.to_string(), value);
            }
        } else if key == to {
            renamed.insert(park.clone(), value);
        } else if key == unpark {
            renamed.insert(from.to_string(), value);
        } else {
            renamed.insert(key, value);
        }
    }
    Ok(renamed)
}

fn author_to_list(value: Value) -> Result<Option<Value>, GovernanceError> {
    match value {
        Value::Array(_) => Ok(Some(value)),
        Value::Null => Ok(None),
        Value::String(author) => Ok(Some(Value::Array(vec![Value::String(author)]))),
        other => Err(GovernanceError::Validation(format!(
            "`author` must be a string, found {other}"
        ))),
    }
}

fn list_to_author(value: Value) -> Result<Option<Value>, GovernanceError> {
    let Value::Array(items) = value else {
        return Ok(Some(value));
    };
    let names = items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            other => Err(GovernanceError::Validation(format!(
                "`authors` entries must be strings, found {other}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((!names.is_empty()).then(|| Value::String(names.join(", "))))
}
