use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::GovernanceError;

/// One named-field data unit. Fields are untyped until a schema is applied.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CollectionShape {
    Sequence,
    Singleton,
}

impl CollectionShape {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequence => "sequence",
            Self::Singleton => "singleton",
        }
    }
}

/// The records held by one collection.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionData {
    Sequence(Vec<Record>),
    Singleton(Record),
}

impl CollectionData {
    /// Interpret a deserialized document as collection content.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Parse`] when the document is neither a list of
    /// objects nor a single object.
    pub fn from_value(collection: &str, value: Value) -> Result<Self, GovernanceError> {
        match value {
            Value::Array(items) => {
                let mut records = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    match item {
                        Value::Object(record) => records.push(record),
                        other => {
                            return Err(GovernanceError::parse(
                                collection,
                                format!(
                                    "item {index} is {} instead of a record",
                                    ValueKind::of(&other).as_str()
                                ),
                            ));
                        }
                    }
                }
                Ok(Self::Sequence(records))
            }
            Value::Object(record) => Ok(Self::Singleton(record)),
            other => Err(GovernanceError::parse(
                collection,
                format!(
                    "expected a list of records or a single record, found {}",
                    ValueKind::of(&other).as_str()
                ),
            )),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Sequence(records) => {
                Value::Array(records.iter().cloned().map(Value::Object).collect())
            }
            Self::Singleton(record) => Value::Object(record.clone()),
        }
    }

    #[must_use]
    pub fn shape(&self) -> CollectionShape {
        match self {
            Self::Sequence(_) => CollectionShape::Sequence,
            Self::Singleton(_) => CollectionShape::Singleton,
        }
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        match self {
            Self::Sequence(records) => records,
            Self::Singleton(record) => std::slice::from_ref(record),
        }
    }

    pub fn records_mut(&mut self) -> &mut [Record] {
        match self {
            Self::Sequence(records) => records,
            Self::Singleton(record) => std::slice::from_mut(record),
        }
    }

    /// Apply `f` to every record, keeping the collection's shape.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn try_map_records<F>(self, mut f: F) -> Result<Self, GovernanceError>
    where
        F: FnMut(Record) -> Result<Record, GovernanceError>,
    {
        match self {
            Self::Sequence(records) => {
                records.into_iter().map(&mut f).collect::<Result<Vec<_>, _>>().map(Self::Sequence)
            }
            Self::Singleton(record) => f(record).map(Self::Singleton),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Read access to collections by name, used by cross-collection checks.
pub trait CollectionSource {
    /// Load the current content of `name`.
    ///
    /// # Errors
    /// Returns [`GovernanceError::NotFound`] for unknown collections and
    /// [`GovernanceError::Parse`] for malformed content.
    fn load_collection(&self, name: &str) -> Result<CollectionData, GovernanceError>;
}

/// Primitive kind of a stored value, used for type inference and drift detection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absent, null, and empty-string values all count as missing.
#[must_use]
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

/// Render a scalar for messages; strings lose their JSON quoting.
#[must_use]
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
