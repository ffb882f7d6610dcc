use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use content_governance_core::quality::{field_completeness, FieldCompleteness};
use content_governance_core::{CollectionData, CollectionSource, GovernanceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{check_collection_name, write_atomic};

pub const COLLECTION_EXTENSION: &str = "yaml";

/// A collection as read from disk, including the comment preamble that must
/// survive the next write untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCollection {
    pub name: String,
    pub data: CollectionData,
    pub header: String,
    pub byte_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStats {
    pub collection: String,
    pub record_count: usize,
    pub byte_size: u64,
    pub fields: Vec<FieldCompleteness>,
}

/// Collections stored as `<data_dir>/<name>.yaml`.
#[derive(Debug, Clone)]
pub struct FsStore {
    data_dir: PathBuf,
}

impl FsStore {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file backing `name`.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Validation`] for malformed names.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, GovernanceError> {
        check_collection_name(name)?;
        Ok(self.data_dir.join(format!("{name}.{COLLECTION_EXTENSION}")))
    }

    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_ok_and(|path| path.is_file())
    }

    /// Raw bytes of a collection file, for snapshots.
    ///
    /// # Errors
    /// Returns [`GovernanceError::NotFound`] when the file is absent and
    /// [`GovernanceError::Io`] when it cannot be read.
    pub fn read_raw(&self, name: &str) -> Result<Vec<u8>, GovernanceError> {
        let path = self.path_for(name)?;
        fs::read(&path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => GovernanceError::NotFound(name.to_string()),
            _ => GovernanceError::io(format!("failed to read {}", path.display()), &err),
        })
    }

    /// Replace a collection file with exact bytes, as when restoring a snapshot.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Io`] when the write fails.
    pub fn write_raw(&self, name: &str, contents: &[u8]) -> Result<(), GovernanceError> {
        let path = self.path_for(name)?;
        write_atomic(&path, contents)
            .map_err(|err| write_error(&path, &err))?;
        tracing::info!(collection = name, bytes = contents.len(), "collection replaced");
        Ok(())
    }

    /// Load and parse a collection.
    ///
    /// # Errors
    /// Returns [`GovernanceError::NotFound`] for absent collections and
    /// [`GovernanceError::Parse`] when the content is not a record list or record.
    pub fn load(&self, name: &str) -> Result<LoadedCollection, GovernanceError> {
        let raw = self.read_raw(name)?;
        let text = String::from_utf8(raw)
            .map_err(|err| GovernanceError::parse(name, format!("content is not UTF-8: {err}")))?;
        let (header, body) = split_header(&text);
        let value: Value = serde_yaml::from_str(body)
            .map_err(|err| GovernanceError::parse(name, err.to_string()))?;
        let data = CollectionData::from_value(name, value)?;
        tracing::debug!(collection = name, records = data.len(), "collection loaded");
        Ok(LoadedCollection {
            name: name.to_string(),
            data,
            header: header.to_string(),
            byte_size: text.len() as u64,
        })
    }

    /// Serialize `data` after `header`, replacing the file in one rename.
    ///
    /// Callers snapshot first when they need the previous content back.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Io`] when serialization or the write fails.
    pub fn save(
        &self,
        name: &str,
        data: &CollectionData,
        header: &str,
    ) -> Result<(), GovernanceError> {
        let body = serde_yaml::to_string(&data.to_value())
            .map_err(|err| GovernanceError::Io(format!("failed to serialize `{name}`: {err}")))?;
        let mut contents = String::with_capacity(header.len() + body.len() + 1);
        contents.push_str(header);
        if !header.is_empty() && !header.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&body);

        let path = self.path_for(name)?;
        write_atomic(&path, contents.as_bytes())
            .map_err(|err| write_error(&path, &err))?;
        tracing::info!(collection = name, records = data.len(), "collection saved");
        Ok(())
    }

    /// Record count, size and per-field completeness without validating.
    ///
    /// # Errors
    /// Propagates load failures.
    pub fn stats(&self, name: &str) -> Result<CollectionStats, GovernanceError> {
        let loaded = self.load(name)?;
        Ok(CollectionStats {
            collection: loaded.name,
            record_count: loaded.data.len(),
            byte_size: loaded.byte_size,
            fields: field_completeness(loaded.data.records(), &[]),
        })
    }

    /// Names of every collection file in the data directory, sorted.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Io`] when the directory cannot be listed.
    pub fn list_collections(&self) -> Result<Vec<String>, GovernanceError> {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(GovernanceError::io(
                    format!("failed to list {}", self.data_dir.display()),
                    &err,
                ))
            }
        };
        let mut names = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| {
                    GovernanceError::io(format!("failed to list {}", self.data_dir.display()), &err)
                })?
                .path();
            let extension = path.extension().and_then(|ext| ext.to_str());
            if !path.is_file() || extension != Some(COLLECTION_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if check_collection_name(stem).is_ok() {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

impl CollectionSource for FsStore {
    fn load_collection(&self, name: &str) -> Result<CollectionData, GovernanceError> {
        self.load(name).map(|loaded| loaded.data)
    }
}

fn write_error(path: &Path, err: &std::io::Error) -> GovernanceError {
    GovernanceError::io(format!("failed to write {}", path.display()), err)
}

/// Split leading comment and blank lines from the data body.
fn split_header(text: &str) -> (&str, &str) {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            offset += line.len();
        } else {
            break;
        }
    }
    text.split_at(offset)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    const BOOKS: &str = concat!(
        "# Books I have read.\n",
        "# Fields: slug, title, author.\n",
        "\n",
        "- slug: dune\n",
        "  title: Dune\n",
        "  author: Frank Herbert\n",
        "  year: 1965\n",
        "  rating: 4.5\n",
        "  finished: 2021-03-04\n",
        "- slug: cosmos\n",
        "  title: Cosmos\n",
        "  author: Carl Sagan\n",
    );

    fn store_with(files: &[(&str, &str)]) -> Result<(TempDir, FsStore)> {
        let dir = TempDir::new()?;
        for (name, contents) in files {
            fs::write(dir.path().join(format!("{name}.yaml")), contents)?;
        }
        let store = FsStore::new(dir.path());
        Ok((dir, store))
    }

    #[test]
    fn load_separates_header_from_records() -> Result<()> {
        let (_dir, store) = store_with(&[("books", BOOKS)])?;
        let loaded = store.load("books")?;
        assert_eq!(loaded.header, "# Books I have read.\n# Fields: slug, title, author.\n\n");
        assert_eq!(loaded.data.len(), 2);
        assert_eq!(loaded.data.records()[0].get("finished"), Some(&json!("2021-03-04")));
        assert_eq!(loaded.byte_size, BOOKS.len() as u64);
        Ok(())
    }

    #[test]
    fn save_of_load_keeps_header_bytes_and_records() -> Result<()> {
        let (dir, store) = store_with(&[("books", BOOKS)])?;
        let loaded = store.load("books")?;
        store.save("books", &loaded.data, &loaded.header)?;

        let written = fs::read_to_string(dir.path().join("books.yaml"))?;
        assert!(written.starts_with(&loaded.header));
        let reloaded = store.load("books")?;
        assert_eq!(reloaded.header, loaded.header);
        assert_eq!(reloaded.data, loaded.data);
        Ok(())
    }

    #[test]
    fn singleton_round_trips() -> Result<()> {
        let (_dir, store) = store_with(&[("profile", "name: Ada\nemail: ada@example.com\n")])?;
        let loaded = store.load("profile")?;
        assert!(matches!(loaded.data, CollectionData::Singleton(_)));
        assert_eq!(loaded.header, "");
        store.save("profile", &loaded.data, &loaded.header)?;
        assert_eq!(store.load("profile")?.data, loaded.data);
        Ok(())
    }

    #[test]
    fn missing_and_malformed_collections_are_typed() -> Result<()> {
        let (_dir, store) = store_with(&[
            ("broken", "- slug: a\n  title: [unterminated\n"),
            ("scalar", "just text\n"),
        ])?;
        assert!(matches!(store.load("books"), Err(GovernanceError::NotFound(_))));
        assert!(matches!(store.load("broken"), Err(GovernanceError::Parse { .. })));
        assert!(matches!(store.load("scalar"), Err(GovernanceError::Parse { .. })));
        assert!(matches!(store.load("../etc"), Err(GovernanceError::Validation(_))));
        Ok(())
    }

    #[test]
    fn list_and_stats() -> Result<()> {
        let (dir, store) = store_with(&[("books", BOOKS), ("skills", "[]\n")])?;
        fs::write(dir.path().join("notes.txt"), "ignored")?;
        assert_eq!(store.list_collections()?, vec!["books", "skills"]);

        let stats = store.stats("books")?;
        assert_eq!(stats.record_count, 2);
        let year =
            stats.fields.iter().find(|field| field.field == "year").map(|field| field.percent);
        assert_eq!(year, Some(50.0));
        Ok(())
    }

    #[test]
    fn collection_names_are_restricted() {
        for name in ["books", "reading_list", "top-10"] {
            assert!(check_collection_name(name).is_ok(), "{name}");
        }
        for name in ["", "Books", "a/b", "..", "a--b", "-a"] {
            assert!(check_collection_name(name).is_err(), "{name}");
        }
    }
}
