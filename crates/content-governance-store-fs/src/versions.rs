use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use content_governance_core::{GovernanceError, SchemaVersion};

use crate::{check_collection_name, write_atomic};

/// One `<name>.version` file per collection, kept apart from the data.
#[derive(Debug, Clone)]
pub struct VersionStore {
    dir: PathBuf,
}

impl VersionStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, GovernanceError> {
        check_collection_name(name)?;
        Ok(self.dir.join(format!("{name}.version")))
    }

    /// Current version of `name`; a collection without a marker is at `0.0.0`.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Io`] when the marker exists but cannot be read
    /// and [`GovernanceError::Validation`] when it does not hold a version.
    pub fn current(&self, name: &str) -> Result<SchemaVersion, GovernanceError> {
        let path = self.path_for(name)?;
        match fs::read_to_string(&path) {
            Ok(contents) => SchemaVersion::parse(contents.trim()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(SchemaVersion::INITIAL),
            Err(err) => {
                Err(GovernanceError::io(format!("failed to read {}", path.display()), &err))
            }
        }
    }

    /// # Errors
    /// Returns [`GovernanceError::Io`] when the marker cannot be written.
    pub fn set(&self, name: &str, version: SchemaVersion) -> Result<(), GovernanceError> {
        let path = self.path_for(name)?;
        write_atomic(&path, format!("{version}\n").as_bytes())
            .map_err(|err| {
                GovernanceError::io(format!("failed to write {}", path.display()), &err)
            })?;
        tracing::info!(collection = name, %version, "version marker updated");
        Ok(())
    }
}
