use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};

use serde::{Deserialize, Serialize};

use crate::collection::CollectionData;
use crate::version::SchemaVersion;
use crate::GovernanceError;

type Transform =
    Box<dyn Fn(CollectionData) -> Result<CollectionData, GovernanceError> + Send + Sync>;

/// One registered version transition with its forward and inverse transforms.
pub struct MigrationStep {
    pub version: SchemaVersion,
    pub description: String,
    forward: Transform,
    inverse: Transform,
}

impl MigrationStep {
    pub fn new<F, I>(version: SchemaVersion, description: &str, forward: F, inverse: I) -> Self
    where
        F: Fn(CollectionData) -> Result<CollectionData, GovernanceError> + Send + Sync + 'static,
        I: Fn(CollectionData) -> Result<CollectionData, GovernanceError> + Send + Sync + 'static,
    {
        Self {
            version,
            description: description.to_string(),
            forward: Box::new(forward),
            inverse: Box::new(inverse),
        }
    }

    /// # Errors
    /// Returns whatever the forward transform reports.
    pub fn forward(&self, data: CollectionData) -> Result<CollectionData, GovernanceError> {
        (self.forward)(data)
    }

    /// # Errors
    /// Returns whatever the inverse transform reports.
    pub fn inverse(&self, data: CollectionData) -> Result<CollectionData, GovernanceError> {
        (self.inverse)(data)
    }
}

impl Debug for MigrationStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationStep")
            .field("version", &self.version)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// A step scheduled or applied during a walk between two versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlannedStep {
    pub version: SchemaVersion,
    pub description: String,
    pub direction: Direction,
}

/// The ordered migration steps registered for one collection.
#[derive(Debug)]
pub struct MigrationPlan {
    collection: String,
    steps: Vec<MigrationStep>,
}

impl MigrationPlan {
    #[must_use]
    pub fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            steps: Vec::new(),
        }
    }

    /// Add a step, keeping steps sorted by version.
    ///
    /// # Errors
    /// Returns [`GovernanceError::Validation`] when the version is `0.0.0` or is
    /// already registered.
    pub fn with_step(mut self, step: MigrationStep) -> Result<Self, GovernanceError> {
        if step.version == SchemaVersion::INITIAL {
            return Err(GovernanceError::Validation(format!(
                "migration for `{}` cannot target the initial version",
                self.collection
            )));
        }
        if self.steps.iter().any(|existing| existing.version == step.version) {
            return Err(GovernanceError::Validation(format!(
                "migration {} for `{}` is registered twice",
                step.version, self.collection
            )));
        }
        self.steps.push(step);
        self.steps.sort_by_key(|step| step.version);
        Ok(self)
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Every reachable version in ascending order, starting at `0.0.0`.
    #[must_use]
    pub fn versions(&self) -> Vec<SchemaVersion> {
        std::iter::once(SchemaVersion::INITIAL)
            .chain(self.steps.iter().map(|step| step.version))
            .collect()
    }

    #[must_use]
    pub fn latest(&self) -> SchemaVersion {
        self.steps.last().map_or(SchemaVersion::INITIAL, |step| step.version)
    }

    /// Versions still to apply when upgrading from `current` to the latest.
    #[must_use]
    pub fn pending(&self, current: SchemaVersion) -> Vec<SchemaVersion> {
        self.steps.iter().map(|step| step.version).filter(|version| *version > current).collect()
    }

    fn position(&self, version: SchemaVersion) -> Result<usize, GovernanceError> {
        self.versions().iter().position(|candidate| *candidate == version).ok_or_else(|| {
            GovernanceError::UnknownVersion {
                collection: self.collection.clone(),
                version: version.to_string(),
            }
        })
    }

    /// The steps that move a collection from `from` to `to`, one version at a time.
    ///
    /// # Errors
    /// Returns [`GovernanceError::UnknownVersion`] when either end is not registered.
    pub fn walk(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<(&MigrationStep, Direction)>, GovernanceError> {
        let start = self.position(from)?;
        let end = self.position(to)?;
        // Position `i` is reached by the step at index `i - 1`.
        let walk = if end >= start {
            self.steps[start..end].iter().map(|step| (step, Direction::Up)).collect()
        } else {
            self.steps[end..start].iter().rev().map(|step| (step, Direction::Down)).collect()
        };
        Ok(walk)
    }

    /// Describe a walk without running any transform.
    ///
    /// # Errors
    /// Returns [`GovernanceError::UnknownVersion`] when either end is not registered.
    pub fn describe(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
    ) -> Result<Vec<PlannedStep>, GovernanceError> {
        Ok(self
            .walk(from, to)?
            .into_iter()
            .map(|(step, direction)| PlannedStep {
                version: step.version,
                description: step.description.clone(),
                direction,
            })
            .collect())
    }

    /// Run the walk from `from` to `to` over an in-memory copy.
    ///
    /// # Errors
    /// Returns [`GovernanceError::UnknownVersion`] for unregistered ends and
    /// [`GovernanceError::Transform`] when any step fails.
    pub fn apply(
        &self,
        from: SchemaVersion,
        to: SchemaVersion,
        data: CollectionData,
    ) -> Result<(CollectionData, Vec<PlannedStep>), GovernanceError> {
        let mut working = data;
        let mut applied = Vec::new();
        for (step, direction) in self.walk(from, to)? {
            let outcome = match direction {
                Direction::Up => step.forward(working),
                Direction::Down => step.inverse(working),
            };
            working = outcome.map_err(|err| GovernanceError::Transform {
                version: step.version.to_string(),
                message: err.to_string(),
            })?;
            applied.push(PlannedStep {
                version: step.version,
                description: step.description.clone(),
                direction,
            });
        }
        Ok((working, applied))
    }
}

/// Migration plans keyed by collection name.
#[derive(Debug, Default)]
pub struct MigrationCatalog {
    plans: BTreeMap<String, MigrationPlan>,
}

impl MigrationCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, plan: MigrationPlan) {
        self.plans.insert(plan.collection.clone(), plan);
    }

    #[must_use]
    pub fn plan(&self, collection: &str) -> Option<&MigrationPlan> {
        self.plans.get(collection)
    }

    /// Latest registered version, `0.0.0` for collections without migrations.
    #[must_use]
    pub fn latest(&self, collection: &str) -> SchemaVersion {
        self.plan(collection).map_or(SchemaVersion::INITIAL, MigrationPlan::latest)
    }

    #[must_use]
    pub fn collections(&self) -> Vec<String> {
        self.plans.keys().cloned().collect()
    }
}
