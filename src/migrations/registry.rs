use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use crate::error::MalformedMigrationError;

use super::definition::{MigrationDefinition, MigrationSource, SchemaKind, Version};

/// Migrations compiled into the binary.
const EMBEDDED: &[(&str, &str)] = &[
    (
        "migrations/001_create_public_tables.sql",
        include_str!("../../migrations/001_create_public_tables.sql"),
    ),
    (
        "migrations/002_create_tenant_tables.sql",
        include_str!("../../migrations/002_create_tenant_tables.sql"),
    ),
    (
        "migrations/003_create_audit_log.sql",
        include_str!("../../migrations/003_create_audit_log.sql"),
    ),
    (
        "migrations/004_updated_at_triggers.sql",
        include_str!("../../migrations/004_updated_at_triggers.sql"),
    ),
];

/// The ordered catalog of known migrations. Built once at startup and
/// read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    definitions: BTreeMap<Version, MigrationDefinition>,
}

impl MigrationRegistry {
    /// Parses every source. Discovery order does not matter: the same set of
    /// sources always yields the same catalog.
    pub fn discover(
        sources: impl IntoIterator<Item = MigrationSource>,
    ) -> Result<Self, MalformedMigrationError> {
        let mut sources: Vec<MigrationSource> = sources.into_iter().collect();
        sources.sort_by(|a, b| a.path.cmp(&b.path));

        let mut definitions: BTreeMap<Version, MigrationDefinition> = BTreeMap::new();
        for source in &sources {
            let def = MigrationDefinition::parse(source)?;
            if let Some(existing) = definitions.get(&def.version) {
                return Err(MalformedMigrationError::DuplicateVersion {
                    version: def.version.to_string(),
                    first: existing.source.clone(),
                    second: def.source,
                });
            }
            definitions.insert(def.version.clone(), def);
        }

        Ok(Self { definitions })
    }

    pub fn embedded() -> Result<Self, MalformedMigrationError> {
        Self::discover(
            EMBEDDED
                .iter()
                .map(|(path, contents)| MigrationSource::new(*path, *contents)),
        )
    }

    /// Reads every `*.sql` file directly inside `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, MalformedMigrationError> {
        let io_err = |path: &Path, source| MalformedMigrationError::Io {
            path: path.display().to_string(),
            source,
        };

        let mut sources = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| io_err(dir, e))? {
            let path = entry.map_err(|e| io_err(dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
            sources.push(MigrationSource::new(path.display().to_string(), contents));
        }
        Self::discover(sources)
    }

    /// `dir` when given, otherwise the compiled-in catalog.
    pub fn load(dir: Option<&Path>) -> Result<Self, MalformedMigrationError> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Self::embedded(),
        }
    }

    /// All definitions in ascending version order.
    pub fn definitions(&self) -> impl Iterator<Item = &MigrationDefinition> {
        self.definitions.values()
    }

    pub fn get(&self, version: &str) -> Option<&MigrationDefinition> {
        self.definitions.get(&Version::new(version))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Definitions applicable to `schema` and not in `applied`, in version order.
    pub fn pending_for<'a>(
        &'a self,
        schema: &str,
        applied: &'a BTreeSet<String>,
    ) -> impl Iterator<Item = &'a MigrationDefinition> + 'a {
        let kind = SchemaKind::of(schema);
        self.definitions
            .values()
            .filter(move |d| d.scope.applies_to(kind))
            .filter(move |d| !applied.contains(d.version.as_str()))
    }
}
