use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;

use crate::db::tenant::PUBLIC_SCHEMA;
use crate::error::MalformedMigrationError;

/// Separates the forward body from the reverse body in a migration source.
pub const DOWN_MARKER: &str = "-- migrate:down";

/// Which schemas a migration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationScope {
    Public,
    Tenant,
    Both,
}

impl MigrationScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Tenant => "tenant",
            Self::Both => "both",
        }
    }

    pub fn applies_to(self, kind: SchemaKind) -> bool {
        matches!(
            (self, kind),
            (Self::Both, _) | (Self::Public, SchemaKind::Public) | (Self::Tenant, SchemaKind::Tenant)
        )
    }
}

impl fmt::Display for MigrationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact lowercase match only; anything else is a malformed header.
impl FromStr for MigrationScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "tenant" => Ok(Self::Tenant),
            "both" => Ok(Self::Both),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Public,
    Tenant,
}

impl SchemaKind {
    pub fn of(schema: &str) -> Self {
        if schema == PUBLIC_SCHEMA {
            Self::Public
        } else {
            Self::Tenant
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Tenant => "tenant",
        }
    }
}

/// Migration version. Orders by leading numeric prefix first (so `2_x`
/// precedes `10_x`), then by the full string; versions without a numeric
/// prefix sort after numbered ones. Prefixes are compared as digit strings,
/// so any length works.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading digits without leading zeros; `None` when there are none.
    fn numeric_prefix(&self) -> Option<&str> {
        let end = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.0.len());
        (end > 0).then(|| self.0[..end].trim_start_matches('0'))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_prefix(), other.numeric_prefix()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw migration text plus where it came from.
#[derive(Debug, Clone)]
pub struct MigrationSource {
    pub path: String,
    pub contents: String,
}

impl MigrationSource {
    pub fn new(path: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationDefinition {
    pub version: Version,
    pub scope: MigrationScope,
    pub description: String,
    #[serde(skip)]
    pub up: String,
    #[serde(skip)]
    pub down: Option<String>,
    pub source: String,
}

impl MigrationDefinition {
    /// Parses the structured header at the top of a migration source:
    ///
    /// ```text
    /// -- scope: tenant
    /// -- version: 002_create_tenant_tables
    /// -- description: Create tenant tables
    /// ```
    ///
    /// The header is the leading run of `--` comment lines. Other comment
    /// lines in it are ignored. Without a `version`, the file stem is used.
    pub fn parse(source: &MigrationSource) -> Result<Self, MalformedMigrationError> {
        let path = source.path.clone();
        let (up, down) = split_bodies(&source.contents);

        let mut scope = None;
        let mut version = None;
        let mut description = None;

        let header = up
            .lines()
            .skip_while(|l| l.trim().is_empty())
            .take_while(|l| l.trim_start().starts_with("--"));

        for line in header {
            let text = line.trim_start().trim_start_matches('-').trim();
            let Some((key, value)) = text.split_once(':') else {
                continue;
            };
            let slot = match key.trim() {
                "scope" => &mut scope,
                "version" => &mut version,
                "description" => &mut description,
                _ => continue,
            };
            if slot.is_some() {
                return Err(MalformedMigrationError::RepeatedHeader {
                    path,
                    key: key.trim().to_string(),
                });
            }
            *slot = Some(value.trim().to_string());
        }

        let scope = match scope {
            None => return Err(MalformedMigrationError::MissingScope { path }),
            Some(s) => s
                .parse::<MigrationScope>()
                .map_err(|scope| MalformedMigrationError::UnknownScope {
                    path: path.clone(),
                    scope,
                })?,
        };

        let version = match version.filter(|v| !v.is_empty()) {
            Some(v) => v,
            None => Path::new(&path)
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| MalformedMigrationError::MissingVersion { path: path.clone() })?,
        };

        let has_statements = up
            .lines()
            .map(str::trim)
            .any(|l| !l.is_empty() && !l.starts_with("--"));
        if !has_statements {
            return Err(MalformedMigrationError::EmptyBody { path });
        }

        Ok(Self {
            version: Version::new(version),
            scope,
            description: description.unwrap_or_default(),
            up: up.trim().to_string(),
            down: down.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            source: path,
        })
    }
}

fn split_bodies(contents: &str) -> (&str, Option<&str>) {
    let mut offset = 0;
    for line in contents.split_inclusive('\n') {
        if line.trim() == DOWN_MARKER {
            return (&contents[..offset], Some(&contents[offset + line.len()..]));
        }
        offset += line.len();
    }
    (contents, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(path: &str, contents: &str) -> MigrationSource {
        MigrationSource::new(path, contents)
    }

    #[test]
    fn parses_header_and_bodies() {
        let def = MigrationDefinition::parse(&source(
            "migrations/003_add_avatar.sql",
            "-- scope: tenant\n\
             -- version: 003_add_avatar\n\
             -- description: Add avatar_url column\n\
             \n\
             ALTER TABLE users ADD COLUMN avatar_url VARCHAR(500);\n\
             -- migrate:down\n\
             ALTER TABLE users DROP COLUMN avatar_url;\n",
        ))
        .unwrap();

        assert_eq!(def.version.as_str(), "003_add_avatar");
        assert_eq!(def.scope, MigrationScope::Tenant);
        assert_eq!(def.description, "Add avatar_url column");
        assert!(def.up.ends_with("ADD COLUMN avatar_url VARCHAR(500);"));
        assert!(!def.up.contains("DROP COLUMN"));
        assert_eq!(def.down.as_deref(), Some("ALTER TABLE users DROP COLUMN avatar_url;"));
        assert_eq!(def.source, "migrations/003_add_avatar.sql");
    }

    #[test]
    fn version_falls_back_to_file_stem() {
        let def = MigrationDefinition::parse(&source(
            "migrations/007_backfill.sql",
            "-- scope: both\nUPDATE audit_log SET actor = 'system' WHERE actor IS NULL;\n",
        ))
        .unwrap();
        assert_eq!(def.version.as_str(), "007_backfill");
        assert_eq!(def.down, None);
    }

    #[test]
    fn header_keys_after_body_are_not_header() {
        let err = MigrationDefinition::parse(&source(
            "x.sql",
            "SELECT 1;\n-- scope: public\n",
        ))
        .unwrap_err();
        assert!(matches!(err, MalformedMigrationError::MissingScope { .. }));
    }

    #[test]
    fn unknown_or_miscased_scope_is_rejected() {
        for scope in ["Tenant", "tenants", "all", ""] {
            let err = MigrationDefinition::parse(&source(
                "x.sql",
                &format!("-- scope: {scope}\nSELECT 1;\n"),
            ))
            .unwrap_err();
            assert!(
                matches!(err, MalformedMigrationError::UnknownScope { .. }),
                "{scope}: {err}"
            );
        }
    }

    #[test]
    fn repeated_header_key_is_rejected() {
        let err = MigrationDefinition::parse(&source(
            "x.sql",
            "-- scope: public\n-- scope: tenant\nSELECT 1;\n",
        ))
        .unwrap_err();
        assert!(matches!(err, MalformedMigrationError::RepeatedHeader { .. }));
    }

    #[test]
    fn comment_only_body_is_rejected() {
        let err = MigrationDefinition::parse(&source(
            "x.sql",
            "-- scope: public\n-- nothing here\n-- migrate:down\nDROP TABLE t;\n",
        ))
        .unwrap_err();
        assert!(matches!(err, MalformedMigrationError::EmptyBody { .. }));
    }

    #[test]
    fn versions_order_by_numeric_prefix() {
        let mut versions: Vec<Version> = ["10_late", "2_early", "002_padded", "zeta", "alpha", "1_first"]
            .into_iter()
            .map(Version::new)
            .collect();
        versions.sort();
        let ordered: Vec<&str> = versions.iter().map(Version::as_str).collect();
        assert_eq!(ordered, ["1_first", "002_padded", "2_early", "10_late", "alpha", "zeta"]);
    }

    #[test]
    fn prefixes_wider_than_a_machine_integer_still_order_numerically() {
        let mut versions: Vec<Version> = [
            "alpha",
            "99999999999999999999_b",
            "2_x",
            "18446744073709551616_a",
            "0000018446744073709551616_c",
        ]
        .into_iter()
        .map(Version::new)
        .collect();
        versions.sort();
        let ordered: Vec<&str> = versions.iter().map(Version::as_str).collect();
        assert_eq!(
            ordered,
            [
                "2_x",
                "0000018446744073709551616_c",
                "18446744073709551616_a",
                "99999999999999999999_b",
                "alpha",
            ]
        );
    }

    #[test]
    fn scope_applicability() {
        use MigrationScope::*;
        assert!(Public.applies_to(SchemaKind::Public));
        assert!(!Public.applies_to(SchemaKind::Tenant));
        assert!(Tenant.applies_to(SchemaKind::Tenant));
        assert!(!Tenant.applies_to(SchemaKind::Public));
        assert!(Both.applies_to(SchemaKind::Public));
        assert!(Both.applies_to(SchemaKind::Tenant));

        assert_eq!(SchemaKind::of("public"), SchemaKind::Public);
        assert_eq!(SchemaKind::of("tenant_acme"), SchemaKind::Tenant);
    }
}
