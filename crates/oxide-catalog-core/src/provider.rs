//! Collaborator contracts.
//!
//! The object model never talks to a database directly. It consumes:
//!
//! - a [`Connection`] that executes statement batches and answers
//!   metadata [`Request`]s with forward-only [`DataReader`]s,
//! - a [`MetadataProvider`] that reports which properties exist for a
//!   type on a given server and which fields each initialization tier
//!   needs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::preferences::ScriptingPreferences;
use crate::registry::TypeRegistry;
use crate::urn::Urn;
use crate::value::PropertyValue;

/// Server version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ServerVersion {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
    /// Build number.
    pub build: u32,
}

impl ServerVersion {
    /// Creates a version.
    #[must_use]
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Parses a dotted version string such as `3.45.1`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.').map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = parts.next().and_then(Result::ok).unwrap_or(0);
        let build = parts.next().and_then(Result::ok).unwrap_or(0);
        Some(Self::new(major, minor, build))
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Deployment flavor of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EngineType {
    /// A self-hosted server or embedded engine.
    #[default]
    Standalone,
    /// A managed cloud service.
    Cloud,
}

/// Product edition of the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EngineEdition {
    /// Full-featured edition.
    #[default]
    Enterprise,
    /// Standard edition.
    Standard,
    /// Free, size-limited edition.
    Express,
    /// In-process engine.
    Embedded,
}

/// Information the connection reports about the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name, used as the key of the root object.
    pub name: String,
    /// Detected version.
    pub version: ServerVersion,
    /// Engine type.
    pub engine_type: EngineType,
    /// Engine edition.
    pub engine_edition: EngineEdition,
    /// Default collation name.
    pub collation: String,
    /// Database the connection is bound to, if any.
    pub database_name: Option<String>,
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({:?}, {:?})",
            self.name, self.version, self.engine_type, self.engine_edition
        )
    }
}

/// Error reported by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code}, severity {severity})")]
pub struct ExecutionError {
    /// Server message.
    pub message: String,
    /// Server error number.
    pub code: i32,
    /// Severity class, 20 and above terminates the connection.
    pub severity: u8,
    /// Index of the failing statement within the batch.
    pub statement_index: Option<usize>,
}

impl ExecutionError {
    /// Error code reported when the server terminates the session.
    pub const SEVERE_SERVICE_FAILURE: i32 = 596;

    /// Creates an error with severity 16.
    #[must_use]
    pub fn new(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            code,
            severity: 16,
            statement_index: None,
        }
    }

    /// Sets the severity.
    #[must_use]
    pub const fn with_severity(mut self, severity: u8) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the failing statement index.
    #[must_use]
    pub const fn at_statement(mut self, index: usize) -> Self {
        self.statement_index = Some(index);
        self
    }

    /// Returns true if the failure means the session itself went away, as
    /// happens when dropping the database the connection is bound to.
    #[must_use]
    pub const fn is_severe_service_failure(&self) -> bool {
        self.code == Self::SEVERE_SERVICE_FAILURE || self.severity >= 20
    }
}

/// One row of a metadata query.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<PropertyValue>,
}

impl Row {
    /// Creates a row. `values` is aligned with `columns`.
    #[must_use]
    pub const fn new(columns: Arc<[String]>, values: Vec<PropertyValue>) -> Self {
        Self { columns, values }
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the values.
    #[must_use]
    pub fn values(&self) -> &[PropertyValue] {
        &self.values
    }

    /// Returns the value of a column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&PropertyValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Iterates over `(column, value)` pairs whose column starts with
    /// `prefix`, yielding the column name with the prefix removed.
    ///
    /// An empty prefix yields every column unchanged.
    pub fn fields_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a PropertyValue)> + 'a {
        self.columns
            .iter()
            .zip(self.values.iter())
            .filter_map(move |(column, value)| {
                column
                    .strip_prefix(prefix)
                    .map(|stripped| (stripped, value))
            })
    }
}

/// Forward-only reader over the rows of one metadata query.
pub trait DataReader {
    /// Returns the column names.
    fn columns(&self) -> &[String];

    /// Returns the next row, `None` once exhausted.
    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError>;
}

/// A reader over rows already held in memory.
#[derive(Debug)]
pub struct VecReader {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<PropertyValue>>,
}

impl VecReader {
    /// Creates a reader.
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<PropertyValue>>) -> Self {
        Self {
            columns: Arc::from(columns),
            rows: rows.into(),
        }
    }
}

impl DataReader for VecReader {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> Result<Option<Row>, ExecutionError> {
        Ok(self
            .rows
            .pop_front()
            .map(|values| Row::new(Arc::clone(&self.columns), values)))
    }
}

/// Fields requested for an intermediate level of a multi-level request.
///
/// Their columns are named `{type_name}_{field}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelFields {
    /// Segment type.
    pub type_name: String,
    /// Requested fields.
    pub fields: Vec<String>,
}

impl LevelFields {
    /// Returns the column name carrying `field` for this level.
    #[must_use]
    pub fn column(&self, field: &str) -> String {
        format!("{}_{field}", self.type_name)
    }
}

/// A sort column of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// Result column name, prefixed for intermediate levels.
    pub column: String,
    /// Sort descending.
    pub descending: bool,
}

impl OrderBy {
    /// Ascending order on a column.
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }
}

/// A metadata query.
///
/// The last URN segment is the level whose rows are returned. The entries
/// of `parent_fields` describe the segments directly above it, outermost
/// first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Filter path.
    pub urn: Urn,
    /// Fields of the deepest level.
    pub fields: Vec<String>,
    /// Fields of intermediate levels.
    pub parent_fields: Vec<LevelFields>,
    /// Result ordering.
    pub order_by: Vec<OrderBy>,
}

impl Request {
    /// Creates a request for `fields` of the objects matching `urn`.
    #[must_use]
    pub const fn new(urn: Urn, fields: Vec<String>) -> Self {
        Self {
            urn,
            fields,
            parent_fields: Vec::new(),
            order_by: Vec::new(),
        }
    }

    /// Returns the index of the first URN segment covered by
    /// `parent_fields`.
    #[must_use]
    pub fn first_parent_level(&self) -> usize {
        self.urn
            .len()
            .saturating_sub(1)
            .saturating_sub(self.parent_fields.len())
    }
}

/// Execution and transport collaborator.
///
/// Implementations are driven from a single thread and never see two
/// readers open at once; the execution manager enforces that.
pub trait Connection {
    /// Reports server version, edition and collation.
    fn server_info(&self) -> Result<ServerInfo, ExecutionError>;

    /// Executes statements in order. A failure reports the index of the
    /// failing statement.
    fn execute_non_query(&mut self, statements: &[String]) -> Result<(), ExecutionError>;

    /// Executes a statement returning one value.
    fn execute_scalar(&mut self, statement: &str) -> Result<PropertyValue, ExecutionError>;

    /// Runs a metadata query.
    fn open_reader(&mut self, request: &Request) -> Result<Box<dyn DataReader>, ExecutionError>;
}

/// Reports legal properties and field lists per type.
pub trait MetadataProvider {
    /// Returns true if `property` exists for `type_name` on `server`.
    fn is_supported(&self, type_name: &str, property: &str, server: &ServerInfo) -> bool;

    /// Fields fetched on first access to an existing object.
    fn default_fields(&self, type_name: &str, server: &ServerInfo) -> Vec<String>;

    /// Every non-expensive field.
    fn full_fields(&self, type_name: &str, server: &ServerInfo) -> Vec<String>;

    /// Fields needed to script an object for the given target.
    fn script_fields(&self, type_name: &str, preferences: &ScriptingPreferences) -> Vec<String>;
}

/// A [`MetadataProvider`] reading the property tables of registered
/// type descriptors.
#[derive(Debug, Clone)]
pub struct DescriptorMetadataProvider {
    registry: Arc<TypeRegistry>,
}

impl DescriptorMetadataProvider {
    /// Creates a provider over a registry.
    #[must_use]
    pub const fn new(registry: Arc<TypeRegistry>) -> Self {
        Self { registry }
    }

    fn fields(
        &self,
        type_name: &str,
        version: ServerVersion,
        engine: EngineType,
        filter: impl Fn(&crate::property::PropertyMetadata) -> bool,
    ) -> Vec<String> {
        self.registry
            .get(type_name)
            .map(|descriptor| {
                descriptor
                    .property_list()
                    .iter()
                    .filter(|p| {
                        !p.expensive && p.supported_on(version, engine) && filter(p)
                    })
                    .map(|p| p.name.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl MetadataProvider for DescriptorMetadataProvider {
    fn is_supported(&self, type_name: &str, property: &str, server: &ServerInfo) -> bool {
        self.registry
            .get(type_name)
            .ok()
            .and_then(|d| d.property(property))
            .is_some_and(|p| p.supported_on(server.version, server.engine_type))
    }

    fn default_fields(&self, type_name: &str, server: &ServerInfo) -> Vec<String> {
        self.fields(type_name, server.version, server.engine_type, |p| {
            p.in_default_set
        })
    }

    fn full_fields(&self, type_name: &str, server: &ServerInfo) -> Vec<String> {
        self.fields(type_name, server.version, server.engine_type, |_| true)
    }

    fn script_fields(&self, type_name: &str, preferences: &ScriptingPreferences) -> Vec<String> {
        self.fields(
            type_name,
            preferences.version(),
            preferences.engine_type(),
            |p| !p.design_time,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_and_order() {
        assert_eq!(
            ServerVersion::parse("3.45.1"),
            Some(ServerVersion::new(3, 45, 1))
        );
        assert_eq!(
            ServerVersion::parse("16"),
            Some(ServerVersion::new(16, 0, 0))
        );
        assert_eq!(ServerVersion::parse("abc"), None);
        assert!(ServerVersion::new(13, 0, 0) > ServerVersion::new(12, 9, 9));
    }

    #[test]
    fn test_severe_service_failure() {
        assert!(ExecutionError::new("gone", 596).is_severe_service_failure());
        assert!(
            ExecutionError::new("fatal", 1)
                .with_severity(20)
                .is_severe_service_failure()
        );
        assert!(
            !ExecutionError::new("syntax", 102).is_severe_service_failure()
        );
    }

    #[test]
    fn test_row_prefix_iteration() {
        let row = Row::new(
            Arc::from(vec!["Table_Name".to_string(), "Name".to_string()]),
            vec![PropertyValue::from("t"), PropertyValue::from("c")],
        );
        let parent: Vec<_> = row.fields_with_prefix("Table_").collect();
        assert_eq!(parent, vec![("Name", &PropertyValue::from("t"))]);
        assert_eq!(row.fields_with_prefix("").count(), 2);
        assert_eq!(row.get("Name"), Some(&PropertyValue::from("c")));
    }

    #[test]
    fn test_vec_reader_is_forward_only() {
        let mut reader = VecReader::new(
            vec!["Name".into()],
            vec![
                vec![PropertyValue::from("a")],
                vec![PropertyValue::from("b")],
            ],
        );
        assert_eq!(reader.columns(), ["Name".to_string()]);
        assert!(reader.next_row().unwrap().is_some());
        assert!(reader.next_row().unwrap().is_some());
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_first_parent_level() {
        let mut request = Request::new(
            Urn::parse("Server[@Name='s']/Database/Table/Column").unwrap(),
            vec!["Name".into()],
        );
        request.parent_fields = vec![
            LevelFields {
                type_name: "Database".into(),
                fields: vec!["Name".into()],
            },
            LevelFields {
                type_name: "Table".into(),
                fields: vec!["Name".into()],
            },
        ];
        assert_eq!(request.first_parent_level(), 1);
        assert_eq!(request.parent_fields[1].column("Name"), "Table_Name");
    }
}
