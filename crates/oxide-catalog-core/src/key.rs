//! Object keys.
//!
//! A key identifies an object within its parent collection. Keys are
//! immutable once the object leaves the pending state and are compared
//! with the collation inherited from the object's ancestors.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::collation::Collation;
use crate::provider::Row;
use crate::urn::{Condition, FilterValue};
use crate::value::PropertyValue;

/// Name of the key field holding an object's name.
pub const NAME_FIELD: &str = "Name";
/// Name of the key field holding an object's schema.
pub const SCHEMA_FIELD: &str = "Schema";
/// Name of the key field holding an object's numeric identifier.
pub const ID_FIELD: &str = "ID";

/// Shape of the key used by a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyKind {
    /// A single name.
    Simple,
    /// Schema and name.
    Schema,
    /// Numeric identifier plus name.
    Id,
}

impl KeyKind {
    /// Returns the key field names in URN order.
    #[must_use]
    pub const fn field_names(self) -> &'static [&'static str] {
        match self {
            Self::Simple => &[NAME_FIELD],
            Self::Schema => &[SCHEMA_FIELD, NAME_FIELD],
            Self::Id => &[ID_FIELD, NAME_FIELD],
        }
    }
}

/// Identity of an object within its parent collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKey {
    /// Name-only key.
    Simple {
        /// Object name.
        name: String,
    },
    /// Schema-qualified key.
    Schema {
        /// Owning schema.
        schema: String,
        /// Object name.
        name: String,
    },
    /// Identifier plus name.
    Id {
        /// Numeric identifier.
        id: i64,
        /// Object name.
        name: String,
    },
}

impl ObjectKey {
    /// Creates a name-only key.
    #[must_use]
    pub fn simple(name: impl Into<String>) -> Self {
        Self::Simple { name: name.into() }
    }

    /// Creates a schema-qualified key.
    #[must_use]
    pub fn schema(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Creates an identifier key.
    #[must_use]
    pub fn id(id: i64, name: impl Into<String>) -> Self {
        Self::Id {
            id,
            name: name.into(),
        }
    }

    /// Returns the kind of this key.
    #[must_use]
    pub const fn kind(&self) -> KeyKind {
        match self {
            Self::Simple { .. } => KeyKind::Simple,
            Self::Schema { .. } => KeyKind::Schema,
            Self::Id { .. } => KeyKind::Id,
        }
    }

    /// Returns the object name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Simple { name } | Self::Schema { name, .. } | Self::Id { name, .. } => name,
        }
    }

    /// Returns the schema for schema-qualified keys.
    #[must_use]
    pub fn schema_name(&self) -> Option<&str> {
        match self {
            Self::Schema { schema, .. } => Some(schema),
            _ => None,
        }
    }

    /// Returns the identifier for identifier keys.
    #[must_use]
    pub const fn id_value(&self) -> Option<i64> {
        match self {
            Self::Id { id, .. } => Some(*id),
            _ => None,
        }
    }

    /// Returns the key field names of this key.
    #[must_use]
    pub const fn field_names(&self) -> &'static [&'static str] {
        self.kind().field_names()
    }

    /// Returns a copy of this key with a different name.
    #[must_use]
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        match self {
            Self::Simple { .. } => Self::Simple { name },
            Self::Schema { schema, .. } => Self::Schema {
                schema: schema.clone(),
                name,
            },
            Self::Id { id, .. } => Self::Id { id: *id, name },
        }
    }

    /// Returns the names of empty key fields.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<String> {
        let mut missing = Vec::new();
        if let Self::Schema { schema, .. } = self
            && schema.is_empty()
        {
            missing.push(SCHEMA_FIELD.to_string());
        }
        if self.name().is_empty() {
            missing.push(NAME_FIELD.to_string());
        }
        missing
    }

    /// Checks that every key field is set.
    pub fn validate(&self) -> Result<(), String> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing {}", missing.join(", ")))
        }
    }

    /// Returns the value of a key field.
    #[must_use]
    pub fn field_value(&self, field: &str) -> Option<PropertyValue> {
        match (self, field) {
            (_, NAME_FIELD) => Some(PropertyValue::Text(self.name().to_string())),
            (Self::Schema { schema, .. }, SCHEMA_FIELD) => {
                Some(PropertyValue::Text(schema.clone()))
            }
            (Self::Id { id, .. }, ID_FIELD) => Some(PropertyValue::BigInt(*id)),
            _ => None,
        }
    }

    /// Returns the URN predicate conditions identifying this key.
    #[must_use]
    pub fn conditions(&self) -> Vec<Condition> {
        match self {
            Self::Simple { name } => vec![Condition::text(NAME_FIELD, name)],
            Self::Schema { schema, name } => vec![
                Condition::text(NAME_FIELD, name),
                Condition::text(SCHEMA_FIELD, schema),
            ],
            Self::Id { id, name } => vec![
                Condition::new(ID_FIELD, FilterValue::Number(*id)),
                Condition::text(NAME_FIELD, name),
            ],
        }
    }

    /// Renders the URN predicate, e.g. `@Name='t' and @Schema='dbo'`.
    #[must_use]
    pub fn urn_predicate(&self) -> String {
        self.conditions()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" and ")
    }

    /// Builds a key of the given kind from URN predicate conditions.
    #[must_use]
    pub fn from_conditions(kind: KeyKind, conditions: &[Condition]) -> Option<Self> {
        let text = |field: &str| {
            conditions
                .iter()
                .find(|c| c.field == field)
                .and_then(|c| match &c.value {
                    FilterValue::Text(s) => Some(s.clone()),
                    FilterValue::Number(n) => Some(n.to_string()),
                    FilterValue::Bool(_) => None,
                })
        };
        match kind {
            KeyKind::Simple => text(NAME_FIELD).map(Self::simple),
            KeyKind::Schema => Some(Self::schema(text(SCHEMA_FIELD)?, text(NAME_FIELD)?)),
            KeyKind::Id => {
                let id = conditions.iter().find(|c| c.field == ID_FIELD)?;
                let FilterValue::Number(id) = id.value else {
                    return None;
                };
                Some(Self::id(id, text(NAME_FIELD)?))
            }
        }
    }

    /// Reads a key of the given kind from a result row.
    ///
    /// Columns are looked up as `{prefix}{Field}`.
    pub fn from_row(kind: KeyKind, row: &Row, prefix: &str) -> Result<Self, String> {
        let text = |field: &str| -> Result<String, String> {
            let column = format!("{prefix}{field}");
            match row.get(&column) {
                Some(PropertyValue::Text(s)) => Ok(s.clone()),
                Some(PropertyValue::Null) | None => Err(format!("row has no value for '{column}'")),
                Some(other) => Ok(other.to_string()),
            }
        };
        match kind {
            KeyKind::Simple => Ok(Self::simple(text(NAME_FIELD)?)),
            KeyKind::Schema => Ok(Self::schema(text(SCHEMA_FIELD)?, text(NAME_FIELD)?)),
            KeyKind::Id => {
                let column = format!("{prefix}{ID_FIELD}");
                let id = row
                    .get(&column)
                    .and_then(PropertyValue::as_i64)
                    .ok_or_else(|| format!("row has no value for '{column}'"))?;
                Ok(Self::id(id, text(NAME_FIELD)?))
            }
        }
    }

    /// Compares two keys under a collation.
    ///
    /// Schema keys order by schema, then name. Identifier keys order by
    /// identifier, then name.
    #[must_use]
    pub fn compare(&self, other: &Self, collation: &Collation) -> Ordering {
        match (self, other) {
            (Self::Simple { name: a }, Self::Simple { name: b }) => collation.compare(a, b),
            (Self::Schema { schema: s, name: a }, Self::Schema { schema: t, name: b }) => {
                collation.compare(s, t).then(collation.compare(a, b))
            }
            (Self::Id { id: ia, name: a }, Self::Id { id: ib, name: b }) => {
                ia.cmp(ib).then_with(|| collation.compare(a, b))
            }
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }

    /// Returns true if both keys identify the same object under a collation.
    #[must_use]
    pub fn eq_with(&self, other: &Self, collation: &Collation) -> bool {
        self.compare(other, collation) == Ordering::Equal
    }

    /// Returns the name used in error messages, e.g. `dbo.orders`.
    #[must_use]
    pub fn exception_name(&self) -> String {
        match self {
            Self::Schema { schema, name } => format!("{schema}.{name}"),
            Self::Simple { name } | Self::Id { name, .. } => name.clone(),
        }
    }

    const fn kind_rank(&self) -> u8 {
        match self {
            Self::Simple { .. } => 0,
            Self::Schema { .. } => 1,
            Self::Id { .. } => 2,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple { name } => write!(f, "[{}]", name.replace(']', "]]")),
            Self::Schema { schema, name } => write!(
                f,
                "[{}].[{}]",
                schema.replace(']', "]]"),
                name.replace(']', "]]")
            ),
            Self::Id { id, name } => write!(f, "{id}:[{}]", name.replace(']', "]]")),
        }
    }
}
