//! SQLite object model and DDL scripters.
//!
//! ```text
//! Server
//! └── Database            (pragma_database_list)
//!     └── Table           (pragma_table_list)
//!         ├── Column      (pragma_table_xinfo)
//!         │   └── DefaultConstraint
//!         └── Index       (pragma_index_list)
//!             └── IndexedColumn (pragma_index_xinfo)
//! ```
//!
//! SQLite can only add, drop and rename columns in place, so column and
//! index properties are fixed once created.

use std::sync::Arc;

use oxide_catalog_core::error::{CatalogError, Result};
use oxide_catalog_core::prelude::*;

use crate::enumerator::quote_identifier;

/// Builds the type registry of the SQLite model.
#[must_use]
pub fn registry() -> Arc<TypeRegistry> {
    let table = Arc::new(TableScripter);
    let column = Arc::new(ColumnScripter);
    let index = Arc::new(IndexScripter);
    Arc::new(
        TypeRegistry::new("Server")
            .register(
                TypeDescriptor::new("Server", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("Version", PropertyType::Text)
                            .read_only()
                            .default_set(),
                    ])
                    .child("Database"),
            )
            .register(
                TypeDescriptor::new("Database", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("File", PropertyType::Text)
                            .read_only()
                            .default_set(),
                    ])
                    .child("Table")
                    .owns_connection(),
            )
            .register(
                TypeDescriptor::new("Table", KeyKind::Schema)
                    .properties(vec![
                        PropertyMetadata::new("ColumnCount", PropertyType::Int)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("IsStrict", PropertyType::Bool)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("IsWithoutRowid", PropertyType::Bool)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("Sql", PropertyType::Text)
                            .read_only()
                            .expensive(),
                    ])
                    .child("Column")
                    .child("Index")
                    .scriptable(table.clone())
                    .alterable(table.clone())
                    .droppable(table.clone())
                    .renamable(table)
                    .propagating(Arc::new(TablePropagation)),
            )
            .register(
                TypeDescriptor::new("Column", KeyKind::Simple)
                    .order(CollectionOrder::ById)
                    .properties(vec![
                        PropertyMetadata::new("ID", PropertyType::Int)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("DataType", PropertyType::Text)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("Nullable", PropertyType::Bool)
                            .read_only_after_creation()
                            .default_set()
                            .default_value(PropertyValue::Bool(true)),
                        PropertyMetadata::new("PrimaryKeyOrdinal", PropertyType::Int)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("IsGenerated", PropertyType::Bool)
                            .read_only()
                            .default_set(),
                    ])
                    .singleton("DefaultConstraint")
                    .scriptable(column.clone())
                    .droppable(column.clone())
                    .renamable(column)
                    .propagating(Arc::new(ColumnPropagation)),
            )
            .register(
                TypeDescriptor::new("DefaultConstraint", KeyKind::Simple).properties(vec![
                    PropertyMetadata::new("Text", PropertyType::Text)
                        .read_only_after_creation()
                        .default_set(),
                ]),
            )
            .register(
                TypeDescriptor::new("Index", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("IsUnique", PropertyType::Bool)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("IsPartial", PropertyType::Bool)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("Sql", PropertyType::Text)
                            .read_only()
                            .expensive(),
                    ])
                    .child("IndexedColumn")
                    .scriptable(index.clone())
                    .droppable(index)
                    .propagating(Arc::new(IndexPropagation)),
            )
            .register(
                TypeDescriptor::new("IndexedColumn", KeyKind::Simple)
                    .order(CollectionOrder::ById)
                    .properties(vec![
                        PropertyMetadata::new("ID", PropertyType::Int)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("IsDescending", PropertyType::Bool)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("Collation", PropertyType::Text)
                            .read_only_after_creation()
                            .default_set(),
                    ]),
            ),
    )
}

// =============================================================================
// Propagation
// =============================================================================

/// Columns are part of `CREATE TABLE`; indexes are separate statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct TablePropagation;

impl Propagating for TablePropagation {
    fn propagate_info(
        &self,
        _object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo> {
        match action {
            PropagateAction::Create => vec![
                PropagateInfo::state_only(PropagateTarget::Collection("Column")),
                PropagateInfo::script(PropagateTarget::Collection("Index")),
            ],
            PropagateAction::Alter | PropagateAction::CreateOrAlter => vec![
                PropagateInfo::script(PropagateTarget::Collection("Column")),
                PropagateInfo::script(PropagateTarget::Collection("Index")),
            ],
            PropagateAction::Drop => Vec::new(),
        }
    }
}

/// Defaults are part of the column definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnPropagation;

impl Propagating for ColumnPropagation {
    fn propagate_info(
        &self,
        _object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo> {
        match action {
            PropagateAction::Drop => Vec::new(),
            _ => {
                let target = PropagateTarget::Singleton("DefaultConstraint");
                vec![PropagateInfo::state_only(target)]
            }
        }
    }
}

/// Indexed columns are part of `CREATE INDEX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexPropagation;

impl Propagating for IndexPropagation {
    fn propagate_info(
        &self,
        _object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo> {
        match action {
            PropagateAction::Create => vec![PropagateInfo::state_only(PropagateTarget::Collection(
                "IndexedColumn",
            ))],
            _ => Vec::new(),
        }
    }
}

// =============================================================================
// Scripters
// =============================================================================

/// `"schema"."name"` of a schema-qualified object.
fn qualified_name(object: &ObjectView<'_>) -> String {
    match object.schema() {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(object.name())
        ),
        None => quote_identifier(object.name()),
    }
}

fn parent_table<'a>(object: &ObjectView<'a>) -> Result<ObjectView<'a>> {
    object.parent().ok_or_else(|| CatalogError::ParentNotSet {
        type_name: object.type_name().to_string(),
        missing: vec!["Parent".to_string()],
    })
}

/// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
fn column_definition(column: &ObjectView<'_>, inline_primary_key: bool) -> String {
    let mut parts = vec![quote_identifier(column.name())];
    if let Some(data_type) = column.text("DataType").filter(|t| !t.is_empty()) {
        parts.push(data_type.to_string());
    }
    if inline_primary_key && column.int("PrimaryKeyOrdinal").unwrap_or(0) > 0 {
        parts.push("PRIMARY KEY".to_string());
    }
    if column.flag("Nullable") == Some(false) {
        parts.push("NOT NULL".to_string());
    }
    if let Some(default) = column
        .singleton("DefaultConstraint")
        .filter(|d| d.state() != ObjectState::Dropped)
        .and_then(|d| d.text("Text"))
        .filter(|text| !text.is_empty())
    {
        parts.push(format!("DEFAULT {default}"));
    }
    parts.join(" ")
}

fn primary_key(columns: &[ObjectView<'_>]) -> Vec<String> {
    let mut keyed: Vec<(i64, &str)> = columns
        .iter()
        .filter_map(|c| {
            c.int("PrimaryKeyOrdinal")
                .filter(|o| *o > 0)
                .map(|o| (o, c.name()))
        })
        .collect();
    keyed.sort_by_key(|(ordinal, _)| *ordinal);
    keyed
        .into_iter()
        .map(|(_, name)| quote_identifier(name))
        .collect()
}

/// `CREATE TABLE`, `DROP TABLE` and `ALTER TABLE ... RENAME TO`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableScripter;

impl Scriptable for TableScripter {
    fn script_create(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let columns: Vec<ObjectView<'_>> = object
            .children("Column")
            .into_iter()
            .filter(|c| c.flag("IsGenerated") != Some(true))
            .collect();
        let mut definitions: Vec<String> = columns
            .iter()
            .map(|c| column_definition(c, false))
            .collect();
        let key = primary_key(&columns);
        if !key.is_empty() {
            definitions.push(format!("PRIMARY KEY ({})", key.join(", ")));
        }

        let mut sql = String::from("CREATE TABLE ");
        if preferences.include_if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&qualified_name(object));
        sql.push_str(" (\n  ");
        sql.push_str(&definitions.join(",\n  "));
        sql.push_str("\n)");

        let mut options = Vec::new();
        if object.flag("IsStrict") == Some(true) {
            options.push("STRICT");
        }
        if object.flag("IsWithoutRowid") == Some(true) {
            options.push("WITHOUT ROWID");
        }
        if !options.is_empty() {
            sql.push(' ');
            sql.push_str(&options.join(", "));
        }
        batch.push(sql);
        Ok(())
    }
}

impl Alterable for TableScripter {
    // Table options are fixed at creation; only children change.
    fn script_alter(
        &self,
        _object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        _batch: &mut ScriptBatch,
    ) -> Result<()> {
        Ok(())
    }
}

impl Droppable for TableScripter {
    fn script_drop(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        if_exists: bool,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        batch.push(format!("DROP TABLE {guard}{}", qualified_name(object)));
        Ok(())
    }

    fn drop_if_exists_min_version(&self) -> Option<ServerVersion> {
        None
    }
}

impl Renamable for TableScripter {
    fn script_rename(
        &self,
        object: &ObjectView<'_>,
        new_name: &str,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        batch.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified_name(object),
            quote_identifier(new_name)
        ));
        Ok(())
    }
}

/// `ALTER TABLE ... ADD`, `DROP` and `RENAME COLUMN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnScripter;

impl Scriptable for ColumnScripter {
    fn script_create(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let table = parent_table(object)?;
        batch.push(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            qualified_name(&table),
            column_definition(object, true)
        ));
        Ok(())
    }
}

impl Droppable for ColumnScripter {
    fn script_drop(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        if_exists: bool,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        if if_exists {
            return Err(CatalogError::UnsupportedOperation {
                type_name: object.type_name().to_string(),
                verb: Verb::DropIfExists,
            });
        }
        let table = parent_table(object)?;
        batch.push(format!(
            "ALTER TABLE {} DROP COLUMN {}",
            qualified_name(&table),
            quote_identifier(object.name())
        ));
        Ok(())
    }

    fn drop_if_exists_min_version(&self) -> Option<ServerVersion> {
        None
    }
}

impl Renamable for ColumnScripter {
    fn script_rename(
        &self,
        object: &ObjectView<'_>,
        new_name: &str,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let table = parent_table(object)?;
        batch.push(format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            qualified_name(&table),
            quote_identifier(object.name()),
            quote_identifier(new_name)
        ));
        Ok(())
    }
}

/// `CREATE INDEX` and `DROP INDEX`.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexScripter;

impl IndexScripter {
    /// Index names are qualified by the schema of their table.
    fn index_name(object: &ObjectView<'_>) -> Result<String> {
        let table = parent_table(object)?;
        Ok(match table.schema() {
            Some(schema) => format!(
                "{}.{}",
                quote_identifier(schema),
                quote_identifier(object.name())
            ),
            None => quote_identifier(object.name()),
        })
    }

    fn indexed_column(column: &ObjectView<'_>) -> String {
        let mut part = quote_identifier(column.name());
        let collation = column
            .text("Collation")
            .filter(|n| !n.is_empty() && !n.eq_ignore_ascii_case("BINARY"));
        if let Some(collation) = collation {
            part.push_str(" COLLATE ");
            part.push_str(collation);
        }
        if column.flag("IsDescending") == Some(true) {
            part.push_str(" DESC");
        }
        part
    }
}

impl Scriptable for IndexScripter {
    fn script_create(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let table = parent_table(object)?;
        let columns: Vec<String> = object
            .children("IndexedColumn")
            .iter()
            .map(Self::indexed_column)
            .collect();
        if columns.is_empty() {
            return Err(CatalogError::PropertyNotSet {
                type_name: object.type_name().to_string(),
                name: object.name().to_string(),
                property: "IndexedColumn".to_string(),
            });
        }

        let mut sql = String::from("CREATE ");
        if object.flag("IsUnique") == Some(true) {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        if preferences.include_if_not_exists {
            sql.push_str("IF NOT EXISTS ");
        }
        sql.push_str(&Self::index_name(object)?);
        sql.push_str(" ON ");
        // The table must live in the index's schema.
        sql.push_str(&quote_identifier(table.name()));
        sql.push_str(" (");
        sql.push_str(&columns.join(", "));
        sql.push(')');
        batch.push(sql);
        Ok(())
    }
}

impl Droppable for IndexScripter {
    fn script_drop(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        if_exists: bool,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        batch.push(format!("DROP INDEX {guard}{}", Self::index_name(object)?));
        Ok(())
    }

    fn drop_if_exists_min_version(&self) -> Option<ServerVersion> {
        None
    }
}
