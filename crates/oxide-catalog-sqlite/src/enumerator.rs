//! Translates metadata requests into SQLite catalog queries.
//!
//! Every path segment maps to one source in the `FROM` clause. Child
//! sources are pragma table functions whose arguments refer to the parent
//! alias, so a path like `Server/Database/Table/Column` becomes one
//! correlated join:
//!
//! ```sql
//! SELECT l3.cid AS "ID", l3.name AS "Name", l2.name AS "Table_Name"
//! FROM pragma_database_list AS l1, pragma_table_list AS l2,
//!      pragma_table_xinfo(l2.name, l2.schema) AS l3
//! WHERE ...
//! ORDER BY "Table_Schema" COLLATE NOCASE, "Table_Name" COLLATE NOCASE, "ID" COLLATE NOCASE
//! ```

use oxide_catalog_core::provider::Request;
use oxide_catalog_core::urn::{Condition, FilterValue};
use tracing::debug;

use crate::error::{Result, SqliteCatalogError};

/// Where the rows of a level come from.
#[derive(Debug, Clone, Copy)]
enum Source {
    /// The implicit single server row.
    Root,
    /// A table function joined to the parent.
    Join {
        from: &'static str,
        filter: Option<&'static str>,
    },
    /// Rows of the parent source itself, narrowed by a filter.
    Inline { filter: &'static str },
}

/// Query shape of one object type.
///
/// Templates refer to the level's own alias as `{a}`, the parent alias as
/// `{p}`, the grandparent alias as `{g}` and the server name as `{server}`.
#[derive(Debug)]
struct Level {
    type_name: &'static str,
    parent: Option<&'static str>,
    source: Source,
    fields: &'static [(&'static str, &'static str)],
}

const SYSTEM_TABLE_FILTER: &str = concat!(
    "{a}.schema = {p}.name AND {a}.type = 'table' ",
    "AND {a}.name NOT LIKE 'sqlite!_%' ESCAPE '!'"
);

const TABLE_SQL: &str = concat!(
    "(SELECT s.sql FROM sqlite_schema AS s ",
    "WHERE {a}.schema = 'main' AND s.type = 'table' AND s.name = {a}.name)"
);

const INDEX_SQL: &str = concat!(
    "(SELECT s.sql FROM sqlite_schema AS s ",
    "WHERE {p}.schema = 'main' AND s.type = 'index' AND s.name = {a}.name)"
);

const LEVELS: &[Level] = &[
    Level {
        type_name: "Server",
        parent: None,
        source: Source::Root,
        fields: &[("Name", "{server}"), ("Version", "sqlite_version()")],
    },
    Level {
        type_name: "Database",
        parent: Some("Server"),
        source: Source::Join {
            from: "pragma_database_list AS {a}",
            filter: None,
        },
        fields: &[("Name", "{a}.name"), ("File", "{a}.file")],
    },
    Level {
        type_name: "Table",
        parent: Some("Database"),
        source: Source::Join {
            from: "pragma_table_list AS {a}",
            filter: Some(SYSTEM_TABLE_FILTER),
        },
        fields: &[
            ("Schema", "{a}.schema"),
            ("Name", "{a}.name"),
            ("ColumnCount", "{a}.ncol"),
            ("IsStrict", "({a}.strict <> 0)"),
            ("IsWithoutRowid", "({a}.wr <> 0)"),
            ("Sql", TABLE_SQL),
        ],
    },
    Level {
        type_name: "Column",
        parent: Some("Table"),
        source: Source::Join {
            from: "pragma_table_xinfo({p}.name, {p}.schema) AS {a}",
            filter: Some("{a}.hidden <> 1"),
        },
        fields: &[
            ("ID", "{a}.cid"),
            ("Name", "{a}.name"),
            ("DataType", "{a}.type"),
            ("Nullable", "({a}.\"notnull\" = 0)"),
            ("PrimaryKeyOrdinal", "{a}.pk"),
            ("IsGenerated", "({a}.hidden IN (2, 3))"),
        ],
    },
    Level {
        type_name: "DefaultConstraint",
        parent: Some("Column"),
        source: Source::Inline {
            filter: "{p}.dflt_value IS NOT NULL",
        },
        fields: &[("Name", "('DF_' || {p}.name)"), ("Text", "{p}.dflt_value")],
    },
    Level {
        type_name: "Index",
        parent: Some("Table"),
        source: Source::Join {
            from: "pragma_index_list({p}.name, {p}.schema) AS {a}",
            filter: Some("{a}.origin = 'c'"),
        },
        fields: &[
            ("Name", "{a}.name"),
            ("IsUnique", "({a}.\"unique\" <> 0)"),
            ("IsPartial", "({a}.partial <> 0)"),
            ("Sql", INDEX_SQL),
        ],
    },
    Level {
        type_name: "IndexedColumn",
        parent: Some("Index"),
        source: Source::Join {
            from: "pragma_index_xinfo({p}.name, {g}.schema) AS {a}",
            filter: Some("{a}.key = 1"),
        },
        fields: &[
            ("ID", "{a}.seqno"),
            ("Name", "COALESCE({a}.name, '<expression>')"),
            ("IsDescending", "({a}.\"desc\" <> 0)"),
            ("Collation", "{a}.coll"),
        ],
    },
];

/// Type names the enumerator can answer.
#[must_use]
pub fn supported_types() -> Vec<&'static str> {
    LEVELS.iter().map(|level| level.type_name).collect()
}

fn level_for(type_name: &str, urn: &str) -> Result<&'static Level> {
    LEVELS
        .iter()
        .find(|level| level.type_name == type_name)
        .ok_or_else(|| SqliteCatalogError::UnknownType {
            type_name: type_name.to_string(),
            urn: urn.to_string(),
        })
}

/// A rendered query with its result column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumerationQuery {
    /// SELECT statement.
    pub sql: String,
    /// Result column names, in select order.
    pub columns: Vec<String>,
}

/// Aliases in scope while rendering one level.
struct Scope<'a> {
    alias: &'a str,
    parent: &'a str,
    grandparent: &'a str,
    server: &'a str,
}

impl Scope<'_> {
    fn render(&self, template: &str) -> String {
        template
            .replace("{server}", &quote_literal(self.server))
            .replace("{a}", self.alias)
            .replace("{p}", self.parent)
            .replace("{g}", self.grandparent)
    }
}

/// Builds the query answering `request` against a server named
/// `server_name`.
pub fn build_query(request: &Request, server_name: &str) -> Result<EnumerationQuery> {
    let urn = request.urn.to_string();
    let segments = request.urn.segments();

    let mut sources = Vec::new();
    let mut filters = Vec::new();
    let mut aliases: Vec<String> = Vec::with_capacity(segments.len());
    let mut levels: Vec<&'static Level> = Vec::with_capacity(segments.len());

    for (index, segment) in segments.iter().enumerate() {
        let level = level_for(&segment.type_name, &urn)?;
        let parent_type = levels.last().map(|l| l.type_name);
        if level.parent != parent_type {
            return Err(SqliteCatalogError::InvalidNesting {
                type_name: level.type_name.to_string(),
                parent: parent_type.unwrap_or("<root>").to_string(),
            });
        }
        let parent_alias = aliases.last().cloned().unwrap_or_default();
        let grandparent_alias = index
            .checked_sub(2)
            .and_then(|i| aliases.get(i))
            .cloned()
            .unwrap_or_default();
        // Inline levels read the parent's row.
        let alias = match level.source {
            Source::Inline { .. } => parent_alias.clone(),
            Source::Root | Source::Join { .. } => format!("l{index}"),
        };
        let scope = Scope {
            alias: &alias,
            parent: &parent_alias,
            grandparent: &grandparent_alias,
            server: server_name,
        };
        match level.source {
            Source::Root => {}
            Source::Join { from, filter } => {
                sources.push(scope.render(from));
                filters.extend(filter.map(|f| scope.render(f)));
            }
            Source::Inline { filter } => filters.push(scope.render(filter)),
        }
        for condition in &segment.predicate {
            let expression = field_expression(level, &condition.field, &scope)?;
            filters.push(condition_sql(&expression, condition));
        }
        aliases.push(alias);
        levels.push(level);
    }

    let mut select = Vec::new();
    let mut columns = Vec::new();
    let leaf_index = levels.len().saturating_sub(1);
    if let Some(&leaf) = levels.last() {
        let scope = scope_at(&aliases, leaf_index, server_name);
        for field in &request.fields {
            let expression = field_expression(leaf, field, &scope)?;
            select.push(format!("{expression} AS {}", quote_identifier(field)));
            columns.push(field.clone());
        }
    }
    let first_parent = request.first_parent_level();
    for (offset, parent_fields) in request.parent_fields.iter().enumerate() {
        let index = first_parent + offset;
        let level = levels
            .get(index)
            .copied()
            .filter(|level| level.type_name == parent_fields.type_name)
            .ok_or_else(|| SqliteCatalogError::InvalidNesting {
                type_name: parent_fields.type_name.clone(),
                parent: urn.clone(),
            })?;
        let scope = scope_at(&aliases, index, server_name);
        for field in &parent_fields.fields {
            let column = parent_fields.column(field);
            select.push(format!(
                "{} AS {}",
                field_expression(level, field, &scope)?,
                quote_identifier(&column)
            ));
            columns.push(column);
        }
    }
    if select.is_empty() {
        select.push("1 AS \"_\"".to_string());
        columns.push("_".to_string());
    }

    let mut sql = format!("SELECT {}", select.join(", "));
    if !sources.is_empty() {
        sql.push_str(" FROM ");
        sql.push_str(&sources.join(", "));
    }
    if !filters.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&filters.join(" AND "));
    }
    if !request.order_by.is_empty() {
        let order: Vec<String> = request
            .order_by
            .iter()
            .map(|o| {
                let direction = if o.descending { " DESC" } else { "" };
                format!("{} COLLATE NOCASE{direction}", quote_identifier(&o.column))
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }
    debug!(urn = %urn, sql = %sql, "Built enumeration query");
    Ok(EnumerationQuery { sql, columns })
}

fn scope_at<'a>(aliases: &'a [String], index: usize, server: &'a str) -> Scope<'a> {
    let at = |i: Option<usize>| i.and_then(|i| aliases.get(i)).map_or("", String::as_str);
    Scope {
        alias: at(Some(index)),
        parent: at(index.checked_sub(1)),
        grandparent: at(index.checked_sub(2)),
        server,
    }
}

fn field_expression(level: &Level, field: &str, scope: &Scope<'_>) -> Result<String> {
    level
        .fields
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, template)| scope.render(template))
        .ok_or_else(|| SqliteCatalogError::UnknownField {
            type_name: level.type_name.to_string(),
            field: field.to_string(),
        })
}

fn condition_sql(expression: &str, condition: &Condition) -> String {
    match &condition.value {
        FilterValue::Text(text) => format!("{expression} = {} COLLATE NOCASE", quote_literal(text)),
        FilterValue::Number(number) => format!("{expression} = {number}"),
        FilterValue::Bool(flag) => format!("{expression} = {}", i32::from(*flag)),
    }
}

/// Quotes an identifier for SQLite.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for SQLite.
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_catalog_core::provider::{LevelFields, OrderBy};
    use oxide_catalog_core::urn::Urn;

    const MAIN: &str = "Server[@Name='local']/Database[@Name='main']";

    fn table_t(rest: &str) -> String {
        format!("{MAIN}/Table[@Name='t' and @Schema='main']{rest}")
    }

    fn request(urn: &str, fields: &[&str]) -> Request {
        Request::new(
            Urn::parse(urn).unwrap(),
            fields.iter().map(ToString::to_string).collect(),
        )
    }

    #[test]
    fn test_single_level_with_predicate() {
        let urn = format!("{MAIN}/Table[@Name='users' and @Schema='main']");
        let fields = ["Schema", "Name", "IsStrict"];
        let query = build_query(&request(&urn, &fields), "local").unwrap();

        assert_eq!(query.columns, fields);
        assert!(query.sql.starts_with("SELECT l2.schema AS \"Schema\""));
        assert!(query.sql.contains("(l2.strict <> 0) AS \"IsStrict\""));
        let from = "FROM pragma_database_list AS l1, pragma_table_list AS l2";
        assert!(query.sql.contains(from));
        assert!(query.sql.contains("'local' = 'local' COLLATE NOCASE"));
        assert!(query.sql.contains("l1.name = 'main' COLLATE NOCASE"));
        assert!(query.sql.contains("l2.name = 'users' COLLATE NOCASE"));
        assert!(!query.sql.contains("ORDER BY"));
    }

    #[test]
    fn test_parent_fields_and_order() {
        let mut req = request(&format!("{MAIN}/Table/Column"), &["ID", "Name"]);
        req.parent_fields = vec![LevelFields {
            type_name: "Table".to_string(),
            fields: vec!["Schema".to_string(), "Name".to_string()],
        }];
        req.order_by = vec![
            OrderBy::asc("Table_Schema"),
            OrderBy::asc("Table_Name"),
            OrderBy::asc("ID"),
        ];

        let query = build_query(&req, "local").unwrap();

        assert_eq!(
            query.columns,
            vec!["ID", "Name", "Table_Schema", "Table_Name"]
        );
        let join = "pragma_table_xinfo(l2.name, l2.schema) AS l3";
        assert!(query.sql.contains(join));
        assert!(query.sql.contains("l2.name AS \"Table_Name\""));
        let order = concat!(
            "ORDER BY \"Table_Schema\" COLLATE NOCASE, ",
            "\"Table_Name\" COLLATE NOCASE, \"ID\" COLLATE NOCASE"
        );
        assert!(query.sql.ends_with(order));
    }

    #[test]
    fn test_inline_level_reuses_parent_alias() {
        let urn = table_t("/Column[@Name='c']/DefaultConstraint");
        let query = build_query(&request(&urn, &["Name", "Text"]), "local").unwrap();

        assert!(query.sql.contains("('DF_' || l3.name) AS \"Name\""));
        assert!(query.sql.contains("l3.dflt_value IS NOT NULL"));
        assert!(!query.sql.contains(" l4"));
    }

    #[test]
    fn test_indexed_columns_use_table_schema() {
        let urn = table_t("/Index[@Name='ix']/IndexedColumn");
        let query = build_query(&request(&urn, &["ID", "Name"]), "local").unwrap();

        let join = "pragma_index_xinfo(l3.name, l2.schema) AS l4";
        assert!(query.sql.contains(join));
        assert!(query.sql.contains("l4.key = 1"));
    }

    #[test]
    fn test_server_only_query_has_no_from() {
        let query = build_query(&request("Server[@Name='local']", &["Version"]), "local").unwrap();
        assert_eq!(
            query.sql,
            "SELECT sqlite_version() AS \"Version\" WHERE 'local' = 'local' COLLATE NOCASE"
        );
    }

    #[test]
    fn test_boolean_and_numeric_conditions() {
        let urn = table_t("/Column[@IsGenerated=false() and @ID=2]");
        let query = build_query(&request(&urn, &["Name"]), "local").unwrap();

        assert!(query.sql.contains("(l3.hidden IN (2, 3)) = 0"));
        assert!(query.sql.contains("l3.cid = 2"));
    }

    #[test]
    fn test_rejects_unknown_type_field_and_nesting() {
        let err = build_query(&request("Server[@Name='x']/Schema", &["Name"]), "x").unwrap_err();
        assert!(matches!(err, SqliteCatalogError::UnknownType { .. }));

        let err = build_query(&request("Server[@Name='x']/Database", &["Nope"]), "x").unwrap_err();
        assert!(matches!(err, SqliteCatalogError::UnknownField { .. }));

        let err = build_query(&request("Server[@Name='x']/Table", &["Name"]), "x").unwrap_err();
        assert!(matches!(err, SqliteCatalogError::InvalidNesting { .. }));
    }

    #[test]
    fn test_quoting() {
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert!(supported_types().contains(&"IndexedColumn"));
    }
}
