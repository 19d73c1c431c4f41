#![allow(dead_code)]

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use oxide_catalog_core::prelude::*;

// =============================================================================
// In-memory server
// =============================================================================

/// A server object with its raw field values.
#[derive(Debug, Clone)]
pub struct Node {
    pub type_name: String,
    pub fields: Vec<(String, PropertyValue)>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            fields: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<PropertyValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name.to_string(), value)),
        }
    }

    fn name(&self) -> Option<&str> {
        self.get("Name").and_then(PropertyValue::as_str)
    }

    /// Finds a descendant by a `/`-separated list of names.
    pub fn find_mut(&mut self, names: &[&str]) -> Option<&mut Self> {
        let Some((first, rest)) = names.split_first() else {
            return Some(self);
        };
        self.children
            .iter_mut()
            .find(|c| c.name() == Some(*first))?
            .find_mut(rest)
    }

    /// Removes the child named `name` of the descendant at `path`.
    pub fn remove(&mut self, path: &[&str], name: &str) {
        if let Some(parent) = self.find_mut(path) {
            parent.children.retain(|c| c.name() != Some(name));
        }
    }
}

pub struct MemoryState {
    pub info: ServerInfo,
    pub root: Node,
    pub executed: Vec<String>,
    pub requests: Vec<Request>,
    /// Fail the first statement containing this text.
    pub fail_on: Option<String>,
    pub fail_code: i32,
    pub fail_severity: u8,
    /// Return every row twice.
    pub duplicate_rows: bool,
}

impl MemoryState {
    pub fn reader_requests(&self) -> usize {
        self.requests.len()
    }
}

pub type SharedState = Rc<RefCell<MemoryState>>;

/// Test double answering metadata requests from a [`Node`] tree.
pub struct MemoryConnection {
    state: SharedState,
}

impl MemoryConnection {
    pub fn new(root: Node) -> (Self, SharedState) {
        let info = ServerInfo {
            name: "mem".to_string(),
            version: ServerVersion::new(15, 0, 0),
            engine_type: EngineType::Standalone,
            engine_edition: EngineEdition::Enterprise,
            collation: "SQL_Latin1_General_CP1_CI_AS".to_string(),
            database_name: None,
        };
        let state = Rc::new(RefCell::new(MemoryState {
            info,
            root,
            executed: Vec::new(),
            requests: Vec::new(),
            fail_on: None,
            fail_code: 2714,
            fail_severity: 16,
            duplicate_rows: false,
        }));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }
}

impl Connection for MemoryConnection {
    fn server_info(&self) -> Result<ServerInfo, ExecutionError> {
        Ok(self.state.borrow().info.clone())
    }

    fn execute_non_query(&mut self, statements: &[String]) -> Result<(), ExecutionError> {
        let mut state = self.state.borrow_mut();
        for (index, statement) in statements.iter().enumerate() {
            if let Some(pattern) = &state.fail_on
                && statement.contains(pattern.as_str())
            {
                let message = format!("statement failed: {statement}");
                let error = ExecutionError::new(message, state.fail_code)
                    .with_severity(state.fail_severity)
                    .at_statement(index);
                return Err(error);
            }
            state.executed.push(statement.clone());
        }
        Ok(())
    }

    fn execute_scalar(&mut self, statement: &str) -> Result<PropertyValue, ExecutionError> {
        let message = format!("scalar not supported: {statement}");
        Err(ExecutionError::new(message, 0))
    }

    fn open_reader(&mut self, request: &Request) -> Result<Box<dyn DataReader>, ExecutionError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(request.clone());
        let collation = Collation::parse(&state.info.collation);

        let mut paths: Vec<Vec<&Node>> = vec![vec![&state.root]];
        for segment in request.urn.segments().iter().skip(1) {
            paths = paths
                .into_iter()
                .flat_map(|path| {
                    let last = path[path.len() - 1];
                    last.children
                        .iter()
                        .filter(|child| {
                            child.type_name == segment.type_name
                                && segment
                                    .predicate
                                    .iter()
                                    .all(|c| c.matches(child.get(&c.field), &collation))
                        })
                        .map(move |child| {
                            let mut next = path.clone();
                            next.push(child);
                            next
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
        }

        let mut columns: Vec<String> = request.fields.clone();
        for level in &request.parent_fields {
            columns.extend(level.fields.iter().map(|f| level.column(f)));
        }
        let mut rows: Vec<Vec<PropertyValue>> = paths
            .iter()
            .map(|path| {
                let leaf = path[path.len() - 1];
                let first_parent = path.len() - 1 - request.parent_fields.len();
                let mut row: Vec<PropertyValue> = request
                    .fields
                    .iter()
                    .map(|f| leaf.get(f).cloned().unwrap_or(PropertyValue::Null))
                    .collect();
                for (offset, level) in request.parent_fields.iter().enumerate() {
                    let node = path[first_parent + offset];
                    row.extend(
                        level
                            .fields
                            .iter()
                            .map(|f| node.get(f).cloned().unwrap_or(PropertyValue::Null)),
                    );
                }
                row
            })
            .collect();

        let sort_keys: Vec<usize> = request
            .order_by
            .iter()
            .filter_map(|o| columns.iter().position(|c| *c == o.column))
            .collect();
        rows.sort_by(|a, b| {
            sort_keys
                .iter()
                .map(|&i| compare_values(&a[i], &b[i], &collation))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        if state.duplicate_rows {
            rows = rows.into_iter().flat_map(|r| [r.clone(), r]).collect();
        }
        Ok(Box::new(VecReader::new(columns, rows)))
    }
}

fn compare_values(a: &PropertyValue, b: &PropertyValue, collation: &Collation) -> Ordering {
    match (a, b) {
        (PropertyValue::Null, PropertyValue::Null) => Ordering::Equal,
        (PropertyValue::Null, _) => Ordering::Less,
        (_, PropertyValue::Null) => Ordering::Greater,
        (PropertyValue::Text(x), PropertyValue::Text(y)) => collation.compare(x, y),
        _ => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

// =============================================================================
// Object model
// =============================================================================

/// Renders readable pseudo statements for every test type.
pub struct TestScripter;

fn describe(object: &ObjectView<'_>) -> String {
    match object.key() {
        Some(key) => format!("{} {key}", object.type_name()),
        None => object.type_name().to_string(),
    }
}

impl Scriptable for TestScripter {
    fn script_create(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        let guard = if preferences.include_if_not_exists {
            "IF NOT EXISTS "
        } else {
            ""
        };
        let columns: Vec<&str> = object
            .children("Column")
            .iter()
            .map(ObjectView::name)
            .collect();
        if columns.is_empty() {
            batch.push(format!("CREATE {guard}{}", describe(object)));
        } else {
            batch.push(format!(
                "CREATE {guard}{} ({})",
                describe(object),
                columns.join(", ")
            ));
        }
        Ok(())
    }

    fn script_create_or_alter(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        batch.push(format!("CREATE OR ALTER {}", describe(object)));
        Ok(())
    }

    fn create_or_alter_min_version(&self) -> Option<ServerVersion> {
        Some(ServerVersion::new(13, 0, 0))
    }
}

impl Alterable for TestScripter {
    fn script_alter(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        batch.push(format!(
            "ALTER {} SET {}",
            describe(object),
            object.dirty_names().join(",")
        ));
        Ok(())
    }
}

impl Droppable for TestScripter {
    fn script_drop(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        if_exists: bool,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        let guard = if if_exists { "IF EXISTS " } else { "" };
        batch.push(format!("DROP {guard}{}", describe(object)));
        Ok(())
    }
}

impl Renamable for TestScripter {
    fn script_rename(
        &self,
        object: &ObjectView<'_>,
        new_name: &str,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        batch.push(format!("RENAME {} TO {new_name}", describe(object)));
        Ok(())
    }

    fn script_change_owner(
        &self,
        object: &ObjectView<'_>,
        owner: &str,
        _preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> oxide_catalog_core::error::Result<()> {
        batch.push(format!("ALTER AUTHORIZATION ON {} TO {owner}", describe(object)));
        Ok(())
    }
}

/// Columns are part of `CREATE TABLE`; indexes need their own statement.
pub struct TablePropagation;

impl Propagating for TablePropagation {
    fn propagate_info(
        &self,
        _object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo> {
        use oxide_catalog_core::propagate::PropagateTarget::Collection;
        match action {
            PropagateAction::Create => vec![
                PropagateInfo::state_only(Collection("Column")),
                PropagateInfo::script(Collection("Index")),
            ],
            PropagateAction::Alter | PropagateAction::CreateOrAlter => vec![
                PropagateInfo::script(Collection("Column")),
                PropagateInfo::script(Collection("Index")),
            ],
            PropagateAction::Drop => Vec::new(),
        }
    }
}

pub struct ColumnPropagation;

impl Propagating for ColumnPropagation {
    fn propagate_info(
        &self,
        _object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo> {
        use oxide_catalog_core::propagate::PropagateTarget::Singleton;
        match action {
            PropagateAction::Create => {
                vec![PropagateInfo::state_only(Singleton("DefaultConstraint"))]
            }
            PropagateAction::Alter | PropagateAction::CreateOrAlter => {
                vec![PropagateInfo::script(Singleton("DefaultConstraint"))]
            }
            PropagateAction::Drop => Vec::new(),
        }
    }
}

/// Stamps new tables the way a server assigns read-only values.
pub struct TableHooks;

impl LifecycleHooks for TableHooks {
    fn post_create(&self, object: &mut MetadataObject) {
        let _ = object.record_server_value("IsSystemObject", PropertyValue::Bool(false));
    }
}

pub fn registry() -> Arc<TypeRegistry> {
    let scripter = Arc::new(TestScripter);
    Arc::new(
        TypeRegistry::new("Server")
            .register(
                TypeDescriptor::new("Server", KeyKind::Simple).child("Database"),
            )
            .register(
                TypeDescriptor::new("Database", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("Collation", PropertyType::Text)
                            .read_only_after_creation()
                            .default_set(),
                        PropertyMetadata::new("Owner", PropertyType::Text),
                    ])
                    .child("Table")
                    .collation_property("Collation")
                    .owns_connection()
                    .scriptable(scripter.clone())
                    .droppable(scripter.clone()),
            )
            .register(
                TypeDescriptor::new("Table", KeyKind::Schema)
                    .properties(vec![
                        PropertyMetadata::new("CreateDate", PropertyType::DateTime)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("IsSystemObject", PropertyType::Bool)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("Description", PropertyType::Text),
                        PropertyMetadata::new("RowCount", PropertyType::BigInt)
                            .read_only()
                            .expensive(),
                        PropertyMetadata::new("Ledger", PropertyType::Bool)
                            .min_version(ServerVersion::new(16, 0, 0)),
                        PropertyMetadata::new("Notes", PropertyType::Text).design_time(),
                        PropertyMetadata::new("Owner", PropertyType::Text),
                    ])
                    .child("Column")
                    .child("Index")
                    .scriptable(scripter.clone())
                    .alterable(scripter.clone())
                    .droppable(scripter.clone())
                    .renamable(scripter.clone())
                    .propagating(Arc::new(TablePropagation))
                    .hooks(Arc::new(TableHooks)),
            )
            .register(
                TypeDescriptor::new("Column", KeyKind::Simple)
                    .order(CollectionOrder::ById)
                    .properties(vec![
                        PropertyMetadata::new("ID", PropertyType::Int)
                            .read_only()
                            .default_set(),
                        PropertyMetadata::new("DataType", PropertyType::Text).default_set(),
                        PropertyMetadata::new("Nullable", PropertyType::Bool).default_set(),
                        PropertyMetadata::new("Identity", PropertyType::Guid),
                    ])
                    .singleton("DefaultConstraint")
                    .scriptable(scripter.clone())
                    .alterable(scripter.clone())
                    .droppable(scripter.clone())
                    .renamable(scripter.clone())
                    .propagating(Arc::new(ColumnPropagation)),
            )
            .register(
                TypeDescriptor::new("DefaultConstraint", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("Text", PropertyType::Text).default_set(),
                    ])
                    .scriptable(scripter.clone())
                    .alterable(scripter.clone())
                    .droppable(scripter.clone()),
            )
            .register(
                TypeDescriptor::new("Index", KeyKind::Simple)
                    .properties(vec![
                        PropertyMetadata::new("FillFactor", PropertyType::Int).default_set(),
                        PropertyMetadata::new("IsClustered", PropertyType::Bool),
                        PropertyMetadata::new("SpaceUsed", PropertyType::Float)
                            .read_only()
                            .expensive(),
                        PropertyMetadata::new("IndexType", PropertyType::Enum)
                            .read_only_after_creation(),
                    ])
                    .scriptable(scripter.clone())
                    .alterable(scripter.clone())
                    .droppable(scripter),
            ),
    )
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn column(id: i32, name: &str, data_type: &str) -> Node {
    Node::new("Column")
        .field("ID", id)
        .field("Name", name)
        .field("DataType", data_type)
        .field("Nullable", false)
}

pub fn default_constraint(name: &str, text: &str) -> Node {
    Node::new("DefaultConstraint")
        .field("Name", name)
        .field("Text", text)
}

pub fn index(name: &str, fill_factor: i32) -> Node {
    Node::new("Index")
        .field("Name", name)
        .field("FillFactor", fill_factor)
        .field("IsClustered", false)
        .field("SpaceUsed", 1.5)
        .field("IndexType", 1)
}

pub fn table(schema: &str, name: &str) -> Node {
    Node::new("Table")
        .field("Schema", schema)
        .field("Name", name)
        .field("CreateDate", "2024-01-02 03:04:05")
        .field("IsSystemObject", false)
        .field("Description", format!("{name} table"))
        .field("Owner", "dbo")
        .field("RowCount", 42i64)
}

/// Server `mem` with database `main` holding three tables.
pub fn sample_server() -> Node {
    Node::new("Server").field("Name", "mem").child(
        Node::new("Database")
            .field("Name", "main")
            .field("Collation", "Latin1_General_CI_AS")
            .child(
                table("dbo", "orders")
                    .child(column(1, "id", "INTEGER"))
                    .child(column(2, "customer", "TEXT"))
                    .child(
                        column(3, "total", "REAL").child(default_constraint("DF_total", "0")),
                    )
                    .child(index("ix_customer", 80))
                    .child(index("pk_orders", 100)),
            )
            .child(
                table("dbo", "customers")
                    .child(column(1, "id", "INTEGER"))
                    .child(column(2, "name", "TEXT")),
            )
            .child(table("sales", "audit").child(column(1, "at", "TEXT"))),
    )
}

pub fn open_tree(root: Node) -> (ObjectTree, SharedState) {
    open_tree_with(root, |_| {})
}

pub fn open_tree_with(
    root: Node,
    configure: impl FnOnce(&mut ServerInfo),
) -> (ObjectTree, SharedState) {
    let (connection, state) = MemoryConnection::new(root);
    configure(&mut state.borrow_mut().info);
    let tree = ObjectTree::new(registry(), Box::new(connection)).expect("open tree");
    (tree, state)
}

pub fn database(tree: &mut ObjectTree) -> ObjectId {
    tree.child(tree.root(), "Database", &ObjectKey::simple("main"))
        .expect("lookup database")
        .expect("database exists")
}

pub fn table_id(tree: &mut ObjectTree, schema: &str, name: &str) -> ObjectId {
    let db = database(tree);
    tree.child(db, "Table", &ObjectKey::schema(schema, name))
        .expect("lookup table")
        .expect("table exists")
}

pub fn names(tree: &ObjectTree, ids: &[ObjectId]) -> Vec<String> {
    ids.iter()
        .map(|id| tree.view(*id).expect("view").name().to_string())
        .collect()
}
