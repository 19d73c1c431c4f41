#![allow(dead_code)]

use oxide_catalog_sqlite::prelude::*;
use tempfile::TempDir;

/// Schema every test starts from.
pub const SEED: &[&str] = &[
    concat!(
        "CREATE TABLE customers ",
        "(id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT DEFAULT 'none')"
    ),
    concat!(
        "CREATE TABLE orders ",
        "(id INTEGER PRIMARY KEY, customer_id INTEGER NOT NULL, total REAL DEFAULT 0)"
    ),
    "CREATE INDEX ix_orders_customer ON orders (customer_id DESC)",
    "CREATE UNIQUE INDEX ux_customers_email ON customers (email)",
];

/// An on-disk database that lives as long as the fixture.
pub struct Fixture {
    pub dir: TempDir,
    pub url: String,
}

impl Fixture {
    /// Creates a database holding [`SEED`].
    pub fn seeded() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("catalog.db");
        let url = format!("sqlite:{}?mode=rwc", path.display());
        let mut connection = SqliteConnection::connect(&url).expect("connect");
        let statements: Vec<String> = SEED.iter().map(ToString::to_string).collect();
        connection.execute_non_query(&statements).expect("seed");
        Self { dir, url }
    }

    /// Opens a fresh tree, with nothing loaded.
    pub fn tree(&self) -> ObjectTree {
        open_tree(&self.url).expect("open tree")
    }
}

pub fn main_database(tree: &mut ObjectTree) -> ObjectId {
    tree.child(tree.root(), "Database", &ObjectKey::simple("main"))
        .expect("lookup")
        .expect("main database")
}

pub fn table(tree: &mut ObjectTree, name: &str) -> ObjectId {
    let database = main_database(tree);
    tree.child(database, "Table", &ObjectKey::schema("main", name))
        .expect("lookup")
        .unwrap_or_else(|| panic!("table {name}"))
}

pub fn names(tree: &ObjectTree, ids: &[ObjectId]) -> Vec<String> {
    ids.iter()
        .map(|id| tree.view(*id).expect("view").name().to_string())
        .collect()
}

/// Table names of `main`, read through a new tree.
pub fn table_names(fixture: &Fixture) -> Vec<String> {
    let mut tree = fixture.tree();
    let database = main_database(&mut tree);
    let tables = tree.children(database, "Table").expect("tables");
    names(&tree, &tables)
}

/// Column names of a table, read through a new tree.
pub fn column_names(fixture: &Fixture, name: &str) -> Vec<String> {
    let mut tree = fixture.tree();
    let id = table(&mut tree, name);
    let columns = tree.children(id, "Column").expect("columns");
    names(&tree, &columns)
}
