//! SQLite backend for `oxide-catalog-core`.
//!
//! Provides the [`Connection`](oxide_catalog_core::provider::Connection)
//! implementation over sqlx, the enumerator that turns bulk requests into
//! `pragma_*` queries, and the SQLite object model with its DDL scripter.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_catalog_sqlite::prelude::*;
//!
//! let mut tree = open_tree("sqlite:app.db?mode=rwc")?;
//! let main = tree.child(tree.root(), "Database", &ObjectKey::simple("main"))?.unwrap();
//! for table in tree.children(main, "Table")? {
//!     println!("{}", tree.urn(table)?);
//! }
//! ```

pub mod connection;
pub mod enumerator;
pub mod error;
pub mod model;

use oxide_catalog_core::tree::ObjectTree;

use crate::connection::SqliteConnection;
use crate::error::Result;

/// Opens an object tree over the database at `url`.
pub fn open_tree(url: &str) -> Result<ObjectTree> {
    let connection = SqliteConnection::connect(url)?;
    Ok(ObjectTree::new(model::registry(), Box::new(connection))?)
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::connection::{DEFAULT_SERVER_NAME, SqliteConnection};
    pub use crate::error::SqliteCatalogError;
    pub use crate::model::{ColumnScripter, IndexScripter, TableScripter, registry};
    pub use crate::open_tree;
    pub use oxide_catalog_core::prelude::*;
}
