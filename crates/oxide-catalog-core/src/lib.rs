//! Client-side object model for relational database metadata.
//!
//! `oxide-catalog-core` mirrors server objects (databases, tables, columns,
//! indexes, ...) as an in-memory tree, loads their properties lazily,
//! tracks local edits and turns them into DDL:
//!
//! - **Lifecycle** - every object is pending, creating, existing, marked for
//!   drop or dropped; each verb is validated against that state
//! - **Property bag** - values with dirty/retrieved flags, fetched on first
//!   read in growing batches
//! - **Bulk initializer** - populates whole subtrees with one sorted query,
//!   merged into the sorted collections
//! - **Propagation** - create/alter/drop cascade to dependents in two
//!   phases: render and execute first, commit state only on success
//!
//! Server access goes through the [`Connection`](provider::Connection)
//! trait; per-type scripting through the capability traits in
//! [`registry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_catalog_core::prelude::*;
//!
//! let mut tree = ObjectTree::new(registry, Box::new(connection))?;
//! let database = tree.child(tree.root(), "Database", &ObjectKey::simple("main"))?.unwrap();
//!
//! let table = tree.new_child(database, "Table", ObjectKey::schema("main", "users"))?;
//! let id = tree.new_child(table, "Column", ObjectKey::simple("id"))?;
//! tree.set_property(id, "DataType", "INTEGER")?;
//! tree.create(table)?;
//!
//! for index in tree.children(table, "Index")? {
//!     println!("{}", tree.urn(index)?);
//! }
//! ```

pub mod bulk;
pub mod collation;
pub mod collection;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod init;
pub mod key;
mod lifecycle;
pub mod object;
pub mod preferences;
pub mod propagate;
pub mod property;
pub mod provider;
pub mod registry;
pub mod state;
pub mod tree;
pub mod urn;
pub mod value;
mod verbs;
pub mod view;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::bulk::{InitOptions, InitResult};
    pub use crate::collation::Collation;
    pub use crate::discovery::ObjectSnapshot;
    pub use crate::error::CatalogError;
    pub use crate::execution::{ExecutionManager, ScriptBatch};
    pub use crate::init::FetchOutcome;
    pub use crate::key::{KeyKind, ObjectKey};
    pub use crate::object::{MetadataObject, ObjectId};
    pub use crate::preferences::{ExecutionMode, ScriptingPreferences};
    pub use crate::propagate::{PropagateAction, PropagateInfo, PropagateMode, PropagateTarget};
    pub use crate::property::{BagState, PropertyAccess, PropertyMetadata};
    pub use crate::provider::{
        Connection, DataReader, EngineEdition, EngineType, ExecutionError, LevelFields,
        MetadataProvider, OrderBy, Request, Row, ServerInfo, ServerVersion, VecReader,
    };
    pub use crate::registry::{
        Alterable, CollectionOrder, Droppable, LifecycleHooks, Propagating, Renamable,
        Scriptable, TypeDescriptor, TypeRegistry,
    };
    pub use crate::state::{ObjectState, Verb};
    pub use crate::tree::ObjectTree;
    pub use crate::urn::{Condition, FilterValue, Urn, UrnSegment, UrnSuffix};
    pub use crate::value::{PropertyType, PropertyValue};
    pub use crate::view::ObjectView;
}
