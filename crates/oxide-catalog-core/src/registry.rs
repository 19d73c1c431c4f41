//! Type registry and capability traits.
//!
//! Every object type is described once by a [`TypeDescriptor`]: its key
//! shape, collection ordering, property table, child collections and the
//! capability handlers that script it. The [`TypeRegistry`] owns the
//! descriptors plus small lookup caches derived from them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{CatalogError, Result};
use crate::execution::ScriptBatch;
use crate::key::{ID_FIELD, KeyKind};
use crate::object::MetadataObject;
use crate::preferences::ScriptingPreferences;
use crate::propagate::{PropagateAction, PropagateInfo};
use crate::property::PropertyMetadata;
use crate::provider::ServerVersion;
use crate::state::Verb;
use crate::view::ObjectView;

/// Renders creation statements.
pub trait Scriptable: Send + Sync {
    /// Appends the statements creating `object`.
    fn script_create(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()>;

    /// Appends a create-or-replace statement.
    fn script_create_or_alter(
        &self,
        object: &ObjectView<'_>,
        _preferences: &ScriptingPreferences,
        _batch: &mut ScriptBatch,
    ) -> Result<()> {
        Err(CatalogError::UnsupportedOperation {
            type_name: object.type_name().to_string(),
            verb: Verb::CreateOrAlter,
        })
    }

    /// First target version accepting create-or-alter.
    fn create_or_alter_min_version(&self) -> Option<ServerVersion> {
        None
    }
}

/// Renders statements applying dirty properties.
pub trait Alterable: Send + Sync {
    /// Appends the statements altering `object`.
    fn script_alter(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()>;
}

/// Renders drop statements.
pub trait Droppable: Send + Sync {
    /// Appends the statements dropping `object`.
    fn script_drop(
        &self,
        object: &ObjectView<'_>,
        preferences: &ScriptingPreferences,
        if_exists: bool,
        batch: &mut ScriptBatch,
    ) -> Result<()>;

    /// First target version accepting `DROP ... IF EXISTS`.
    fn drop_if_exists_min_version(&self) -> Option<ServerVersion> {
        Some(ServerVersion::new(13, 0, 0))
    }
}

/// Renders rename and ownership statements.
pub trait Renamable: Send + Sync {
    /// Appends the statements renaming `object` to `new_name`.
    fn script_rename(
        &self,
        object: &ObjectView<'_>,
        new_name: &str,
        preferences: &ScriptingPreferences,
        batch: &mut ScriptBatch,
    ) -> Result<()>;

    /// Appends the statements transferring ownership.
    fn script_change_owner(
        &self,
        object: &ObjectView<'_>,
        _owner: &str,
        _preferences: &ScriptingPreferences,
        _batch: &mut ScriptBatch,
    ) -> Result<()> {
        Err(CatalogError::UnsupportedOperation {
            type_name: object.type_name().to_string(),
            verb: Verb::ChangeOwner,
        })
    }
}

/// Declares which children follow a parent's verbs.
pub trait Propagating: Send + Sync {
    /// Returns the propagation targets for `action`, in script order.
    fn propagate_info(
        &self,
        object: &ObjectView<'_>,
        action: PropagateAction,
    ) -> Vec<PropagateInfo>;
}

/// Callbacks run after a state transition has been committed.
pub trait LifecycleHooks: Send + Sync {
    /// Runs after the object became existing.
    fn post_create(&self, _object: &mut MetadataObject) {}

    /// Runs after pending changes were applied.
    fn post_alter(&self, _object: &mut MetadataObject) {}

    /// Runs after the object was dropped.
    fn post_drop(&self, _object: &mut MetadataObject) {}
}

/// Capability handlers of a type. Missing handlers make the matching verb
/// fail before any I/O.
#[derive(Clone, Default)]
pub struct Handlers {
    /// Create handler.
    pub scriptable: Option<Arc<dyn Scriptable>>,
    /// Alter handler.
    pub alterable: Option<Arc<dyn Alterable>>,
    /// Drop handler.
    pub droppable: Option<Arc<dyn Droppable>>,
    /// Rename handler.
    pub renamable: Option<Arc<dyn Renamable>>,
    /// Propagation targets.
    pub propagating: Option<Arc<dyn Propagating>>,
    /// Lifecycle hooks.
    pub hooks: Option<Arc<dyn LifecycleHooks>>,
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("scriptable", &self.scriptable.is_some())
            .field("alterable", &self.alterable.is_some())
            .field("droppable", &self.droppable.is_some())
            .field("renamable", &self.renamable.is_some())
            .field("propagating", &self.propagating.is_some())
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Sort order of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionOrder {
    /// Name ascending.
    ByName,
    /// Numeric `ID` ascending; objects without one sort last.
    ById,
    /// Schema, then name.
    BySchemaName,
}

/// A child collection declared by a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildDeclaration {
    /// Child type.
    pub child_type: &'static str,
    /// Holds at most one object and skips key comparison.
    pub singleton: bool,
}

/// Static description of an object type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: &'static str,
    key_kind: KeyKind,
    order: CollectionOrder,
    properties: Arc<[PropertyMetadata]>,
    children: Vec<ChildDeclaration>,
    collation_property: Option<&'static str>,
    owns_connection: bool,
    handlers: Handlers,
}

impl TypeDescriptor {
    /// Creates a descriptor. The order follows the key kind until changed.
    #[must_use]
    pub fn new(name: &'static str, key_kind: KeyKind) -> Self {
        let order = match key_kind {
            KeyKind::Schema => CollectionOrder::BySchemaName,
            KeyKind::Id => CollectionOrder::ById,
            KeyKind::Simple => CollectionOrder::ByName,
        };
        Self {
            name,
            key_kind,
            order,
            properties: Arc::from(Vec::new()),
            children: Vec::new(),
            collation_property: None,
            owns_connection: false,
            handlers: Handlers::default(),
        }
    }

    /// Sets the collection order.
    #[must_use]
    pub const fn order(mut self, order: CollectionOrder) -> Self {
        self.order = order;
        self
    }

    /// Sets the property table.
    #[must_use]
    pub fn properties(mut self, properties: Vec<PropertyMetadata>) -> Self {
        self.properties = Arc::from(properties);
        self
    }

    /// Declares a child collection.
    #[must_use]
    pub fn child(mut self, child_type: &'static str) -> Self {
        self.children.push(ChildDeclaration {
            child_type,
            singleton: false,
        });
        self
    }

    /// Declares a singleton child.
    #[must_use]
    pub fn singleton(mut self, child_type: &'static str) -> Self {
        self.children.push(ChildDeclaration {
            child_type,
            singleton: true,
        });
        self
    }

    /// Names the property holding the collation inherited by descendants.
    #[must_use]
    pub const fn collation_property(mut self, property: &'static str) -> Self {
        self.collation_property = Some(property);
        self
    }

    /// Marks the type as the context the connection is bound to.
    #[must_use]
    pub const fn owns_connection(mut self) -> Self {
        self.owns_connection = true;
        self
    }

    /// Sets the create handler.
    #[must_use]
    pub fn scriptable(mut self, handler: Arc<dyn Scriptable>) -> Self {
        self.handlers.scriptable = Some(handler);
        self
    }

    /// Sets the alter handler.
    #[must_use]
    pub fn alterable(mut self, handler: Arc<dyn Alterable>) -> Self {
        self.handlers.alterable = Some(handler);
        self
    }

    /// Sets the drop handler.
    #[must_use]
    pub fn droppable(mut self, handler: Arc<dyn Droppable>) -> Self {
        self.handlers.droppable = Some(handler);
        self
    }

    /// Sets the rename handler.
    #[must_use]
    pub fn renamable(mut self, handler: Arc<dyn Renamable>) -> Self {
        self.handlers.renamable = Some(handler);
        self
    }

    /// Sets the propagation handler.
    #[must_use]
    pub fn propagating(mut self, handler: Arc<dyn Propagating>) -> Self {
        self.handlers.propagating = Some(handler);
        self
    }

    /// Sets the lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, handler: Arc<dyn LifecycleHooks>) -> Self {
        self.handlers.hooks = Some(handler);
        self
    }

    /// Returns the type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the key kind.
    #[must_use]
    pub const fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    /// Returns the collection order.
    #[must_use]
    pub const fn collection_order(&self) -> CollectionOrder {
        self.order
    }

    /// Returns the property table.
    #[must_use]
    pub const fn property_table(&self) -> &Arc<[PropertyMetadata]> {
        &self.properties
    }

    /// Returns the property table as a slice.
    #[must_use]
    pub fn property_list(&self) -> &[PropertyMetadata] {
        &self.properties
    }

    /// Returns the metadata of one property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns the declared children.
    #[must_use]
    pub fn children(&self) -> &[ChildDeclaration] {
        &self.children
    }

    /// Returns the collation property, if any.
    #[must_use]
    pub const fn collation(&self) -> Option<&'static str> {
        self.collation_property
    }

    /// Returns true if the connection is bound to objects of this type.
    #[must_use]
    pub const fn is_connection_owner(&self) -> bool {
        self.owns_connection
    }

    /// Returns the capability handlers.
    #[must_use]
    pub const fn handlers(&self) -> &Handlers {
        &self.handlers
    }
}

type SlotCache = RwLock<HashMap<(&'static str, String), Option<usize>>>;
type FieldCache = RwLock<HashMap<&'static str, Vec<&'static str>>>;

/// Registered types plus derived lookup tables.
///
/// The caches are filled on first use and never invalidated: descriptors
/// are immutable once registered.
#[derive(Debug)]
pub struct TypeRegistry {
    root_type: &'static str,
    types: HashMap<&'static str, TypeDescriptor>,
    child_slots: SlotCache,
    key_fields: FieldCache,
    order_fields: FieldCache,
}

impl TypeRegistry {
    /// Creates a registry whose root object has type `root_type`.
    #[must_use]
    pub fn new(root_type: &'static str) -> Self {
        Self {
            root_type,
            types: HashMap::new(),
            child_slots: RwLock::new(HashMap::new()),
            key_fields: RwLock::new(HashMap::new()),
            order_fields: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a descriptor.
    #[must_use]
    pub fn register(mut self, descriptor: TypeDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Registers a descriptor, replacing one with the same name.
    pub fn insert(&mut self, descriptor: TypeDescriptor) {
        self.types.insert(descriptor.name, descriptor);
    }

    /// Returns the root type.
    #[must_use]
    pub const fn root_type(&self) -> &'static str {
        self.root_type
    }

    /// Returns a descriptor.
    pub fn get(&self, type_name: &str) -> Result<&TypeDescriptor> {
        self.types
            .get(type_name)
            .ok_or_else(|| CatalogError::UnknownType(type_name.to_string()))
    }

    /// Returns the index of the collection holding `child_type` objects
    /// under a `parent_type` object.
    pub fn child_slot(&self, parent_type: &str, child_type: &str) -> Result<usize> {
        let parent = self.get(parent_type)?;
        let cache_key = (parent.name, child_type.to_string());
        let cached = self
            .child_slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&cache_key)
            .copied();
        let slot = if let Some(slot) = cached {
            slot
        } else {
            let slot = parent
                .children
                .iter()
                .position(|c| c.child_type == child_type);
            self.child_slots
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(cache_key, slot);
            slot
        };
        slot.ok_or_else(|| {
            CatalogError::UnknownType(format!("{parent_type}/{child_type}"))
        })
    }

    /// Returns the key fields of a type.
    pub fn key_fields(&self, type_name: &str) -> Result<Vec<&'static str>> {
        let descriptor = self.get(type_name)?;
        Ok(Self::cached(&self.key_fields, descriptor.name, || {
            descriptor.key_kind.field_names().to_vec()
        }))
    }

    /// Returns the fields a query must sort by to match the in-memory
    /// order of a type's collections.
    pub fn order_fields(&self, type_name: &str) -> Result<Vec<&'static str>> {
        let descriptor = self.get(type_name)?;
        Ok(Self::cached(&self.order_fields, descriptor.name, || {
            let key_fields = descriptor.key_kind.field_names();
            match descriptor.order {
                CollectionOrder::ById => std::iter::once(ID_FIELD)
                    .chain(key_fields.iter().copied().filter(|f| *f != ID_FIELD))
                    .collect(),
                CollectionOrder::ByName | CollectionOrder::BySchemaName => key_fields.to_vec(),
            }
        }))
    }

    fn cached(
        cache: &FieldCache,
        type_name: &'static str,
        compute: impl FnOnce() -> Vec<&'static str>,
    ) -> Vec<&'static str> {
        if let Some(fields) = cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(type_name)
        {
            return fields.clone();
        }
        let fields = compute();
        cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(type_name)
            .or_insert_with(|| fields.clone());
        fields
    }
}
