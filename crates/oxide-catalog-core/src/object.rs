//! Metadata objects stored in the tree arena.

use std::fmt;

use serde::Serialize;

use crate::collection::Collection;
use crate::error::Result;
use crate::key::{ID_FIELD, ObjectKey};
use crate::property::PropertyBag;
use crate::registry::TypeDescriptor;
use crate::state::ObjectState;
use crate::value::PropertyValue;

/// Stable handle of an object within one [`ObjectTree`](crate::tree::ObjectTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjectId(u32);

impl ObjectId {
    /// Creates a handle from an arena index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Back-reference from a child to the collection holding it. Used for
/// navigation only; ownership flows from parent to child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParentLink {
    /// Parent object.
    pub object: ObjectId,
    /// Index of the collection within the parent.
    pub slot: usize,
}

/// A client-side mirror of one server object.
#[derive(Debug, Clone)]
pub struct MetadataObject {
    type_name: &'static str,
    key: Option<ObjectKey>,
    state: ObjectState,
    parent: Option<ParentLink>,
    bag: PropertyBag,
    touched: bool,
    initialized_for_scripting: bool,
    collections: Vec<Collection>,
}

impl MetadataObject {
    /// Creates an object of the described type. Child collections start
    /// initialized for objects that do not exist on the server yet.
    pub(crate) fn new(
        descriptor: &TypeDescriptor,
        key: Option<ObjectKey>,
        state: ObjectState,
    ) -> Self {
        let complete = !state.is_persisted();
        let collections = descriptor
            .children()
            .iter()
            .map(|c| Collection::new(c.child_type, c.singleton, complete))
            .collect();
        Self {
            type_name: descriptor.name(),
            key,
            state,
            parent: None,
            bag: PropertyBag::new(descriptor.name(), descriptor.property_table().clone()),
            touched: false,
            initialized_for_scripting: false,
            collections,
        }
    }

    /// Returns the type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the key.
    #[must_use]
    pub const fn key(&self) -> Option<&ObjectKey> {
        self.key.as_ref()
    }

    /// Returns the display name used in messages.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.key
            .as_ref()
            .map_or_else(|| "<unnamed>".to_string(), ObjectKey::exception_name)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ObjectState {
        self.state
    }

    /// Returns the parent link.
    #[must_use]
    pub const fn parent(&self) -> Option<ParentLink> {
        self.parent
    }

    /// Returns the property bag.
    #[must_use]
    pub const fn bag(&self) -> &PropertyBag {
        &self.bag
    }

    /// Returns true if the object must be re-scripted regardless of dirty
    /// properties.
    #[must_use]
    pub const fn is_touched(&self) -> bool {
        self.touched
    }

    /// Returns true if the bulk initializer loaded scripting fields.
    #[must_use]
    pub const fn is_initialized_for_scripting(&self) -> bool {
        self.initialized_for_scripting
    }

    /// Returns the child collections in declaration order.
    #[must_use]
    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    /// Returns true if the object or its local edits need scripting.
    #[must_use]
    pub fn needs_alter(&self) -> bool {
        self.touched || self.bag.is_dirty()
    }

    /// Returns the numeric identifier from the key or the `ID` property.
    #[must_use]
    pub fn numeric_id(&self) -> Option<i64> {
        self.key
            .as_ref()
            .and_then(ObjectKey::id_value)
            .or_else(|| self.bag.get(ID_FIELD).and_then(PropertyValue::as_i64))
    }

    /// Stores a value the server assigned, for example an identifier
    /// returned by a create. Used by lifecycle hooks.
    pub fn record_server_value(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        self.bag.set_retrieved(name, value)
    }

    /// Sets or clears a property's dirty flag.
    pub fn set_dirty(&mut self, name: &str, dirty: bool) -> Result<()> {
        self.bag.set_dirty(name, dirty)
    }

    pub(crate) const fn bag_mut(&mut self) -> &mut PropertyBag {
        &mut self.bag
    }

    pub(crate) const fn set_state(&mut self, state: ObjectState) {
        self.state = state;
    }

    pub(crate) fn set_key(&mut self, key: Option<ObjectKey>) {
        self.key = key;
    }

    pub(crate) const fn set_parent(&mut self, parent: Option<ParentLink>) {
        self.parent = parent;
    }

    pub(crate) const fn set_touched(&mut self, touched: bool) {
        self.touched = touched;
    }

    pub(crate) const fn set_initialized_for_scripting(&mut self, value: bool) {
        self.initialized_for_scripting = value;
    }

    pub(crate) fn collection_mut(&mut self, slot: usize) -> Option<&mut Collection> {
        self.collections.get_mut(slot)
    }

    pub(crate) fn collections_mut(&mut self) -> &mut [Collection] {
        &mut self.collections
    }

    /// Accepts local edits as persisted.
    pub(crate) fn clean(&mut self) {
        self.bag.clean();
        self.touched = false;
    }
}
