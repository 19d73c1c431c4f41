//! Read-only object access for scripters and propagation handlers.
//!
//! A view only exposes values already held in memory. Verbs prefetch what
//! scripting needs before handing out views, so rendering never performs
//! I/O.

use crate::error::Result;
use crate::key::ObjectKey;
use crate::object::{MetadataObject, ObjectId};
use crate::state::ObjectState;
use crate::tree::ObjectTree;
use crate::urn::Urn;
use crate::value::PropertyValue;

/// Borrowed view of one object.
#[derive(Clone, Copy)]
pub struct ObjectView<'a> {
    tree: &'a ObjectTree,
    id: ObjectId,
}

impl<'a> ObjectView<'a> {
    pub(crate) const fn new(tree: &'a ObjectTree, id: ObjectId) -> Self {
        Self { tree, id }
    }

    /// Returns the object handle.
    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// Returns the underlying object.
    #[must_use]
    pub fn object(&self) -> &'a MetadataObject {
        self.tree.obj(self.id)
    }

    /// Returns the type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.object().type_name()
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> Option<&'a ObjectKey> {
        self.object().key()
    }

    /// Returns the object name, empty when no key is set.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.key().map_or("", ObjectKey::name)
    }

    /// Returns the schema of schema-qualified objects.
    #[must_use]
    pub fn schema(&self) -> Option<&'a str> {
        self.key().and_then(ObjectKey::schema_name)
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> ObjectState {
        self.object().state()
    }

    /// Returns a key field or an available property value.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<PropertyValue> {
        self.key()
            .and_then(|k| k.field_value(name))
            .or_else(|| self.object().bag().get(name).cloned())
    }

    /// Returns a text property.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<&'a str> {
        self.object()
            .bag()
            .get(name)
            .and_then(PropertyValue::as_str)
    }

    /// Returns a boolean property.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.object()
            .bag()
            .get(name)
            .and_then(PropertyValue::as_bool)
    }

    /// Returns an integer property.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.object()
            .bag()
            .get(name)
            .and_then(PropertyValue::as_i64)
    }

    /// Returns true if the property was changed locally.
    #[must_use]
    pub fn is_dirty(&self, name: &str) -> bool {
        self.object().bag().is_property_dirty(name)
    }

    /// Returns the names of locally changed properties.
    #[must_use]
    pub fn dirty_names(&self) -> Vec<&'static str> {
        self.object().bag().dirty_names()
    }

    /// Returns the parent.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.object()
            .parent()
            .map(|link| Self::new(self.tree, link.object))
    }

    /// Returns the loaded members of a child collection.
    #[must_use]
    pub fn children(&self, child_type: &str) -> Vec<Self> {
        self.tree
            .loaded_members(self.id, child_type)
            .into_iter()
            .map(|id| Self::new(self.tree, id))
            .collect()
    }

    /// Returns the loaded singleton child.
    #[must_use]
    pub fn singleton(&self, child_type: &str) -> Option<Self> {
        self.children(child_type).into_iter().next()
    }

    /// Returns the object's path.
    pub fn urn(&self) -> Result<Urn> {
        self.tree.urn(self.id)
    }
}
