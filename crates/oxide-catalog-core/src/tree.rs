//! The object tree: an arena of metadata objects rooted at the server.
//!
//! Objects are addressed by [`ObjectId`]. Parents own their children
//! through [`Collection`]s; children point back to their parent with a
//! [`ParentLink`] used for navigation and path computation only. Objects
//! are never freed: dropped or detached objects stay addressable so
//! handles held by callers remain valid.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info};

use crate::collation::Collation;
use crate::collection::Collection;
use crate::error::{CatalogError, Result};
use crate::execution::ExecutionManager;
use crate::key::ObjectKey;
use crate::object::{MetadataObject, ObjectId, ParentLink};
use crate::preferences::ExecutionMode;
use crate::provider::{Connection, DescriptorMetadataProvider, MetadataProvider, ServerInfo};
use crate::registry::{CollectionOrder, TypeDescriptor, TypeRegistry};
use crate::state::{ObjectState, Verb};
use crate::urn::{Urn, UrnSegment};
use crate::value::PropertyValue;
use crate::view::ObjectView;

/// Client-side mirror of a server's metadata.
pub struct ObjectTree {
    objects: Vec<MetadataObject>,
    root: ObjectId,
    registry: Arc<TypeRegistry>,
    metadata: Box<dyn MetadataProvider>,
    pub(crate) execution: ExecutionManager,
}

impl ObjectTree {
    /// Opens a tree on a connection. The root object represents the server
    /// and is keyed by the server name.
    pub fn new(registry: Arc<TypeRegistry>, connection: Box<dyn Connection>) -> Result<Self> {
        let execution = ExecutionManager::new(connection)?;
        let descriptor = registry.get(registry.root_type())?;
        let key = ObjectKey::simple(execution.server_info().name.clone());
        let root = MetadataObject::new(descriptor, Some(key), ObjectState::Existing);
        let metadata = Box::new(DescriptorMetadataProvider::new(Arc::clone(&registry)));
        info!(
            server = %execution.server_info().name,
            version = %execution.server_info().version,
            "Opened object tree"
        );
        Ok(Self {
            objects: vec![root],
            root: ObjectId::new(0),
            registry,
            metadata,
            execution,
        })
    }

    /// Replaces the metadata provider.
    #[must_use]
    pub fn with_metadata_provider(mut self, provider: Box<dyn MetadataProvider>) -> Self {
        self.metadata = provider;
        self
    }

    /// Returns the root object.
    #[must_use]
    pub const fn root(&self) -> ObjectId {
        self.root
    }

    /// Returns the type registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Returns the metadata provider.
    #[must_use]
    pub fn metadata_provider(&self) -> &dyn MetadataProvider {
        self.metadata.as_ref()
    }

    /// Returns the connected server.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        self.execution.server_info()
    }

    /// Returns the execution manager.
    #[must_use]
    pub const fn execution(&self) -> &ExecutionManager {
        &self.execution
    }

    /// Returns the execution manager mutably, e.g. to take captured SQL.
    pub const fn execution_mut(&mut self) -> &mut ExecutionManager {
        &mut self.execution
    }

    /// Switches between executing and recording.
    pub fn set_execution_mode(&mut self, mode: ExecutionMode) {
        self.execution.set_mode(mode);
    }

    /// Returns an object.
    pub fn object(&self, id: ObjectId) -> Result<&MetadataObject> {
        self.objects.get(id.index()).ok_or_else(|| {
            CatalogError::Internal(format!("unknown object handle {id}"))
        })
    }

    /// Returns a read-only view of an object.
    pub fn view(&self, id: ObjectId) -> Result<ObjectView<'_>> {
        self.check_id(id)?;
        Ok(ObjectView::new(self, id))
    }

    /// Returns the lifecycle state of an object.
    pub fn state(&self, id: ObjectId) -> Result<ObjectState> {
        self.object(id).map(MetadataObject::state)
    }

    /// Returns the parent of an object.
    pub fn parent_of(&self, id: ObjectId) -> Result<Option<ObjectId>> {
        Ok(self.object(id)?.parent().map(|link| link.object))
    }

    pub(crate) fn check_id(&self, id: ObjectId) -> Result<()> {
        self.object(id).map(|_| ())
    }

    /// Returns an object known to exist. Handles come from this arena and
    /// are validated at every public entry point.
    pub(crate) fn obj(&self, id: ObjectId) -> &MetadataObject {
        &self.objects[id.index()]
    }

    pub(crate) fn obj_mut(&mut self, id: ObjectId) -> &mut MetadataObject {
        &mut self.objects[id.index()]
    }

    pub(crate) fn descriptor(&self, id: ObjectId) -> Result<&TypeDescriptor> {
        self.registry.get(self.obj(id).type_name())
    }

    /// Returns the path of an object as a display label.
    pub(crate) fn label(&self, id: ObjectId) -> String {
        self.urn(id)
            .map_or_else(|_| self.obj(id).display_name(), |urn| urn.to_string())
    }

    fn alloc(&mut self, object: MetadataObject) -> Result<ObjectId> {
        let index = u32::try_from(self.objects.len()).map_err(|_| {
            CatalogError::Internal("object arena is full".to_string())
        })?;
        self.objects.push(object);
        Ok(ObjectId::new(index))
    }

    pub(crate) fn collection(&self, link: ParentLink) -> Result<&Collection> {
        self.obj(link.object)
            .collections()
            .get(link.slot)
            .ok_or_else(|| {
                CatalogError::Internal(format!("no collection {} on {}", link.slot, link.object))
            })
    }

    pub(crate) fn collection_mut(&mut self, link: ParentLink) -> Result<&mut Collection> {
        self.obj_mut(link.object)
            .collection_mut(link.slot)
            .ok_or_else(|| {
                CatalogError::Internal(format!("no collection {} on {}", link.slot, link.object))
            })
    }

    pub(crate) fn link_for(&self, parent: ObjectId, child_type: &str) -> Result<ParentLink> {
        let slot = self
            .registry
            .child_slot(self.obj(parent).type_name(), child_type)?;
        Ok(ParentLink {
            object: parent,
            slot,
        })
    }

    /// Creates a detached object. It stays pending until both a key and a
    /// parent are set.
    pub fn new_in_space(&mut self, type_name: &str) -> Result<ObjectId> {
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.get(type_name)?;
        let id = self.alloc(MetadataObject::new(descriptor, None, ObjectState::Pending))?;
        debug!(
            type_name = descriptor.name(),
            id = %id,
            "Created pending object"
        );
        Ok(id)
    }

    /// Creates an object directly inside a parent's collection, ready to
    /// be created on the server.
    pub fn new_child(
        &mut self,
        parent: ObjectId,
        child_type: &str,
        key: ObjectKey,
    ) -> Result<ObjectId> {
        let id = self.new_in_space(child_type)?;
        self.set_parent(id, parent)?;
        self.set_key(id, key)?;
        Ok(id)
    }

    /// Assigns the key of a pending object.
    pub fn set_key(&mut self, id: ObjectId, key: ObjectKey) -> Result<()> {
        self.check_object_state(id, Verb::SetKey)?;
        let descriptor = self.descriptor(id)?;
        if key.kind() != descriptor.key_kind() {
            return Err(CatalogError::InvalidKey {
                type_name: descriptor.name().to_string(),
                reason: format!(
                    "expected a {:?} key, got {:?}",
                    descriptor.key_kind(),
                    key.kind()
                ),
            });
        }
        key.validate().map_err(|reason| CatalogError::InvalidKey {
            type_name: descriptor.name().to_string(),
            reason,
        })?;
        let previous = self.obj(id).key().cloned();
        self.obj_mut(id).set_key(Some(key));
        if let Err(e) = self.update_object_state(id) {
            self.obj_mut(id).set_key(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Assigns the parent of a pending object.
    pub fn set_parent(&mut self, id: ObjectId, parent: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::SetParent)?;
        self.check_id(parent)?;
        let parent_object = self.obj(parent);
        if parent_object.state() == ObjectState::Dropped {
            return Err(CatalogError::ObjectDropped {
                type_name: parent_object.type_name().to_string(),
                name: parent_object.display_name(),
            });
        }
        let link = self.link_for(parent, self.obj(id).type_name())?;
        let previous = self.obj(id).parent();
        self.obj_mut(id).set_parent(Some(link));
        if let Err(e) = self.update_object_state(id) {
            self.obj_mut(id).set_parent(previous);
            return Err(e);
        }
        Ok(())
    }

    /// Moves a pending object to creating once it has both a key and a
    /// parent, inserting it into the parent's collection.
    fn update_object_state(&mut self, id: ObjectId) -> Result<()> {
        let object = self.obj(id);
        if object.state() != ObjectState::Pending {
            return Ok(());
        }
        let (Some(key), Some(link)) = (object.key().cloned(), object.parent()) else {
            return Ok(());
        };
        let type_name = object.type_name();
        let duplicate = if self.collection(link)?.is_singleton() {
            self.singleton(link.object, type_name)?.is_some()
        } else {
            self.child(link.object, type_name, &key)?.is_some()
        };
        if duplicate {
            return Err(CatalogError::DuplicateObject {
                type_name: type_name.to_string(),
                name: key.exception_name(),
            });
        }
        self.obj_mut(id).set_state(ObjectState::Creating);
        self.insert_sorted(link, id)?;
        debug!(
            type_name,
            key = %key,
            parent = %link.object,
            "Object attached, now creating"
        );
        Ok(())
    }

    /// Detaches a not yet created object from its collection. The object
    /// returns to the pending state and may be attached again.
    pub fn remove_child(&mut self, id: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::Remove)?;
        if let Some(link) = self.obj(id).parent() {
            self.collection_mut(link)?.remove(id);
        }
        let object = self.obj_mut(id);
        object.set_parent(None);
        object.set_state(ObjectState::Pending);
        Ok(())
    }

    /// Looks up a child by key.
    ///
    /// When the collection is not fully loaded and the parent exists on the
    /// server, the server is queried and a found object is added.
    pub fn child(
        &mut self,
        parent: ObjectId,
        child_type: &str,
        key: &ObjectKey,
    ) -> Result<Option<ObjectId>> {
        self.check_id(parent)?;
        let link = self.link_for(parent, child_type)?;
        let collation = self.comparer(parent)?;
        if let Some(found) = self.find_member(link, key, &collation)? {
            return Ok(Some(found));
        }
        if self.obj(parent).state().is_persisted() && !self.collection(link)?.is_initialized() {
            return self.initialize_child_object(parent, child_type, key);
        }
        Ok(None)
    }

    pub(crate) fn find_member(
        &self,
        link: ParentLink,
        key: &ObjectKey,
        collation: &Collation,
    ) -> Result<Option<ObjectId>> {
        Ok(self
            .collection(link)?
            .members()
            .iter()
            .copied()
            .find(|m| {
                self.obj(*m)
                    .key()
                    .is_some_and(|k| k.eq_with(key, collation))
            }))
    }

    /// Returns every member of a child collection, loading it from the
    /// server on first enumeration.
    pub fn children(&mut self, parent: ObjectId, child_type: &str) -> Result<Vec<ObjectId>> {
        self.check_id(parent)?;
        let link = self.link_for(parent, child_type)?;
        if self.obj(parent).state().is_persisted() && !self.collection(link)?.is_initialized() {
            self.initialize_collection(parent, child_type, Vec::new(), &[])?;
        }
        Ok(self.collection(link)?.members().to_vec())
    }

    /// Returns a singleton child, loading it on first access.
    pub fn singleton(&mut self, parent: ObjectId, child_type: &str) -> Result<Option<ObjectId>> {
        Ok(self.children(parent, child_type)?.first().copied())
    }

    /// Returns the child whose numeric identifier is `id`.
    pub fn item_by_id(
        &mut self,
        parent: ObjectId,
        child_type: &str,
        id: i64,
    ) -> Result<Option<ObjectId>> {
        let members = self.children(parent, child_type)?;
        Ok(members
            .into_iter()
            .find(|m| self.obj(*m).numeric_id() == Some(id)))
    }

    /// Returns the members loaded so far, without any I/O.
    #[must_use]
    pub fn loaded_members(&self, parent: ObjectId, child_type: &str) -> Vec<ObjectId> {
        if self.check_id(parent).is_err() {
            return Vec::new();
        }
        self.link_for(parent, child_type)
            .and_then(|link| self.collection(link).map(|c| c.members().to_vec()))
            .unwrap_or_default()
    }

    /// Computes the path of an object from its key chain.
    pub fn urn(&self, id: ObjectId) -> Result<Urn> {
        self.check_id(id)?;
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(cursor) = current {
            let object = self.obj(cursor);
            segments.push(UrnSegment::filtered(
                object.type_name(),
                object.key().map(ObjectKey::conditions).unwrap_or_default(),
            ));
            current = object.parent().map(|link| link.object);
        }
        segments.reverse();
        Ok(Urn::new(segments))
    }

    /// Resolves an absolute path, loading objects as needed.
    pub fn find_by_urn(&mut self, urn: &Urn) -> Result<Option<ObjectId>> {
        let invalid = |reason: &str| CatalogError::InvalidUrn {
            urn: urn.to_string(),
            reason: reason.to_string(),
        };
        let mut segments = urn.segments().iter();
        let first = segments.next().ok_or_else(|| invalid("empty path"))?;
        if first.type_name != self.registry.root_type() {
            return Err(invalid("path does not start at the root type"));
        }
        let root_collation = Collation::parse(&self.server_info().collation);
        if let Some(condition) = first.condition(crate::key::NAME_FIELD) {
            let name = PropertyValue::from(self.server_info().name.as_str());
            if !condition.matches(Some(&name), &root_collation) {
                return Ok(None);
            }
        }
        let mut current = self.root;
        for segment in segments {
            let link = self.link_for(current, &segment.type_name)?;
            let next = if self.collection(link)?.is_singleton() {
                self.singleton(current, &segment.type_name)?
            } else {
                let kind = self.registry.get(&segment.type_name)?.key_kind();
                let key = ObjectKey::from_conditions(kind, &segment.predicate).ok_or_else(|| {
                    invalid(&format!("segment '{segment}' does not identify an object"))
                })?;
                self.child(current, &segment.type_name, &key)?
            };
            match next {
                Some(id) => current = id,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Returns the collation governing the children of `id`, fetching the
    /// collation property of ancestors when needed.
    pub fn comparer(&mut self, id: ObjectId) -> Result<Collation> {
        self.check_id(id)?;
        let mut current = Some(id);
        while let Some(cursor) = current {
            if let Some(property) = self.descriptor(cursor)?.collation() {
                let value = if self.obj(cursor).state().is_persisted() {
                    self.property_or_null(cursor, property)?
                } else {
                    self.obj(cursor)
                        .bag()
                        .get(property)
                        .cloned()
                        .unwrap_or(PropertyValue::Null)
                };
                if let PropertyValue::Text(name) = value
                    && !name.is_empty()
                {
                    return Ok(Collation::parse(&name));
                }
            }
            current = self.obj(cursor).parent().map(|link| link.object);
        }
        Ok(Collation::parse(&self.server_info().collation))
    }

    /// Returns the collation governing the children of `id` using only
    /// values already loaded.
    #[must_use]
    pub fn comparer_no_fetch(&self, id: ObjectId) -> Collation {
        let mut current = Some(id);
        while let Some(cursor) = current {
            let object = self.obj(cursor);
            let descriptor = self.descriptor(cursor).ok();
            if let Some(property) = descriptor.and_then(TypeDescriptor::collation)
                && let Some(PropertyValue::Text(name)) = object.bag().get(property)
                && !name.is_empty()
            {
                return Collation::parse(name);
            }
            current = object.parent().map(|link| link.object);
        }
        Collation::parse(&self.server_info().collation)
    }

    /// Inserts a member at its sorted position.
    pub(crate) fn insert_sorted(&mut self, link: ParentLink, id: ObjectId) -> Result<usize> {
        let collation = self.comparer_no_fetch(link.object);
        let order = self.registry.get(self.obj(id).type_name())?.collection_order();
        let object = self.obj(id);
        let key = object.key().ok_or_else(|| {
            CatalogError::Internal("cannot sort an object without a key".to_string())
        })?;
        let numeric_id = object.numeric_id();
        let position = self.collection(link)?.members().partition_point(|member| {
            let other = self.obj(*member);
            other.key().is_none_or(|k| {
                let other_key = (k, other.numeric_id());
                order_compare(order, other_key, (key, numeric_id), &collation) != Ordering::Greater
            })
        });
        self.collection_mut(link)?.insert_at(position, id);
        Ok(position)
    }

    /// Allocates an existing object discovered on the server. The caller
    /// inserts it into the collection.
    pub(crate) fn materialize(&mut self, link: ParentLink, key: ObjectKey) -> Result<ObjectId> {
        let child_type = self.collection(link)?.child_type();
        let registry = Arc::clone(&self.registry);
        let descriptor = registry.get(child_type)?;
        let mut object = MetadataObject::new(descriptor, Some(key), ObjectState::Existing);
        object.set_parent(Some(link));
        self.alloc(object)
    }
}

/// Compares two collection members in collection order.
pub(crate) fn order_compare(
    order: CollectionOrder,
    left: (&ObjectKey, Option<i64>),
    right: (&ObjectKey, Option<i64>),
    collation: &Collation,
) -> Ordering {
    match order {
        CollectionOrder::ById => match (left.1, right.1) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| left.0.compare(right.0, collation)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            // New objects keep their insertion order.
            (None, None) => Ordering::Equal,
        },
        CollectionOrder::ByName | CollectionOrder::BySchemaName => {
            left.0.compare(right.0, collation)
        }
    }
}
