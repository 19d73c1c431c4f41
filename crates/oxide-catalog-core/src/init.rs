//! Lazy property initialization.
//!
//! Reading a property the bag does not hold triggers a fetch whose size
//! depends on the bag state: the default field list first, every field
//! next, or just the property itself when it is flagged expensive.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CatalogError, Result};
use crate::key::ObjectKey;
use crate::object::ObjectId;
use crate::property::{BagState, PropertyMetadata};
use crate::provider::{Request, Row};
use crate::state::ObjectState;
use crate::tree::ObjectTree;
use crate::urn::UrnSegment;
use crate::value::PropertyValue;

/// Result of a fetch for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The server returned the object.
    Found,
    /// The server no longer has the object; it is now dropped.
    NotFound,
}

impl FetchOutcome {
    /// Returns true for [`FetchOutcome::NotFound`].
    #[must_use]
    pub const fn is_not_found(self) -> bool {
        matches!(self, Self::NotFound)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Default,
    OrNull,
    Require,
}

impl ObjectTree {
    /// Reads a property, fetching it when needed.
    ///
    /// Objects not yet on the server report the type default for unset
    /// properties; a property without a sensible default fails with
    /// [`CatalogError::PropertyNotSet`].
    pub fn property(&mut self, id: ObjectId, name: &str) -> Result<PropertyValue> {
        self.read_property(id, name, ReadMode::Default)
    }

    /// Like [`ObjectTree::property`], returning NULL instead of failing
    /// when no value can be produced.
    pub fn property_or_null(&mut self, id: ObjectId, name: &str) -> Result<PropertyValue> {
        self.read_property(id, name, ReadMode::OrNull)
    }

    /// Reads a property that must have a value. New objects fail with
    /// [`CatalogError::PropertyNotSet`] unless the caller set it.
    pub fn require_property(&mut self, id: ObjectId, name: &str) -> Result<PropertyValue> {
        self.read_property(id, name, ReadMode::Require)
    }

    fn read_property(&mut self, id: ObjectId, name: &str, mode: ReadMode) -> Result<PropertyValue> {
        self.check_id(id)?;
        let object = self.obj(id);
        let is_key_field = self
            .registry()
            .key_fields(object.type_name())?
            .iter()
            .any(|field| *field == name);
        if is_key_field {
            return match object.key().and_then(|k| k.field_value(name)) {
                Some(value) => Ok(value),
                None => Err(self.pending_error(id)),
            };
        }
        let Some(meta) = object.bag().meta(name).cloned() else {
            return Err(CatalogError::UnknownProperty {
                type_name: object.type_name().to_string(),
                property: name.to_string(),
            });
        };
        if let Some(value) = object.bag().get(name) {
            return Ok(value.clone());
        }
        match object.state() {
            ObjectState::Dropped => Err(CatalogError::ObjectDropped {
                type_name: object.type_name().to_string(),
                name: object.display_name(),
            }),
            ObjectState::Pending if !meta.design_time => Err(self.pending_error(id)),
            ObjectState::Pending | ObjectState::Creating => self.new_object_value(id, &meta, mode),
            ObjectState::Existing | ObjectState::ToBeDropped => self.fetch_missing(id, &meta, mode),
        }
    }

    fn pending_error(&self, id: ObjectId) -> CatalogError {
        let object = self.obj(id);
        let mut missing: Vec<String> = match object.key() {
            Some(key) => key.missing_fields(),
            None => self
                .registry()
                .key_fields(object.type_name())
                .unwrap_or_default()
                .into_iter()
                .map(String::from)
                .collect(),
        };
        if object.parent().is_none() {
            missing.push("Parent".to_string());
        }
        CatalogError::ParentNotSet {
            type_name: object.type_name().to_string(),
            missing,
        }
    }

    fn new_object_value(
        &self,
        id: ObjectId,
        meta: &PropertyMetadata,
        mode: ReadMode,
    ) -> Result<PropertyValue> {
        let default = match mode {
            ReadMode::Require => None,
            ReadMode::Default | ReadMode::OrNull => meta.new_object_default(),
        };
        match (default, mode) {
            (Some(value), _) => Ok(value),
            (None, ReadMode::OrNull) => Ok(PropertyValue::Null),
            (None, _) => {
                let object = self.obj(id);
                Err(CatalogError::PropertyNotSet {
                    type_name: object.type_name().to_string(),
                    name: object.display_name(),
                    property: meta.name.to_string(),
                })
            }
        }
    }

    fn fetch_missing(
        &mut self,
        id: ObjectId,
        meta: &PropertyMetadata,
        mode: ReadMode,
    ) -> Result<PropertyValue> {
        let type_name = self.obj(id).type_name();
        let server = self.server_info().clone();
        if !self
            .metadata_provider()
            .is_supported(type_name, meta.name, &server)
        {
            if mode == ReadMode::OrNull {
                return Ok(PropertyValue::Null);
            }
            return Err(CatalogError::UnsupportedProperty {
                type_name: type_name.to_string(),
                property: meta.name.to_string(),
                server: server.to_string(),
            });
        }

        let mut outcome = FetchOutcome::Found;
        if meta.expensive {
            outcome = self.fetch_properties(id, vec![meta.name.to_string()], None)?;
        } else {
            if self.obj(id).bag().state() == BagState::Empty {
                let fields = self.metadata_provider().default_fields(type_name, &server);
                outcome = self.fetch_properties(id, fields, Some(BagState::Lazy))?;
            }
            let bag = self.obj(id).bag();
            if outcome == FetchOutcome::Found
                && !bag.is_available(meta.name)
                && bag.state() == BagState::Lazy
            {
                let fields = self.metadata_provider().full_fields(type_name, &server);
                outcome = self.fetch_properties(id, fields, Some(BagState::Full))?;
            }
        }

        let object = self.obj(id);
        if outcome.is_not_found() {
            return Err(CatalogError::ObjectDropped {
                type_name: type_name.to_string(),
                name: object.display_name(),
            });
        }
        match object.bag().get(meta.name) {
            Some(value) => Ok(value.clone()),
            None if mode == ReadMode::OrNull => Ok(PropertyValue::Null),
            None => Err(CatalogError::PropertyCannotBeRetrieved {
                type_name: type_name.to_string(),
                name: object.display_name(),
                property: meta.name.to_string(),
            }),
        }
    }

    /// Loads the default (or every) field of an existing object.
    ///
    /// Returns [`FetchOutcome::NotFound`] and marks the object dropped when
    /// the server no longer has it. A new object is looked up as well: when
    /// the server has it, it becomes existing, otherwise it is left
    /// untouched and `NotFound` is returned.
    pub fn initialize(&mut self, id: ObjectId, full: bool) -> Result<FetchOutcome> {
        self.check_id(id)?;
        let creating = match self.obj(id).state() {
            ObjectState::Existing | ObjectState::ToBeDropped => false,
            ObjectState::Creating => true,
            ObjectState::Dropped => return Ok(FetchOutcome::NotFound),
            ObjectState::Pending => return Ok(FetchOutcome::Found),
        };
        let type_name = self.obj(id).type_name();
        let server = self.server_info().clone();
        let (fields, state) = if full {
            (self.metadata_provider().full_fields(type_name, &server), BagState::Full)
        } else {
            (self.metadata_provider().default_fields(type_name, &server), BagState::Lazy)
        };
        if creating {
            return self.initialize_created(id, fields, state);
        }
        self.fetch_properties(id, fields, Some(state))
    }

    fn initialize_created(
        &mut self,
        id: ObjectId,
        fields: Vec<String>,
        state: BagState,
    ) -> Result<FetchOutcome> {
        let parent_persisted = self
            .obj(id)
            .parent()
            .is_some_and(|link| self.obj(link.object).state().is_persisted());
        if !parent_persisted {
            return Ok(FetchOutcome::NotFound);
        }
        let request = Request::new(self.urn(id)?, fields);
        let Some(row) = self.read_single_row(&request)? else {
            return Ok(FetchOutcome::NotFound);
        };
        let bag = self.obj_mut(id).bag_mut();
        bag.absorb(row.fields_with_prefix(""), true)?;
        bag.promote(state);
        self.adopt_created(id);
        Ok(FetchOutcome::Found)
    }

    /// Fetches `fields` for one object and merges them into its bag without
    /// overwriting local edits.
    pub(crate) fn fetch_properties(
        &mut self,
        id: ObjectId,
        fields: Vec<String>,
        promote: Option<BagState>,
    ) -> Result<FetchOutcome> {
        let request = Request::new(self.urn(id)?, fields);
        let Some(row) = self.read_single_row(&request)? else {
            warn!(urn = %request.urn, "Object no longer exists on the server");
            self.mark_dropped(id);
            self.remove_from_parent(id);
            return Ok(FetchOutcome::NotFound);
        };
        let bag = self.obj_mut(id).bag_mut();
        let written = bag.absorb(row.fields_with_prefix(""), true)?;
        if let Some(state) = promote {
            bag.promote(state);
        }
        debug!(
            urn = %request.urn,
            written,
            state = ?bag.state(),
            "Fetched properties"
        );
        Ok(FetchOutcome::Found)
    }

    fn read_single_row(&mut self, request: &Request) -> Result<Option<Row>> {
        let mut reader = self.execution.open_reader(request)?;
        let first = reader.next_row()?;
        if first.is_some() && reader.next_row()?.is_some() {
            return Err(CatalogError::Internal(format!(
                "more than one row returned for '{}'",
                request.urn
            )));
        }
        Ok(first)
    }

    /// Looks one child up on the server and adds it to the parent's
    /// collection when found.
    pub fn initialize_child_object(
        &mut self,
        parent: ObjectId,
        child_type: &str,
        key: &ObjectKey,
    ) -> Result<Option<ObjectId>> {
        self.check_id(parent)?;
        let link = self.link_for(parent, child_type)?;
        if !self.obj(parent).state().is_persisted() {
            return Ok(None);
        }
        let registry = Arc::clone(self.registry());
        let descriptor = registry.get(child_type)?;
        let server = self.server_info().clone();
        let mut fields: Vec<String> = registry
            .order_fields(child_type)?
            .into_iter()
            .map(String::from)
            .collect();
        for field in self.metadata_provider().default_fields(child_type, &server) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }
        let segment = UrnSegment::filtered(descriptor.name(), key.conditions());
        let request = Request::new(self.urn(parent)?.child(segment), fields);
        let Some(row) = self.read_single_row(&request)? else {
            debug!(urn = %request.urn, "Child not found on the server");
            return Ok(None);
        };
        let server_key =
            ObjectKey::from_row(descriptor.key_kind(), &row, "").unwrap_or_else(|_| key.clone());
        let id = self.materialize(link, server_key)?;
        let bag = self.obj_mut(id).bag_mut();
        bag.absorb(row.fields_with_prefix(""), true)?;
        bag.promote(BagState::Lazy);
        self.insert_sorted(link, id)?;
        debug!(urn = %request.urn, id = %id, "Loaded child on demand");
        Ok(Some(id))
    }
}
