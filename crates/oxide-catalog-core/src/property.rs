//! Property metadata and the per-object property bag.
//!
//! A bag holds one slot per property declared by the object's type. Each
//! slot records whether the caller changed the value since the last
//! successful round trip (`dirty`) and whether the value came from the
//! server (`retrieved`).

use std::sync::Arc;

use serde::Serialize;

use crate::error::{CatalogError, Result};
use crate::key::ID_FIELD;
use crate::provider::{EngineType, ServerVersion};
use crate::value::{PropertyType, PropertyValue};

/// Write access of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum PropertyAccess {
    /// Writable in every state.
    #[default]
    ReadWrite,
    /// Server computed.
    ReadOnly,
    /// Writable until the object exists on the server.
    ReadOnlyAfterCreation,
}

/// Static description of one property of a type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMetadata {
    /// Property name, also the result column name.
    pub name: &'static str,
    /// Storage type.
    pub ty: PropertyType,
    /// Write access.
    pub access: PropertyAccess,
    /// Fetched on its own, never as part of a bulk field list.
    pub expensive: bool,
    /// Readable and writable before the object has a parent.
    pub design_time: bool,
    /// Part of the minimal field list fetched on first access.
    pub in_default_set: bool,
    /// Value reported for unset properties of new objects, replacing the
    /// type default.
    pub default_override: Option<PropertyValue>,
    /// First server version exposing the property.
    pub min_version: Option<ServerVersion>,
    /// Engines exposing the property; `None` means all.
    pub engines: Option<Vec<EngineType>>,
}

impl PropertyMetadata {
    /// Creates a read-write property.
    #[must_use]
    pub const fn new(name: &'static str, ty: PropertyType) -> Self {
        Self {
            name,
            ty,
            access: PropertyAccess::ReadWrite,
            expensive: false,
            design_time: false,
            in_default_set: false,
            default_override: None,
            min_version: None,
            engines: None,
        }
    }

    /// Marks the property as server computed.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.access = PropertyAccess::ReadOnly;
        self
    }

    /// Marks the property as fixed once the object exists.
    #[must_use]
    pub const fn read_only_after_creation(mut self) -> Self {
        self.access = PropertyAccess::ReadOnlyAfterCreation;
        self
    }

    /// Marks the property as expensive to retrieve.
    #[must_use]
    pub const fn expensive(mut self) -> Self {
        self.expensive = true;
        self
    }

    /// Allows access while the object is pending.
    #[must_use]
    pub const fn design_time(mut self) -> Self {
        self.design_time = true;
        self
    }

    /// Includes the property in the default field list.
    #[must_use]
    pub const fn default_set(mut self) -> Self {
        self.in_default_set = true;
        self
    }

    /// Overrides the value reported for new objects.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<PropertyValue>) -> Self {
        self.default_override = Some(value.into());
        self
    }

    /// Requires a minimum server version.
    #[must_use]
    pub const fn min_version(mut self, version: ServerVersion) -> Self {
        self.min_version = Some(version);
        self
    }

    /// Restricts the property to one engine type.
    #[must_use]
    pub fn engine(mut self, engine: EngineType) -> Self {
        self.engines.get_or_insert_with(Vec::new).push(engine);
        self
    }

    /// Returns true if the property exists on the given server.
    #[must_use]
    pub fn supported_on(&self, version: ServerVersion, engine: EngineType) -> bool {
        self.min_version.is_none_or(|min| version >= min)
            && self.engines.as_ref().is_none_or(|e| e.contains(&engine))
    }

    /// Returns the value reported for an unset property of a new object.
    #[must_use]
    pub fn new_object_default(&self) -> Option<PropertyValue> {
        self.default_override
            .clone()
            .or_else(|| self.ty.default_value())
    }
}

/// How much of an object's property set has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub enum BagState {
    /// Nothing fetched.
    #[default]
    Empty,
    /// The default field list has been fetched.
    Lazy,
    /// Every field has been fetched.
    Full,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    value: Option<PropertyValue>,
    dirty: bool,
    retrieved: bool,
}

/// Sparse property storage of one object.
#[derive(Debug, Clone)]
pub struct PropertyBag {
    type_name: &'static str,
    metadata: Arc<[PropertyMetadata]>,
    slots: Vec<Slot>,
    state: BagState,
}

impl PropertyBag {
    /// Creates an empty bag for a type.
    #[must_use]
    pub fn new(type_name: &'static str, metadata: Arc<[PropertyMetadata]>) -> Self {
        let slots = vec![Slot::default(); metadata.len()];
        Self {
            type_name,
            metadata,
            slots,
            state: BagState::Empty,
        }
    }

    /// Returns the property table.
    #[must_use]
    pub fn metadata(&self) -> &[PropertyMetadata] {
        &self.metadata
    }

    /// Returns the metadata of a property.
    #[must_use]
    pub fn meta(&self, name: &str) -> Option<&PropertyMetadata> {
        self.index_of(name).map(|i| &self.metadata[i])
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.metadata.iter().position(|p| p.name == name)
    }

    fn index_or_err(&self, name: &str) -> Result<usize> {
        self.index_of(name).ok_or_else(|| CatalogError::UnknownProperty {
            type_name: self.type_name.to_string(),
            property: name.to_string(),
        })
    }

    /// Returns the fetch state.
    #[must_use]
    pub const fn state(&self) -> BagState {
        self.state
    }

    /// Raises the fetch state; never lowers it.
    pub fn promote(&mut self, state: BagState) {
        self.state = self.state.max(state);
    }

    /// Returns the value held for a property.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.index_of(name)
            .and_then(|i| self.slots[i].value.as_ref())
    }

    /// Returns true if a value is held, dirty or retrieved.
    #[must_use]
    pub fn is_available(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns true if the value came from the server.
    #[must_use]
    pub fn is_retrieved(&self, name: &str) -> bool {
        self.index_of(name).is_some_and(|i| self.slots[i].retrieved)
    }

    /// Stores a caller-supplied value and marks it dirty.
    ///
    /// `exists` selects whether `ReadOnlyAfterCreation` properties are
    /// still writable.
    pub fn set_from_user(&mut self, name: &str, value: PropertyValue, exists: bool) -> Result<()> {
        let index = self.index_or_err(name)?;
        let meta = &self.metadata[index];
        let read_only = match meta.access {
            PropertyAccess::ReadWrite => false,
            PropertyAccess::ReadOnly => true,
            PropertyAccess::ReadOnlyAfterCreation => exists,
        };
        if read_only {
            return Err(CatalogError::PropertyReadOnly {
                type_name: self.type_name.to_string(),
                property: name.to_string(),
            });
        }
        let value = coerce(meta, value)?;
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        slot.dirty = true;
        Ok(())
    }

    /// Stores a value obtained from the server.
    pub fn set_retrieved(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let index = self.index_or_err(name)?;
        let value = coerce(&self.metadata[index], value)?;
        let slot = &mut self.slots[index];
        slot.value = Some(value);
        slot.retrieved = true;
        Ok(())
    }

    /// Sets or clears the dirty flag of a property holding a value.
    pub fn set_dirty(&mut self, name: &str, dirty: bool) -> Result<()> {
        let index = self.index_or_err(name)?;
        let slot = &mut self.slots[index];
        slot.dirty = dirty && slot.value.is_some();
        Ok(())
    }

    /// Returns true if a property is dirty.
    #[must_use]
    pub fn is_property_dirty(&self, name: &str) -> bool {
        self.index_of(name).is_some_and(|i| self.slots[i].dirty)
    }

    /// Returns true if any property is dirty.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.slots.iter().any(|s| s.dirty)
    }

    /// Returns the names of dirty properties in declaration order.
    #[must_use]
    pub fn dirty_names(&self) -> Vec<&'static str> {
        self.metadata
            .iter()
            .zip(&self.slots)
            .filter(|(_, s)| s.dirty)
            .map(|(m, _)| m.name)
            .collect()
    }

    /// Iterates over available `(name, value)` pairs in declaration order.
    pub fn available(&self) -> impl Iterator<Item = (&'static str, &PropertyValue)> {
        self.metadata
            .iter()
            .zip(&self.slots)
            .filter_map(|(m, s)| s.value.as_ref().map(|v| (m.name, v)))
    }

    /// Accepts dirty values as the server state after a successful round
    /// trip.
    pub fn clean(&mut self) {
        for slot in &mut self.slots {
            if slot.dirty {
                slot.dirty = false;
                slot.retrieved = true;
            }
        }
    }

    /// Forgets retrieved values, keeping local edits and the numeric
    /// identifier, and returns to [`BagState::Empty`].
    pub fn reset(&mut self) {
        for (meta, slot) in self.metadata.iter().zip(&mut self.slots) {
            if !slot.dirty && meta.name != ID_FIELD {
                *slot = Slot::default();
            }
        }
        self.state = BagState::Empty;
    }

    /// Merges server values into the bag.
    ///
    /// Unknown columns are skipped. NULL becomes the type's min sentinel
    /// for temporal properties and NULL otherwise. With `skip_if_dirty`,
    /// locally modified properties keep their value. Returns the number of
    /// properties written.
    pub fn absorb<'a>(
        &mut self,
        fields: impl IntoIterator<Item = (&'a str, &'a PropertyValue)>,
        skip_if_dirty: bool,
    ) -> Result<usize> {
        let mut written = 0;
        for (name, value) in fields {
            let Some(index) = self.index_of(name) else {
                continue;
            };
            if skip_if_dirty && self.slots[index].dirty {
                continue;
            }
            let meta = &self.metadata[index];
            let value = if value.is_null() {
                meta.ty.min_sentinel().unwrap_or(PropertyValue::Null)
            } else {
                coerce(meta, value.clone())?
            };
            let slot = &mut self.slots[index];
            slot.value = Some(value);
            slot.retrieved = true;
            slot.dirty = false;
            written += 1;
        }
        Ok(written)
    }
}

fn coerce(meta: &PropertyMetadata, value: PropertyValue) -> Result<PropertyValue> {
    value
        .coerce(meta.ty)
        .map_err(|rejected| CatalogError::PropertyTypeMismatch {
            property: meta.name.to_string(),
            expected: meta.ty,
            actual: rejected.type_label(),
        })
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDateTime;

    use super::*;

    fn bag() -> PropertyBag {
        PropertyBag::new(
            "Index",
            Arc::from(vec![
                PropertyMetadata::new("FillFactor", PropertyType::Int).default_set(),
                PropertyMetadata::new("IndexType", PropertyType::Enum),
                PropertyMetadata::new("CreateDate", PropertyType::DateTime).read_only(),
                PropertyMetadata::new("IsClustered", PropertyType::Bool).read_only_after_creation(),
                PropertyMetadata::new("Guid", PropertyType::Guid),
            ]),
        )
    }

    #[test]
    fn test_set_from_user_marks_dirty() {
        let mut bag = bag();
        bag.set_from_user("FillFactor", PropertyValue::Int(70), false)
            .unwrap();
        assert!(bag.is_property_dirty("FillFactor"));
        assert_eq!(bag.dirty_names(), vec!["FillFactor"]);
        bag.clean();
        assert!(!bag.is_dirty());
        assert!(bag.is_retrieved("FillFactor"));
    }

    #[test]
    fn test_read_only_rules() {
        let mut bag = bag();
        assert!(matches!(
            bag.set_from_user("CreateDate", PropertyValue::Null, false),
            Err(CatalogError::PropertyReadOnly { .. })
        ));
        assert!(bag.set_from_user("IsClustered", true.into(), false).is_ok());
        assert!(matches!(
            bag.set_from_user("IsClustered", true.into(), true),
            Err(CatalogError::PropertyReadOnly { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let mut bag = bag();
        let err = bag
            .set_from_user("FillFactor", PropertyValue::from("eighty"), false)
            .unwrap_err();
        assert!(matches!(err, CatalogError::PropertyTypeMismatch { .. }));
        assert!(matches!(
            bag.set_from_user("Missing", PropertyValue::Null, false),
            Err(CatalogError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_absorb_null_and_conversions() {
        let mut bag = bag();
        let null = PropertyValue::Null;
        let code = PropertyValue::BigInt(2);
        let guid = PropertyValue::from("6f9619ff-8b86-d011-b42d-00c04fc964ff");
        let written = bag
            .absorb(
                [
                    ("CreateDate", &null),
                    ("IndexType", &code),
                    ("Guid", &guid),
                    ("Unknown", &null),
                ],
                false,
            )
            .unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            bag.get("CreateDate"),
            Some(&PropertyValue::DateTime(NaiveDateTime::MIN))
        );
        assert_eq!(bag.get("IndexType"), Some(&PropertyValue::Enum(2)));
        assert!(matches!(bag.get("Guid"), Some(PropertyValue::Guid(_))));
    }

    #[test]
    fn test_absorb_skips_dirty() {
        let mut bag = bag();
        bag.set_from_user("FillFactor", PropertyValue::Int(50), false)
            .unwrap();
        let server = PropertyValue::BigInt(80);
        bag.absorb([("FillFactor", &server)], true).unwrap();
        assert_eq!(bag.get("FillFactor"), Some(&PropertyValue::Int(50)));
        assert!(bag.is_property_dirty("FillFactor"));

        bag.absorb([("FillFactor", &server)], false).unwrap();
        assert_eq!(bag.get("FillFactor"), Some(&PropertyValue::Int(80)));
        assert!(!bag.is_property_dirty("FillFactor"));
    }

    #[test]
    fn test_reset_keeps_dirty_values() {
        let mut bag = bag();
        let server = PropertyValue::BigInt(1);
        bag.absorb([("IndexType", &server)], false).unwrap();
        bag.set_from_user("FillFactor", PropertyValue::Int(50), true)
            .unwrap();
        bag.promote(BagState::Full);
        bag.reset();
        assert_eq!(bag.state(), BagState::Empty);
        assert!(!bag.is_available("IndexType"));
        assert_eq!(bag.get("FillFactor"), Some(&PropertyValue::Int(50)));
    }

    #[test]
    fn test_promote_is_monotonic() {
        let mut bag = bag();
        bag.promote(BagState::Full);
        bag.promote(BagState::Lazy);
        assert_eq!(bag.state(), BagState::Full);
    }

    #[test]
    fn test_supported_on() {
        let meta = PropertyMetadata::new("X", PropertyType::Int)
            .min_version(ServerVersion::new(13, 0, 0))
            .engine(EngineType::Cloud);
        assert!(
            !meta.supported_on(ServerVersion::new(12, 0, 0), EngineType::Cloud)
        );
        assert!(
            !meta.supported_on(ServerVersion::new(13, 0, 0), EngineType::Standalone)
        );
        assert!(
            meta.supported_on(ServerVersion::new(14, 0, 0), EngineType::Cloud)
        );
    }
}
