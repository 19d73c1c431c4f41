//! State validation and state-only transitions.

use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::object::ObjectId;
use crate::state::{ObjectState, StateViolation, Verb, check_transition};
use crate::tree::ObjectTree;

impl ObjectTree {
    /// Validates `verb` against the object's state. Every public mutating
    /// operation calls this before doing any work.
    pub fn check_object_state(&self, id: ObjectId, verb: Verb) -> Result<()> {
        self.check_id(id)?;
        let object = self.obj(id);
        check_transition(object.state(), verb, self.execution.is_recording()).map_err(|violation| {
            match violation {
                StateViolation::Dropped => CatalogError::ObjectDropped {
                    type_name: object.type_name().to_string(),
                    name: object.display_name(),
                },
                StateViolation::Pending => {
                    let mut missing = match object.key() {
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
                StateViolation::NotAllowed => CatalogError::InvalidState {
                    verb,
                    type_name: object.type_name().to_string(),
                    name: object.display_name(),
                    state: object.state(),
                },
            }
        })
    }

    /// Marks an object and its whole subtree dropped, running drop hooks.
    pub(crate) fn mark_dropped(&mut self, id: ObjectId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let object = self.obj(current);
            if object.state() == ObjectState::Dropped {
                continue;
            }
            for collection in object.collections() {
                stack.extend_from_slice(collection.members());
            }
            let hooks = self
                .registry()
                .get(object.type_name())
                .ok()
                .and_then(|d| d.handlers().hooks.clone());
            let object = self.obj_mut(current);
            object.set_state(ObjectState::Dropped);
            if let Some(hooks) = hooks {
                hooks.post_drop(object);
            }
        }
        debug!(object = %id, "Marked dropped");
    }

    /// Removes an object from its parent's collection. The back-reference
    /// is kept so the path stays computable.
    pub(crate) fn remove_from_parent(&mut self, id: ObjectId) {
        if let Some(link) = self.obj(id).parent()
            && let Ok(collection) = self.collection_mut(link)
        {
            collection.remove(id);
        }
    }

    /// Toggles removal of an existing object on its parent's next alter.
    pub fn mark_for_drop(&mut self, id: ObjectId, drop: bool) -> Result<()> {
        self.check_object_state(id, Verb::MarkForDrop)?;
        let object = self.obj_mut(id);
        match (object.state(), drop) {
            (ObjectState::Existing, true) => object.set_state(ObjectState::ToBeDropped),
            (ObjectState::ToBeDropped, false) => object.set_state(ObjectState::Existing),
            _ => {}
        }
        Ok(())
    }

    /// Forces the object to be scripted on the next alter even without
    /// dirty properties. Existing objects are fully loaded first.
    pub fn touch(&mut self, id: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::Touch)?;
        if self.obj(id).state() == ObjectState::Existing
            && self.initialize(id, true)?.is_not_found()
        {
            let object = self.obj(id);
            return Err(CatalogError::ObjectDropped {
                type_name: object.type_name().to_string(),
                name: object.display_name(),
            });
        }
        self.obj_mut(id).set_touched(true);
        Ok(())
    }
}
