//! Public verbs.
//!
//! Every verb follows the same sequence: validate the state, resolve the
//! capability handler and version requirements, render the statements of
//! the object and its dependents, execute them, then commit the new state.
//! Nothing is committed when execution fails or when statements are only
//! recorded.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bulk::InitOptions;
use crate::error::{CatalogError, Result};
use crate::execution::ScriptBatch;
use crate::init::FetchOutcome;
use crate::key::ObjectKey;
use crate::object::ObjectId;
use crate::preferences::ScriptingPreferences;
use crate::propagate::{PropagateAction, PropagateTarget, ScriptPass};
use crate::property::BagState;
use crate::provider::{ExecutionError, ServerInfo, ServerVersion};
use crate::registry::{Alterable, Droppable, Handlers, LifecycleHooks, Renamable, Scriptable};
use crate::state::{ObjectState, Verb};
use crate::tree::ObjectTree;
use crate::urn::UrnSuffix;
use crate::value::PropertyValue;
use crate::view::ObjectView;

const OWNER_PROPERTY: &str = "Owner";

impl ObjectTree {
    fn handler<T: ?Sized>(
        &self,
        id: ObjectId,
        verb: Verb,
        pick: impl FnOnce(&Handlers) -> Option<Arc<T>>,
    ) -> Result<Arc<T>> {
        let descriptor = self.descriptor(id)?;
        pick(descriptor.handlers()).ok_or_else(|| CatalogError::UnsupportedOperation {
            type_name: descriptor.name().to_string(),
            verb,
        })
    }

    pub(crate) fn scriptable(&self, id: ObjectId) -> Result<Arc<dyn Scriptable>> {
        self.handler(id, Verb::Create, |h| h.scriptable.clone())
    }

    pub(crate) fn alterable(&self, id: ObjectId) -> Result<Arc<dyn Alterable>> {
        self.handler(id, Verb::Alter, |h| h.alterable.clone())
    }

    pub(crate) fn droppable(&self, id: ObjectId) -> Result<Arc<dyn Droppable>> {
        self.handler(id, Verb::Drop, |h| h.droppable.clone())
    }

    fn renamable(&self, id: ObjectId) -> Result<Arc<dyn Renamable>> {
        self.handler(id, Verb::Rename, |h| h.renamable.clone())
    }

    fn direct_preferences(&self) -> ScriptingPreferences {
        ScriptingPreferences::for_direct_execution(self.server_info())
    }

    /// Describes the scripting target as a server for support checks.
    fn target_server(&self, preferences: &ScriptingPreferences) -> ServerInfo {
        ServerInfo {
            version: preferences.version(),
            engine_type: preferences.engine_type(),
            engine_edition: preferences.engine_edition(),
            ..self.server_info().clone()
        }
    }

    /// Rejects local edits the target cannot express.
    fn check_dirty_supported(
        &self,
        id: ObjectId,
        preferences: &ScriptingPreferences,
    ) -> Result<()> {
        let target = self.target_server(preferences);
        let provider = self.metadata_provider();
        let object = self.obj(id);
        for name in object.bag().dirty_names() {
            if !provider.is_supported(object.type_name(), name, &target) {
                return Err(CatalogError::UnsupportedProperty {
                    type_name: object.type_name().to_string(),
                    property: name.to_string(),
                    server: target.to_string(),
                });
            }
        }
        Ok(())
    }

    /// New objects can only be created under a parent the server has,
    /// unless statements are only recorded.
    fn check_parent_exists(&self, id: ObjectId, verb: Verb) -> Result<()> {
        let Some(link) = self.obj(id).parent() else {
            return Ok(());
        };
        let parent = self.obj(link.object);
        if parent.state() == ObjectState::Existing || self.execution.is_recording() {
            return Ok(());
        }
        Err(CatalogError::InvalidState {
            verb,
            type_name: parent.type_name().to_string(),
            name: parent.display_name(),
            state: parent.state(),
        })
    }

    fn check_min_version(
        feature: &str,
        required: Option<ServerVersion>,
        preferences: &ScriptingPreferences,
    ) -> Result<()> {
        match required {
            Some(required) if preferences.version() < required => {
                Err(CatalogError::UnsupportedVersion {
                    feature: feature.to_string(),
                    required,
                    actual: preferences.version(),
                })
            }
            _ => Ok(()),
        }
    }

    fn hooks_of(&self, id: ObjectId) -> Result<Option<Arc<dyn LifecycleHooks>>> {
        Ok(self.descriptor(id)?.handlers().hooks.clone())
    }

    fn commit_created(&mut self, id: ObjectId, action: PropagateAction) -> Result<()> {
        let hooks = self.hooks_of(id)?;
        let object = self.obj_mut(id);
        object.set_state(ObjectState::Existing);
        object.clean();
        if let Some(hooks) = hooks {
            hooks.post_create(object);
        }
        self.propagate_state_and_cleanup(id, action)
    }

    fn commit_altered(&mut self, id: ObjectId, action: PropagateAction) -> Result<()> {
        let hooks = self.hooks_of(id)?;
        let object = self.obj_mut(id);
        let altered = object.needs_alter();
        object.clean();
        if altered && let Some(hooks) = hooks {
            hooks.post_alter(object);
        }
        self.propagate_state_and_cleanup(id, action)
    }

    /// Creates a new object and every dependent declared for creation.
    pub fn create(&mut self, id: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::Create)?;
        self.check_parent_exists(id, Verb::Create)?;
        let preferences = self.direct_preferences();
        self.check_dirty_supported(id, &preferences)?;
        let scripter = self.scriptable(id)?;

        let mut batch = ScriptBatch::new();
        scripter.script_create(&ObjectView::new(self, id), &preferences, &mut batch)?;
        self.propagate_script(
            id,
            PropagateAction::Create,
            &preferences,
            ScriptPass::Execute,
            &mut batch,
        )?;

        let label = self.label(id);
        self.execution.execute(&batch, Verb::Create, &label)?;
        if !self.execution.is_recording() {
            self.commit_created(id, PropagateAction::Create)?;
        }
        info!(object = %label, statements = batch.len(), "Created");
        Ok(())
    }

    /// Applies local edits of an existing object and its dependents.
    pub fn alter(&mut self, id: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::Alter)?;
        if self.obj(id).state() == ObjectState::Creating {
            // Only reachable while recording; the create script covers it.
            debug!(object = %id, "Alter of a new object skipped");
            return Ok(());
        }
        let preferences = self.direct_preferences();
        self.check_dirty_supported(id, &preferences)?;

        let mut batch = ScriptBatch::new();
        if self.obj(id).needs_alter() {
            let scripter = self.alterable(id)?;
            scripter.script_alter(&ObjectView::new(self, id), &preferences, &mut batch)?;
        }
        self.propagate_script(
            id,
            PropagateAction::Alter,
            &preferences,
            ScriptPass::Execute,
            &mut batch,
        )?;

        let label = self.label(id);
        self.execution.execute(&batch, Verb::Alter, &label)?;
        if !self.execution.is_recording() {
            self.commit_altered(id, PropagateAction::Alter)?;
        }
        info!(object = %label, statements = batch.len(), "Altered");
        Ok(())
    }

    /// Drops an object. A new object is simply discarded.
    pub fn drop(&mut self, id: ObjectId) -> Result<()> {
        self.drop_object(id, false)
    }

    /// Drops an object with an existence guard, so a concurrent removal on
    /// the server is not an error.
    pub fn drop_if_exists(&mut self, id: ObjectId) -> Result<()> {
        self.drop_object(id, true)
    }

    fn drop_object(&mut self, id: ObjectId, if_exists: bool) -> Result<()> {
        let verb = if if_exists {
            Verb::DropIfExists
        } else {
            Verb::Drop
        };
        self.check_object_state(id, verb)?;
        if self.obj(id).state() == ObjectState::Creating {
            debug!(object = %id, "Discarding object that was never created");
            self.mark_dropped(id);
            self.remove_from_parent(id);
            return Ok(());
        }
        let preferences = self.direct_preferences();
        let scripter = self.handler(id, verb, |h| h.droppable.clone())?;
        if if_exists {
            Self::check_min_version(
                "DROP IF EXISTS",
                scripter.drop_if_exists_min_version(),
                &preferences,
            )?;
        }

        let mut batch = ScriptBatch::new();
        scripter.script_drop(
            &ObjectView::new(self, id),
            &preferences,
            if_exists,
            &mut batch,
        )?;

        let label = self.label(id);
        let owns_connection = self.descriptor(id)?.is_connection_owner();
        if let Err(e) = self.execution.execute(&batch, verb, &label) {
            let severe = e
                .execution_error()
                .is_some_and(ExecutionError::is_severe_service_failure);
            if !(owns_connection && severe) {
                return Err(e);
            }
            warn!(object = %label, error = %e, "Connection closed by drop");
        }
        if !self.execution.is_recording() {
            self.mark_dropped(id);
            self.remove_from_parent(id);
        }
        info!(object = %label, "Dropped");
        Ok(())
    }

    /// Creates the object, or replaces its definition when it exists.
    pub fn create_or_alter(&mut self, id: ObjectId) -> Result<()> {
        self.check_object_state(id, Verb::CreateOrAlter)?;
        let creating = self.obj(id).state() == ObjectState::Creating;
        if creating {
            self.check_parent_exists(id, Verb::CreateOrAlter)?;
        }
        let preferences = self.direct_preferences();
        let scripter = self.handler(id, Verb::CreateOrAlter, |h| h.scriptable.clone())?;
        Self::check_min_version(
            "CREATE OR ALTER",
            scripter.create_or_alter_min_version(),
            &preferences,
        )?;
        self.check_dirty_supported(id, &preferences)?;

        let mut batch = ScriptBatch::new();
        scripter.script_create_or_alter(&ObjectView::new(self, id), &preferences, &mut batch)?;
        self.propagate_script(
            id,
            PropagateAction::CreateOrAlter,
            &preferences,
            ScriptPass::Execute,
            &mut batch,
        )?;

        let label = self.label(id);
        self.execution.execute(&batch, Verb::CreateOrAlter, &label)?;
        if !self.execution.is_recording() {
            if creating {
                self.commit_created(id, PropagateAction::CreateOrAlter)?;
            } else {
                self.commit_altered(id, PropagateAction::CreateOrAlter)?;
            }
        }
        info!(object = %label, created = creating, "Created or altered");
        Ok(())
    }

    /// Renames an existing object and moves it to its new sorted position.
    pub fn rename(&mut self, id: ObjectId, new_name: &str) -> Result<()> {
        self.check_object_state(id, Verb::Rename)?;
        let object = self.obj(id);
        let type_name = object.type_name();
        let key = object
            .key()
            .ok_or_else(|| {
                CatalogError::Internal(format!("{type_name} {id} has no key"))
            })?
            .with_name(new_name);
        key.validate().map_err(|reason| CatalogError::InvalidKey {
            type_name: type_name.to_string(),
            reason,
        })?;
        let scripter = self.renamable(id)?;
        let link = object.parent();
        if let Some(link) = link
            && let Some(other) = self.child(link.object, type_name, &key)?
            && other != id
        {
            return Err(CatalogError::DuplicateObject {
                type_name: type_name.to_string(),
                name: key.exception_name(),
            });
        }
        let preferences = self.direct_preferences();
        let mut batch = ScriptBatch::new();
        scripter.script_rename(
            &ObjectView::new(self, id),
            new_name,
            &preferences,
            &mut batch,
        )?;

        let label = self.label(id);
        self.execution.execute(&batch, Verb::Rename, &label)?;
        if !self.execution.is_recording() {
            self.apply_key(id, key)?;
        }
        info!(object = %label, new_name, "Renamed");
        Ok(())
    }

    fn apply_key(&mut self, id: ObjectId, key: ObjectKey) -> Result<()> {
        let link = self.obj(id).parent();
        if let Some(link) = link {
            self.collection_mut(link)?.remove(id);
        }
        self.obj_mut(id).set_key(Some(key));
        if let Some(link) = link {
            self.insert_sorted(link, id)?;
        }
        Ok(())
    }

    /// Transfers ownership of an existing object. Types with an `Owner`
    /// property record the new owner as its server value.
    pub fn change_owner(&mut self, id: ObjectId, owner: &str) -> Result<()> {
        self.check_object_state(id, Verb::ChangeOwner)?;
        let scripter = self.handler(id, Verb::ChangeOwner, |h| h.renamable.clone())?;
        let preferences = self.direct_preferences();
        let mut batch = ScriptBatch::new();
        scripter.script_change_owner(&ObjectView::new(self, id), owner, &preferences, &mut batch)?;

        let label = self.label(id);
        self.execution.execute(&batch, Verb::ChangeOwner, &label)?;
        if !self.execution.is_recording() {
            let object = self.obj_mut(id);
            if object.bag().meta(OWNER_PROPERTY).is_some() {
                object.record_server_value(OWNER_PROPERTY, PropertyValue::from(owner))?;
            }
        }
        info!(object = %label, owner, "Owner changed");
        Ok(())
    }

    /// Discards fetched values and child collections so they are read from
    /// the server again. Local edits are kept.
    pub fn refresh(&mut self, id: ObjectId) -> Result<FetchOutcome> {
        self.check_object_state(id, Verb::Refresh)?;
        let object = self.obj_mut(id);
        object.bag_mut().reset();
        object.set_initialized_for_scripting(false);
        for collection in object.collections_mut() {
            collection.set_initialized(false);
        }
        let outcome = self.initialize(id, false)?;
        debug!(object = %id, outcome = ?outcome, "Refreshed");
        Ok(outcome)
    }

    /// Renders statements for the object without executing them.
    ///
    /// Existing objects produce a creation script of themselves and their
    /// dependents, loading everything scripting needs first. New objects
    /// produce the statements `create` would run.
    pub fn script(
        &mut self,
        id: ObjectId,
        preferences: Option<&ScriptingPreferences>,
    ) -> Result<Vec<String>> {
        self.check_object_state(id, Verb::Script)?;
        let preferences = preferences
            .cloned()
            .unwrap_or_default()
            .resolved(self.server_info());
        let scripter = self.handler(id, Verb::Script, |h| h.scriptable.clone())?;

        let pass = if self.obj(id).state().is_persisted() {
            self.prefetch_for_scripting(id, &preferences)?;
            ScriptPass::Export
        } else {
            ScriptPass::Execute
        };
        let mut batch = ScriptBatch::new();
        scripter.script_create(&ObjectView::new(self, id), &preferences, &mut batch)?;
        self.propagate_script(id, PropagateAction::Create, &preferences, pass, &mut batch)?;

        let mut statements = Vec::with_capacity(batch.len() * 2 + 1);
        if preferences.include_header {
            statements.push(format!(
                "-- {} {} scripted for {:?} {}",
                self.obj(id).type_name(),
                self.label(id),
                preferences.engine_type(),
                preferences.version()
            ));
        }
        for statement in batch.into_statements() {
            statements.push(statement);
            if let Some(terminator) = &preferences.batch_terminator {
                statements.push(terminator.clone());
            }
        }
        debug!(object = %id, statements = statements.len(), "Scripted");
        Ok(statements)
    }

    /// Loads the scripting fields of an existing object and of every
    /// dependent it propagates creation to. Each level of dependents is read
    /// with one query from `id`, whatever the number of parents on it.
    fn prefetch_for_scripting(
        &mut self,
        id: ObjectId,
        preferences: &ScriptingPreferences,
    ) -> Result<()> {
        if !self.obj(id).is_initialized_for_scripting() {
            let fields = self
                .metadata_provider()
                .script_fields(self.obj(id).type_name(), preferences);
            if self
                .fetch_properties(id, fields, Some(BagState::Full))?
                .is_not_found()
            {
                let object = self.obj(id);
                return Err(CatalogError::ObjectDropped {
                    type_name: object.type_name().to_string(),
                    name: object.display_name(),
                });
            }
            self.obj_mut(id).set_initialized_for_scripting(true);
        }

        let options = InitOptions {
            for_scripting: true,
            preferences: Some(preferences.clone()),
            ..InitOptions::default()
        };
        let mut others = Vec::new();
        let mut levels = VecDeque::from([(Vec::new(), vec![id])]);
        while let Some((path, objects)) = levels.pop_front() {
            let mut child_types: Vec<&'static str> = Vec::new();
            for &current in &objects {
                let Some(handler) = self.descriptor(current)?.handlers().propagating.clone() else {
                    continue;
                };
                let view = ObjectView::new(self, current);
                for info in handler.propagate_info(&view, PropagateAction::Create) {
                    match info.target {
                        PropagateTarget::Collection(child_type)
                        | PropagateTarget::Singleton(child_type) => {
                            if !child_types.contains(&child_type) {
                                child_types.push(child_type);
                            }
                        }
                        PropagateTarget::Object(object) => others.push(object),
                    }
                }
            }
            for child_type in child_types {
                let mut types = path.clone();
                types.push(child_type);
                self.init_child_level(id, &UrnSuffix::from_types(&types), &options)?;
                let members = objects
                    .iter()
                    .flat_map(|&parent| self.loaded_members(parent, child_type))
                    .collect();
                levels.push_back((types, members));
            }
        }

        for other in others {
            let object = self.obj(other);
            if object.state().is_persisted() && !object.is_initialized_for_scripting() {
                self.prefetch_for_scripting(other, preferences)?;
            }
        }
        Ok(())
    }

    /// Writes a property. Existing objects record the edit for the next
    /// alter; read-only properties are rejected.
    pub fn set_property(
        &mut self,
        id: ObjectId,
        name: &str,
        value: impl Into<PropertyValue>,
    ) -> Result<()> {
        self.check_object_state(id, Verb::SetProperty)?;
        let provider = self.metadata_provider();
        let object = self.obj(id);
        let exists = object.state().is_persisted();
        if exists
            && object.bag().meta(name).is_some()
            && !provider.is_supported(object.type_name(), name, self.server_info())
        {
            return Err(CatalogError::UnsupportedProperty {
                type_name: object.type_name().to_string(),
                property: name.to_string(),
                server: self.server_info().to_string(),
            });
        }
        self.obj_mut(id)
            .bag_mut()
            .set_from_user(name, value.into(), exists)
    }
}
