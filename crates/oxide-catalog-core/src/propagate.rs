//! Propagation of verbs from a parent to its dependents.
//!
//! Propagation runs in two phases. The script phase only renders
//! statements and never changes state. The commit phase runs after the
//! statements executed successfully and moves every affected object to
//! the state the server now holds. A failed execution therefore leaves the
//! tree exactly as it was before the verb.

use tracing::debug;

use crate::error::Result;
use crate::execution::ScriptBatch;
use crate::object::ObjectId;
use crate::preferences::ScriptingPreferences;
use crate::state::ObjectState;
use crate::tree::ObjectTree;
use crate::view::ObjectView;

/// Action being propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagateAction {
    /// The parent is being created.
    Create,
    /// The parent is being altered.
    Alter,
    /// The parent is being dropped. The server removes dependents itself.
    Drop,
    /// The parent is being created or replaced.
    CreateOrAlter,
}

/// What happens to a propagation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagateMode {
    /// Script the target inline after the parent.
    Script,
    /// Only commit the target's state; the parent statement covers it.
    StateOnly,
    /// Skip this level and propagate to the target's own dependents.
    Delegate,
}

/// A dependent of a parent object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropagateTarget {
    /// Every loaded member of a child collection.
    Collection(&'static str),
    /// A singleton child, when loaded.
    Singleton(&'static str),
    /// One specific object.
    Object(ObjectId),
}

/// One propagation target with its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagateInfo {
    /// Objects concerned.
    pub target: PropagateTarget,
    /// How they follow the parent.
    pub mode: PropagateMode,
}

impl PropagateInfo {
    /// Targets scripted inline.
    #[must_use]
    pub const fn script(target: PropagateTarget) -> Self {
        Self {
            target,
            mode: PropagateMode::Script,
        }
    }

    /// Targets whose state follows the parent without scripting.
    #[must_use]
    pub const fn state_only(target: PropagateTarget) -> Self {
        Self {
            target,
            mode: PropagateMode::StateOnly,
        }
    }

    /// Targets whose own dependents are propagated to.
    #[must_use]
    pub const fn delegate(target: PropagateTarget) -> Self {
        Self {
            target,
            mode: PropagateMode::Delegate,
        }
    }
}

/// Purpose of a script phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScriptPass {
    /// Statements that bring the server in line with the tree.
    Execute,
    /// A creation script of everything that exists, for export.
    Export,
}

impl ObjectTree {
    /// Resolves the targets declared for `action` to loaded objects, in
    /// declaration order.
    pub(crate) fn propagation_targets(
        &self,
        id: ObjectId,
        action: PropagateAction,
    ) -> Result<Vec<(ObjectId, PropagateMode)>> {
        let Some(handler) = self.descriptor(id)?.handlers().propagating.clone() else {
            return Ok(Vec::new());
        };
        let view = ObjectView::new(self, id);
        let mut targets = Vec::new();
        for info in handler.propagate_info(&view, action) {
            match info.target {
                PropagateTarget::Collection(child_type)
                | PropagateTarget::Singleton(child_type) => {
                    targets.extend(
                        self.loaded_members(id, child_type)
                            .into_iter()
                            .map(|member| (member, info.mode)),
                    );
                }
                PropagateTarget::Object(object) => {
                    self.check_id(object)?;
                    targets.push((object, info.mode));
                }
            }
        }
        Ok(targets)
    }

    /// Appends the statements of every dependent of `id` to `batch`.
    pub(crate) fn propagate_script(
        &self,
        id: ObjectId,
        action: PropagateAction,
        preferences: &ScriptingPreferences,
        pass: ScriptPass,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        if action == PropagateAction::Drop {
            return Ok(());
        }
        for (child, mode) in self.propagation_targets(id, action)? {
            match mode {
                PropagateMode::Delegate => {
                    self.propagate_script(child, action, preferences, pass, batch)?
                }
                PropagateMode::StateOnly => {}
                PropagateMode::Script => self.script_dependent(child, preferences, pass, batch)?,
            }
        }
        Ok(())
    }

    fn script_dependent(
        &self,
        id: ObjectId,
        preferences: &ScriptingPreferences,
        pass: ScriptPass,
        batch: &mut ScriptBatch,
    ) -> Result<()> {
        let view = ObjectView::new(self, id);
        let object = self.obj(id);
        match (pass, object.state()) {
            (_, ObjectState::Pending | ObjectState::Dropped) => {}
            (ScriptPass::Export, _) | (ScriptPass::Execute, ObjectState::Creating) => {
                self.scriptable(id)?
                    .script_create(&view, preferences, batch)?;
                self.propagate_script(id, PropagateAction::Create, preferences, pass, batch)?;
            }
            (ScriptPass::Execute, ObjectState::Existing) => {
                if object.needs_alter() {
                    self.alterable(id)?.script_alter(&view, preferences, batch)?;
                }
                self.propagate_script(id, PropagateAction::Alter, preferences, pass, batch)?;
            }
            (ScriptPass::Execute, ObjectState::ToBeDropped) => {
                self.droppable(id)?
                    .script_drop(&view, preferences, false, batch)?;
            }
        }
        Ok(())
    }

    /// Commits the state of every dependent of `id` after the parent's
    /// statements executed.
    pub(crate) fn propagate_state_and_cleanup(
        &mut self,
        id: ObjectId,
        action: PropagateAction,
    ) -> Result<()> {
        if action == PropagateAction::Drop {
            return Ok(());
        }
        let mut doomed = Vec::new();
        for (child, mode) in self.propagation_targets(id, action)? {
            if mode == PropagateMode::Delegate {
                self.propagate_state_and_cleanup(child, action)?;
                continue;
            }
            let hooks = self.descriptor(child)?.handlers().hooks.clone();
            let object = self.obj_mut(child);
            match object.state() {
                ObjectState::Creating => {
                    object.set_state(ObjectState::Existing);
                    object.clean();
                    if let Some(hooks) = &hooks {
                        hooks.post_create(object);
                    }
                    self.propagate_state_and_cleanup(child, PropagateAction::Create)?;
                }
                ObjectState::Existing => {
                    let altered = object.needs_alter();
                    object.clean();
                    if altered && let Some(hooks) = &hooks {
                        hooks.post_alter(object);
                    }
                    self.propagate_state_and_cleanup(child, PropagateAction::Alter)?;
                }
                ObjectState::ToBeDropped => doomed.push(child),
                ObjectState::Pending | ObjectState::Dropped => {}
            }
        }
        for child in doomed {
            debug!(object = %child, parent = %id, "Dropped with parent alter");
            self.mark_dropped(child);
            self.remove_from_parent(child);
        }
        Ok(())
    }
}
