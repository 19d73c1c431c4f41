//! Object lifecycle states and the verb permission table.
//!
//! ```text
//! Pending --(key + parent)--> Creating --(create)--> Existing <--(mark for drop)--> ToBeDropped
//!                                 |                      |                              |
//!                                 +------(drop)----------+----------> Dropped <---------+
//! ```
//!
//! [`check_transition`] is the single table consulted by every public
//! operation before any work is done.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a metadata object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectState {
    /// Detached: key or parent not set yet.
    Pending,
    /// Attached but not yet persisted.
    Creating,
    /// Persisted on the server.
    Existing,
    /// Persisted, removed by the parent's next alter.
    ToBeDropped,
    /// Removed. Terminal.
    Dropped,
}

impl ObjectState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Creating,
        Self::Existing,
        Self::ToBeDropped,
        Self::Dropped,
    ];

    /// Returns true for states backed by a server object.
    #[must_use]
    pub const fn is_persisted(self) -> bool {
        matches!(self, Self::Existing | Self::ToBeDropped)
    }
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Existing => "existing",
            Self::ToBeDropped => "to be dropped",
            Self::Dropped => "dropped",
        };
        f.write_str(name)
    }
}

/// Operations validated against the object state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    /// Create on the server.
    Create,
    /// Create or replace on the server.
    CreateOrAlter,
    /// Apply pending changes.
    Alter,
    /// Drop from the server.
    Drop,
    /// Drop if present.
    DropIfExists,
    /// Change the name.
    Rename,
    /// Transfer ownership.
    ChangeOwner,
    /// Discard fetched state.
    Refresh,
    /// Generate statements without executing.
    Script,
    /// Toggle removal on the parent's next alter.
    MarkForDrop,
    /// Write a property.
    SetProperty,
    /// Force re-scripting.
    Touch,
    /// Detach a not yet created object from its collection.
    Remove,
    /// Assign the key.
    SetKey,
    /// Assign the parent.
    SetParent,
}

impl Verb {
    /// All verbs.
    pub const ALL: [Self; 15] = [
        Self::Create,
        Self::CreateOrAlter,
        Self::Alter,
        Self::Drop,
        Self::DropIfExists,
        Self::Rename,
        Self::ChangeOwner,
        Self::Refresh,
        Self::Script,
        Self::MarkForDrop,
        Self::SetProperty,
        Self::Touch,
        Self::Remove,
        Self::SetKey,
        Self::SetParent,
    ];
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::CreateOrAlter => "create or alter",
            Self::Alter => "alter",
            Self::Drop => "drop",
            Self::DropIfExists => "drop if exists",
            Self::Rename => "rename",
            Self::ChangeOwner => "change owner of",
            Self::Refresh => "refresh",
            Self::Script => "script",
            Self::MarkForDrop => "mark for drop",
            Self::SetProperty => "set property on",
            Self::Touch => "touch",
            Self::Remove => "remove",
            Self::SetKey => "set key of",
            Self::SetParent => "set parent of",
        };
        f.write_str(name)
    }
}

/// Why a verb was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateViolation {
    /// The object is dropped.
    Dropped,
    /// The object has no key or parent yet.
    Pending,
    /// The verb is not valid in the current state.
    NotAllowed,
}

/// Checks whether `verb` may run on an object in `state`.
///
/// `recording` is true when statements are captured instead of executed;
/// it additionally lets new objects be altered.
pub const fn check_transition(
    state: ObjectState,
    verb: Verb,
    recording: bool,
) -> Result<(), StateViolation> {
    use ObjectState as S;
    use Verb as V;

    let allowed = match state {
        S::Dropped => return Err(StateViolation::Dropped),
        S::Pending => matches!(verb, V::SetProperty | V::SetKey | V::SetParent | V::Touch),
        S::Creating => match verb {
            V::Create
            | V::CreateOrAlter
            | V::Drop
            | V::Script
            | V::SetProperty
            | V::Touch
            | V::Remove => true,
            V::Alter => recording,
            _ => false,
        },
        S::Existing => !matches!(verb, V::Create | V::Remove | V::SetKey | V::SetParent),
        S::ToBeDropped => matches!(
            verb,
            V::Drop | V::DropIfExists | V::Refresh | V::Script | V::MarkForDrop
        ),
    };
    if allowed {
        Ok(())
    } else if matches!(state, S::Pending) {
        Err(StateViolation::Pending)
    } else {
        Err(StateViolation::NotAllowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dropped_rejects_everything() {
        for verb in Verb::ALL {
            assert_eq!(
                check_transition(ObjectState::Dropped, verb, false),
                Err(StateViolation::Dropped)
            );
        }
    }

    #[test]
    fn test_pending_requires_parent() {
        assert_eq!(
            check_transition(ObjectState::Pending, Verb::Create, false),
            Err(StateViolation::Pending)
        );
        assert!(
            check_transition(ObjectState::Pending, Verb::SetKey, false).is_ok()
        );
    }

    #[test]
    fn test_alter_on_creating_only_when_recording() {
        assert!(
            check_transition(ObjectState::Creating, Verb::Alter, false).is_err()
        );
        assert!(
            check_transition(ObjectState::Creating, Verb::Alter, true).is_ok()
        );
    }

    #[test]
    fn test_existing_cannot_be_created_again() {
        assert_eq!(
            check_transition(ObjectState::Existing, Verb::Create, false),
            Err(StateViolation::NotAllowed)
        );
        assert!(
            check_transition(ObjectState::Existing, Verb::Alter, false).is_ok()
        );
    }

    #[test]
    fn test_to_be_dropped_allows_undo() {
        assert!(
            check_transition(ObjectState::ToBeDropped, Verb::MarkForDrop, false).is_ok()
        );
        assert!(
            check_transition(ObjectState::ToBeDropped, Verb::Alter, false).is_err()
        );
        assert!(
            check_transition(ObjectState::ToBeDropped, Verb::SetProperty, false).is_err()
        );
    }
}
