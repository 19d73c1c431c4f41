//! Child collections.

use crate::object::ObjectId;

/// Ordered members of one child type under a parent object.
///
/// `initialized` is true only when the collection is known to hold every
/// server-side member; on-demand lookups may populate it partially.
#[derive(Debug, Clone)]
pub struct Collection {
    child_type: &'static str,
    singleton: bool,
    members: Vec<ObjectId>,
    initialized: bool,
}

impl Collection {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new(child_type: &'static str, singleton: bool, initialized: bool) -> Self {
        Self {
            child_type,
            singleton,
            members: Vec::new(),
            initialized,
        }
    }

    /// Returns the child type.
    #[must_use]
    pub const fn child_type(&self) -> &'static str {
        self.child_type
    }

    /// Returns true for singleton children.
    #[must_use]
    pub const fn is_singleton(&self) -> bool {
        self.singleton
    }

    /// Returns the members in collection order.
    #[must_use]
    pub fn members(&self) -> &[ObjectId] {
        &self.members
    }

    /// Returns the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if every server-side member is loaded.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Sets the initialized flag.
    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    /// Returns the position of a member.
    #[must_use]
    pub fn position_of(&self, id: ObjectId) -> Option<usize> {
        self.members.iter().position(|m| *m == id)
    }

    /// Inserts a member at `index`.
    pub fn insert_at(&mut self, index: usize, id: ObjectId) {
        let index = index.min(self.members.len());
        self.members.insert(index, id);
    }

    /// Removes a member. Returns false if it was not present.
    pub fn remove(&mut self, id: ObjectId) -> bool {
        match self.position_of(id) {
            Some(index) => {
                self.members.remove(index);
                true
            }
            None => false,
        }
    }

    /// Removes every member.
    pub fn clear(&mut self) {
        self.members.clear();
    }
}
