//! Serializable snapshots of the object graph.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::object::ObjectId;
use crate::state::ObjectState;
use crate::tree::ObjectTree;
use crate::value::PropertyValue;

/// One object with its loaded properties and children.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSnapshot {
    /// Path of the object.
    pub urn: String,
    /// Type name.
    #[serde(rename = "type")]
    pub type_name: &'static str,
    /// Lifecycle state.
    pub state: ObjectState,
    /// Available property values.
    pub properties: BTreeMap<&'static str, PropertyValue>,
    /// Loaded children in collection order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ObjectSnapshot>,
}

impl ObjectSnapshot {
    /// Counts this object and all descendants.
    #[must_use]
    pub fn object_count(&self) -> usize {
        1 + self.children.iter().map(Self::object_count).sum::<usize>()
    }
}

impl ObjectTree {
    /// Captures what is loaded below `id` without any I/O.
    pub fn snapshot(&self, id: ObjectId) -> Result<ObjectSnapshot> {
        self.check_id(id)?;
        let object = self.obj(id);
        let mut children = Vec::new();
        for collection in object.collections() {
            for &member in collection.members() {
                children.push(self.snapshot(member)?);
            }
        }
        Ok(ObjectSnapshot {
            urn: self.urn(id)?.to_string(),
            type_name: object.type_name(),
            state: object.state(),
            properties: object.bag().available().map(|(n, v)| (n, v.clone())).collect(),
            children,
        })
    }

    /// Loads the default properties and every child collection below `id`,
    /// then captures the result.
    pub fn discover(&mut self, id: ObjectId) -> Result<ObjectSnapshot> {
        self.check_id(id)?;
        let mut stack = vec![id];
        let mut visited = 0usize;
        while let Some(current) = stack.pop() {
            if !self.obj(current).state().is_persisted() {
                continue;
            }
            if self.initialize(current, false)?.is_not_found() {
                continue;
            }
            visited += 1;
            let child_types: Vec<&'static str> = self
                .descriptor(current)?
                .children()
                .iter()
                .map(|c| c.child_type)
                .collect();
            for child_type in child_types {
                stack.extend(self.children(current, child_type)?);
            }
        }
        debug!(object = %id, visited, "Discovery walk finished");
        self.snapshot(id)
    }
}
