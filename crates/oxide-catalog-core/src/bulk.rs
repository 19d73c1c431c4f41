//! Merge-based collection population.
//!
//! One query fetches a whole subtree below an anchor object. Rows arrive
//! sorted the way each level's collection is sorted, so they are merged
//! into the in-memory collections in lock-step, like a sorted merge join:
//! matching members absorb their row, rows without a member become new
//! objects inserted at the current position, and members without a row
//! are either filtered out or gone from the server.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::collation::Collation;
use crate::error::{CatalogError, Result};
use crate::execution::ReaderGuard;
use crate::key::{ID_FIELD, KeyKind, ObjectKey};
use crate::object::{ObjectId, ParentLink};
use crate::preferences::ScriptingPreferences;
use crate::property::BagState;
use crate::provider::{LevelFields, OrderBy, Request, Row};
use crate::registry::CollectionOrder;
use crate::state::ObjectState;
use crate::tree::{ObjectTree, order_compare};
use crate::urn::{Condition, Urn, UrnSegment, UrnSuffix};
use crate::value::PropertyValue;

/// Options of a bulk initialization.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Fetch the scripting field list and flag objects as initialized for
    /// scripting.
    pub for_scripting: bool,
    /// Target used to select scripting fields; defaults to the server.
    pub preferences: Option<ScriptingPreferences>,
    /// Additional deepest-level fields.
    pub extra_fields: Vec<String>,
    /// Return the path of every deepest-level object, in row order.
    pub collect_urns: bool,
}

/// Outcome of a bulk initialization.
#[derive(Debug, Clone, Default)]
pub struct InitResult {
    /// Deepest-level objects in row order.
    pub objects: Vec<ObjectId>,
    /// Their paths, when requested.
    pub urns: Vec<Urn>,
}

struct LevelPlan {
    type_name: &'static str,
    slot: usize,
    key_kind: KeyKind,
    order: CollectionOrder,
    singleton: bool,
    prefix: String,
    order_fields: Vec<&'static str>,
    collation_property: Option<&'static str>,
}

struct RowCursor {
    reader: ReaderGuard,
    current: Option<Row>,
    consumed: usize,
}

impl RowCursor {
    fn open(mut reader: ReaderGuard) -> Result<Self> {
        let current = reader.next_row()?;
        Ok(Self {
            reader,
            current,
            consumed: 0,
        })
    }

    const fn peek(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    fn advance(&mut self) -> Result<()> {
        self.current = self.reader.next_row()?;
        self.consumed += 1;
        Ok(())
    }
}

struct MergeContext {
    leaf_unfiltered: bool,
    path: Vec<(ObjectKey, Collation)>,
    leaf_links: Vec<ParentLink>,
    unmatched: Vec<ObjectId>,
    result: InitResult,
}

enum Resolution {
    Object(ObjectId),
    Abandon,
}

impl ObjectTree {
    /// Loads a child collection with one query. `filter` restricts the
    /// members; a filtered load does not mark the collection initialized.
    pub fn initialize_collection(
        &mut self,
        parent: ObjectId,
        child_type: &str,
        filter: Vec<Condition>,
        extra_fields: &[&str],
    ) -> Result<InitResult> {
        let suffix = UrnSuffix::new(vec![UrnSegment::filtered(child_type, filter)]);
        let options = InitOptions {
            extra_fields: extra_fields.iter().map(ToString::to_string).collect(),
            ..InitOptions::default()
        };
        self.init_child_level(parent, &suffix, &options)
    }

    /// Reloads a collection: fetched values are discarded (local edits are
    /// kept), new server objects are added and vanished ones dropped.
    pub fn refresh_collection(&mut self, parent: ObjectId, child_type: &str) -> Result<InitResult> {
        self.check_id(parent)?;
        let link = self.link_for(parent, child_type)?;
        for member in self.collection(link)?.members().to_vec() {
            let object = self.obj_mut(member);
            if object.state().is_persisted() {
                object.bag_mut().reset();
                object.set_initialized_for_scripting(false);
            }
        }
        self.collection_mut(link)?.set_initialized(false);
        self.initialize_collection(parent, child_type, Vec::new(), &[])
    }

    /// Discards every loaded server object of a collection and loads it
    /// again. Handles to the discarded objects report them dropped; new
    /// objects not yet created are kept.
    pub fn clear_and_initialize(
        &mut self,
        parent: ObjectId,
        child_type: &str,
    ) -> Result<InitResult> {
        self.check_id(parent)?;
        let link = self.link_for(parent, child_type)?;
        let stale: Vec<ObjectId> = self
            .collection(link)?
            .members()
            .iter()
            .copied()
            .filter(|m| self.obj(*m).state().is_persisted())
            .collect();
        for member in stale {
            self.mark_dropped(member);
            self.remove_from_parent(member);
        }
        self.collection_mut(link)?.set_initialized(false);
        self.initialize_collection(parent, child_type, Vec::new(), &[])
    }

    /// Loads every level of `suffix` below `anchor` with a single query and
    /// merges the rows into the tree.
    pub fn init_child_level(
        &mut self,
        anchor: ObjectId,
        suffix: &UrnSuffix,
        options: &InitOptions,
    ) -> Result<InitResult> {
        self.check_id(anchor)?;
        if suffix.segments().is_empty() {
            return Err(CatalogError::InvalidUrn {
                urn: suffix.to_string(),
                reason: "empty child level".to_string(),
            });
        }
        if !self.obj(anchor).state().is_persisted() {
            return Ok(InitResult::default());
        }
        let plans = self.plan_levels(anchor, suffix)?;

        // The reader stays open during the merge, so collations must be
        // known before it is opened.
        self.comparer(anchor)?;

        let request = self.level_request(anchor, suffix, &plans, options)?;
        let reader = self.execution.open_reader(&request)?;
        let mut cursor = RowCursor::open(reader)?;
        let mut ctx = MergeContext {
            leaf_unfiltered: suffix.is_leaf_unfiltered(),
            path: Vec::new(),
            leaf_links: Vec::new(),
            unmatched: Vec::new(),
            result: InitResult::default(),
        };
        if plans.len() == 1 {
            ctx.leaf_links.push(ParentLink {
                object: anchor,
                slot: plans[0].slot,
            });
        }
        self.merge_level(&mut cursor, anchor, &plans, 0, &mut ctx, options)?;
        let rows = cursor.consumed;
        drop(cursor);

        if ctx.leaf_unfiltered {
            for link in &ctx.leaf_links {
                self.collection_mut(*link)?.set_initialized(true);
            }
            for id in std::mem::take(&mut ctx.unmatched) {
                if self.obj(id).state().is_persisted() {
                    debug!(object = %id, "Object no longer exists on the server");
                    self.mark_dropped(id);
                    self.remove_from_parent(id);
                }
            }
        }
        info!(
            urn = %request.urn,
            rows,
            objects = ctx.result.objects.len(),
            "Initialized child level"
        );
        Ok(ctx.result)
    }

    fn plan_levels(&self, anchor: ObjectId, suffix: &UrnSuffix) -> Result<Vec<LevelPlan>> {
        let registry = Arc::clone(self.registry());
        let count = suffix.segments().len();
        let mut parent_type = self.obj(anchor).type_name();
        let mut plans = Vec::with_capacity(count);
        for (index, segment) in suffix.segments().iter().enumerate() {
            let slot = registry.child_slot(parent_type, &segment.type_name)?;
            let singleton = registry.get(parent_type)?.children()[slot].singleton;
            let descriptor = registry.get(&segment.type_name)?;
            let prefix = if index + 1 == count {
                String::new()
            } else {
                format!("{}_", descriptor.name())
            };
            plans.push(LevelPlan {
                type_name: descriptor.name(),
                slot,
                key_kind: descriptor.key_kind(),
                order: descriptor.collection_order(),
                singleton,
                prefix,
                order_fields: registry.order_fields(descriptor.name())?,
                collation_property: descriptor.collation(),
            });
            parent_type = descriptor.name();
        }
        Ok(plans)
    }

    fn level_request(
        &self,
        anchor: ObjectId,
        suffix: &UrnSuffix,
        plans: &[LevelPlan],
        options: &InitOptions,
    ) -> Result<Request> {
        let Some((leaf, parents)) = plans.split_last() else {
            return Err(CatalogError::Internal("no level to initialize".to_string()));
        };
        let server = self.server_info();
        let provider = self.metadata_provider();
        let data_fields = if options.for_scripting {
            let preferences = options
                .preferences
                .clone()
                .unwrap_or_else(|| ScriptingPreferences::for_direct_execution(server))
                .resolved(server);
            provider.script_fields(leaf.type_name, &preferences)
        } else {
            provider.default_fields(leaf.type_name, server)
        };
        let mut fields: Vec<String> = leaf.order_fields.iter().map(ToString::to_string).collect();
        for field in data_fields.into_iter().chain(options.extra_fields.iter().cloned()) {
            if !fields.contains(&field) {
                fields.push(field);
            }
        }

        let parent_fields = parents
            .iter()
            .map(|plan| {
                let mut fields: Vec<String> =
                    plan.order_fields.iter().map(ToString::to_string).collect();
                if let Some(property) = plan.collation_property {
                    fields.push(property.to_string());
                }
                LevelFields {
                    type_name: plan.type_name.to_string(),
                    fields,
                }
            })
            .collect();

        let order_by = plans
            .iter()
            .filter(|plan| !plan.singleton)
            .flat_map(|plan| {
                plan.order_fields
                    .iter()
                    .map(move |field| OrderBy::asc(format!("{}{field}", plan.prefix)))
            })
            .collect();

        Ok(Request {
            urn: self.urn(anchor)?.join(suffix),
            fields,
            parent_fields,
            order_by,
        })
    }

    fn merge_level(
        &mut self,
        cursor: &mut RowCursor,
        parent: ObjectId,
        plans: &[LevelPlan],
        depth: usize,
        ctx: &mut MergeContext,
        options: &InitOptions,
    ) -> Result<()> {
        let plan = &plans[depth];
        let last = depth + 1 == plans.len();
        let link = ParentLink {
            object: parent,
            slot: plan.slot,
        };
        let collation = self.comparer_no_fetch(parent);
        let was_initialized = self.collection(link)?.is_initialized();
        if last && depth > 0 {
            ctx.leaf_links.push(link);
        }
        let mut position = 0;

        while let Some(row) = cursor.peek().cloned() {
            if !row_belongs(&row, plans, depth, &ctx.path) {
                break;
            }
            let row_key = ObjectKey::from_row(plan.key_kind, &row, &plan.prefix)
                .map_err(CatalogError::Internal)?;
            let resolved = if plan.singleton {
                if let Some(&member) = self.collection(link)?.members().first() {
                    self.adopt_created(member);
                    member
                } else {
                    let id = self.materialize(link, row_key)?;
                    self.collection_mut(link)?.insert_at(0, id);
                    id
                }
            } else {
                let row_id = row
                    .get(&format!("{}{ID_FIELD}", plan.prefix))
                    .and_then(PropertyValue::as_i64);
                let step = MergeStep {
                    link,
                    plan,
                    collation: &collation,
                    was_initialized,
                    last,
                };
                match self.resolve_member(&step, &mut position, &row_key, row_id, ctx)? {
                    Resolution::Object(id) => id,
                    Resolution::Abandon => {
                        while let Some(row) = cursor.peek() {
                            if !row_belongs(row, plans, depth, &ctx.path) {
                                break;
                            }
                            cursor.advance()?;
                        }
                        return Ok(());
                    }
                }
            };

            if last {
                let object = self.obj_mut(resolved);
                let bag = object.bag_mut();
                bag.absorb(row.fields_with_prefix(""), true)?;
                bag.promote(if options.for_scripting {
                    BagState::Full
                } else {
                    BagState::Lazy
                });
                if options.for_scripting {
                    object.set_initialized_for_scripting(true);
                }
                if options.collect_urns {
                    let urn = self.urn(resolved)?;
                    ctx.result.urns.push(urn);
                }
                ctx.result.objects.push(resolved);
                cursor.advance()?;
            } else {
                self.obj_mut(resolved)
                    .bag_mut()
                    .absorb(row.fields_with_prefix(&plan.prefix), true)?;
                let key = self
                    .obj(resolved)
                    .key()
                    .cloned()
                    .ok_or_else(|| {
                        CatalogError::Internal("merged object without a key".to_string())
                    })?;
                let before = cursor.consumed;
                ctx.path.push((key, collation.clone()));
                self.merge_level(cursor, resolved, plans, depth + 1, ctx, options)?;
                ctx.path.pop();
                if cursor.consumed == before {
                    cursor.advance()?;
                }
            }
            if let Some(index) = self.collection(link)?.position_of(resolved) {
                position = index + 1;
            }
        }

        if last && !was_initialized && ctx.leaf_unfiltered {
            let members = self.collection(link)?.members();
            for &member in members.iter().skip(position) {
                if self.obj(member).state().is_persisted() {
                    ctx.unmatched.push(member);
                }
            }
        }
        Ok(())
    }

    fn resolve_member(
        &mut self,
        step: &MergeStep<'_>,
        position: &mut usize,
        row_key: &ObjectKey,
        row_id: Option<i64>,
        ctx: &mut MergeContext,
    ) -> Result<Resolution> {
        loop {
            let Some(&member) = self.collection(step.link)?.members().get(*position) else {
                return self.place_new(step, *position, row_key);
            };
            let object = self.obj(member);
            let Some(member_key) = object.key() else {
                *position += 1;
                continue;
            };
            // A new object the server already has takes the row over.
            let persisted = object.state().is_persisted();
            let mergeable = persisted || object.state() == ObjectState::Creating;
            if mergeable && member_key.eq_with(row_key, step.collation) {
                self.adopt_created(member);
                return Ok(Resolution::Object(member));
            }
            let ordering = order_compare(
                step.plan.order,
                (member_key, object.numeric_id()),
                (row_key, row_id),
                step.collation,
            );
            if ordering != Ordering::Less {
                return self.place_new(step, *position, row_key);
            }
            if persisted && step.last && ctx.leaf_unfiltered {
                if step.was_initialized {
                    warn!(
                        type_name = step.plan.type_name,
                        member = %member_key,
                        row = %row_key,
                        "Initialized collection is out of sync with the server, skipping branch"
                    );
                    return Ok(Resolution::Abandon);
                }
                ctx.unmatched.push(member);
            }
            *position += 1;
        }
    }

    fn place_new(
        &mut self,
        step: &MergeStep<'_>,
        position: usize,
        key: &ObjectKey,
    ) -> Result<Resolution> {
        let existing = self
            .collection(step.link)?
            .members()
            .iter()
            .copied()
            .find(|m| {
                let object = self.obj(*m);
                let state = object.state();
                (state.is_persisted() || state == ObjectState::Creating)
                    && object.key().is_some_and(|k| k.eq_with(key, step.collation))
            });
        if let Some(existing) = existing {
            self.adopt_created(existing);
            return Ok(Resolution::Object(existing));
        }
        let id = self.materialize(step.link, key.clone())?;
        self.collection_mut(step.link)?.insert_at(position, id);
        debug!(
            type_name = step.plan.type_name,
            key = %key,
            id = %id,
            "Discovered object"
        );
        Ok(Resolution::Object(id))
    }

    /// Moves a new object found on the server to `Existing`. Its local
    /// edits stay dirty and are applied by the next alter.
    pub(crate) fn adopt_created(&mut self, id: ObjectId) {
        let object = self.obj_mut(id);
        if object.state() == ObjectState::Creating {
            object.set_state(ObjectState::Existing);
            info!(object = %id, "New object already exists on the server");
        }
    }
}

struct MergeStep<'a> {
    link: ParentLink,
    plan: &'a LevelPlan,
    collation: &'a Collation,
    was_initialized: bool,
    last: bool,
}

/// Returns true if the row's ancestor keys match the objects currently
/// being merged at every level above `depth`.
fn row_belongs(
    row: &Row,
    plans: &[LevelPlan],
    depth: usize,
    path: &[(ObjectKey, Collation)],
) -> bool {
    plans[..depth]
        .iter()
        .zip(path)
        .filter(|(plan, _)| !plan.singleton)
        .all(|(plan, (key, collation))| {
            ObjectKey::from_row(plan.key_kind, row, &plan.prefix)
                .is_ok_and(|row_key| row_key.eq_with(key, collation))
        })
}
