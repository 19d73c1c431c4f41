//! Lifecycle state machine tests: states, verb validation and state-only
//! transitions.

mod common;

use common::{database, names, open_tree, open_tree_with, sample_server, table_id};
use oxide_catalog_core::prelude::*;
use oxide_catalog_core::state::check_transition;

/// Builds an `orders`-like table in `state`.
fn object_in_state(tree: &mut ObjectTree, state: ObjectState) -> ObjectId {
    let db = database(tree);
    match state {
        ObjectState::Pending => tree.new_in_space("Table").unwrap(),
        ObjectState::Creating => tree
            .new_child(db, "Table", ObjectKey::schema("dbo", "fresh"))
            .unwrap(),
        ObjectState::Existing => table_id(tree, "dbo", "orders"),
        ObjectState::ToBeDropped => {
            let orders = table_id(tree, "dbo", "orders");
            tree.mark_for_drop(orders, true).unwrap();
            orders
        }
        ObjectState::Dropped => {
            let orders = table_id(tree, "dbo", "orders");
            tree.drop(orders).unwrap();
            orders
        }
    }
}

/// Runs `verb` through its public operation.
fn run_verb(
    tree: &mut ObjectTree,
    id: ObjectId,
    verb: Verb,
    parent: ObjectId,
) -> Result<(), CatalogError> {
    match verb {
        Verb::Create => tree.create(id),
        Verb::CreateOrAlter => tree.create_or_alter(id),
        Verb::Alter => tree.alter(id),
        Verb::Drop => tree.drop(id),
        Verb::DropIfExists => tree.drop_if_exists(id),
        Verb::Rename => tree.rename(id, "renamed"),
        Verb::ChangeOwner => tree.change_owner(id, "auditor"),
        Verb::Refresh => tree.refresh(id).map(|_| ()),
        Verb::Script => tree.script(id, None).map(|_| ()),
        Verb::MarkForDrop => tree.mark_for_drop(id, true),
        Verb::SetProperty => tree.set_property(id, "Description", "edited"),
        Verb::Touch => tree.touch(id),
        Verb::Remove => tree.remove_child(id),
        Verb::SetKey => tree.set_key(id, ObjectKey::schema("dbo", "renamed")),
        Verb::SetParent => tree.set_parent(id, parent),
    }
}

fn is_state_rejection(err: &CatalogError) -> bool {
    matches!(
        err,
        CatalogError::InvalidState { .. }
            | CatalogError::ObjectDropped { .. }
            | CatalogError::ParentNotSet { .. }
    )
}

#[test]
fn test_new_object_is_pending_until_key_and_parent_are_set() {
    let (mut tree, _) = open_tree(sample_server());
    let db = database(&mut tree);

    let table = tree.new_in_space("Table").unwrap();
    assert_eq!(tree.state(table).unwrap(), ObjectState::Pending);

    tree.set_key(table, ObjectKey::schema("dbo", "invoices"))
        .unwrap();
    assert_eq!(tree.state(table).unwrap(), ObjectState::Pending);

    tree.set_parent(table, db).unwrap();
    assert_eq!(tree.state(table).unwrap(), ObjectState::Creating);
    assert!(tree.loaded_members(db, "Table").contains(&table));
}

#[test]
fn test_pending_object_reports_missing_fields() {
    let (mut tree, _) = open_tree(sample_server());
    let table = tree.new_in_space("Table").unwrap();

    match tree.create(table).unwrap_err() {
        CatalogError::ParentNotSet { type_name, missing } => {
            assert_eq!(type_name, "Table");
            assert_eq!(missing, vec!["Schema", "Name", "Parent"]);
        }
        other => panic!("Expected ParentNotSet, got {other:?}"),
    }

    // Writes are allowed while pending.
    tree.set_property(table, "Description", "draft").unwrap();
}

#[test]
fn test_key_must_match_type() {
    let (mut tree, _) = open_tree(sample_server());
    let table = tree.new_in_space("Table").unwrap();

    let err = tree
        .set_key(table, ObjectKey::simple("invoices"))
        .unwrap_err();
    assert!(matches!(err, CatalogError::InvalidKey { .. }));

    let err = tree
        .set_key(table, ObjectKey::schema("dbo", ""))
        .unwrap_err();
    assert!(matches!(err, CatalogError::InvalidKey { .. }));
}

#[test]
fn test_duplicate_new_child_is_looked_up_on_server() {
    let (mut tree, _) = open_tree(sample_server());
    let db = database(&mut tree);

    // Not loaded yet; found on the server with case-insensitive matching.
    let err = tree
        .new_child(db, "Table", ObjectKey::schema("DBO", "ORDERS"))
        .unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateObject { .. }));
}

#[test]
fn test_create_commits_object_and_children() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);

    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "invoices"))
        .unwrap();
    let id = tree
        .new_child(table, "Column", ObjectKey::simple("id"))
        .unwrap();
    let amount = tree
        .new_child(table, "Column", ObjectKey::simple("amount"))
        .unwrap();
    tree.set_property(amount, "DataType", "REAL").unwrap();

    tree.create(table).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["CREATE Table [dbo].[invoices] (id, amount)".to_string()]
    );
    for object in [table, id, amount] {
        assert_eq!(tree.state(object).unwrap(), ObjectState::Existing);
        assert!(!tree.object(object).unwrap().bag().is_dirty());
    }
    // Value stamped by the post-create hook.
    let hook_value = tree
        .object(table)
        .unwrap()
        .bag()
        .get("IsSystemObject")
        .cloned();
    assert_eq!(hook_value, Some(PropertyValue::Bool(false)));
}

#[test]
fn test_create_requires_existing_parent() {
    let (mut tree, _) = open_tree(sample_server());
    let db = database(&mut tree);

    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "invoices"))
        .unwrap();
    let column = tree
        .new_child(table, "Column", ObjectKey::simple("id"))
        .unwrap();

    let err = tree.create(column).unwrap_err();
    assert!(matches!(
        err,
        CatalogError::InvalidState {
            verb: Verb::Create,
            state: ObjectState::Creating,
            ..
        }
    ));
}

#[test]
fn test_create_on_existing_object_is_invalid() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    let err = tree.create(orders).unwrap_err();
    assert!(matches!(
        err,
        CatalogError::InvalidState {
            verb: Verb::Create,
            state: ObjectState::Existing,
            ..
        }
    ));
    assert!(state.borrow().executed.is_empty());
}

#[test]
fn test_dropped_object_rejects_operations() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let orders = table_id(&mut tree, "dbo", "orders");

    tree.drop(orders).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["DROP Table [dbo].[orders]".to_string()]
    );
    assert_eq!(tree.state(orders).unwrap(), ObjectState::Dropped);
    assert!(!tree.loaded_members(db, "Table").contains(&orders));

    assert!(tree.alter(orders).unwrap_err().is_object_dropped());
    assert!(
        tree.set_property(orders, "Description", "x")
            .unwrap_err()
            .is_object_dropped()
    );
    assert!(
        tree.property(orders, "Description")
            .unwrap_err()
            .is_object_dropped()
    );
    assert!(tree.script(orders, None).unwrap_err().is_object_dropped());

    // The path is still computable from the kept back-reference.
    assert_eq!(
        tree.urn(orders).unwrap().to_string(),
        "Server[@Name='mem']/Database[@Name='main']/Table[@Name='orders' and @Schema='dbo']"
    );
}

#[test]
fn test_drop_cascades_to_loaded_descendants() {
    let (mut tree, _) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");
    let columns = tree.children(orders, "Column").unwrap();

    tree.drop(orders).unwrap();

    for column in columns {
        assert_eq!(tree.state(column).unwrap(), ObjectState::Dropped);
    }
}

#[test]
fn test_drop_of_new_object_is_local() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "scratch"))
        .unwrap();

    tree.drop(table).unwrap();

    assert!(state.borrow().executed.is_empty());
    assert_eq!(tree.state(table).unwrap(), ObjectState::Dropped);
    assert!(!tree.loaded_members(db, "Table").contains(&table));
}

#[test]
fn test_drop_if_exists_requires_version() {
    let (mut tree, state) = open_tree_with(sample_server(), |info| {
        info.version = ServerVersion::new(12, 0, 0);
    });
    let orders = table_id(&mut tree, "dbo", "orders");

    let err = tree.drop_if_exists(orders).unwrap_err();
    assert!(matches!(err, CatalogError::UnsupportedVersion { .. }));
    assert_eq!(tree.state(orders).unwrap(), ObjectState::Existing);
    assert!(state.borrow().executed.is_empty());
}

#[test]
fn test_drop_if_exists_scripts_guard() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    tree.drop_if_exists(orders).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["DROP IF EXISTS Table [dbo].[orders]".to_string()]
    );
    assert_eq!(tree.state(orders).unwrap(), ObjectState::Dropped);
}

#[test]
fn test_severe_failure_on_connection_owner_drop_is_ignored() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    {
        let mut state = state.borrow_mut();
        state.fail_on = Some("DROP Database".to_string());
        state.fail_code = 596;
        state.fail_severity = 21;
    }

    tree.drop(db).unwrap();
    assert_eq!(tree.state(db).unwrap(), ObjectState::Dropped);
}

#[test]
fn test_severe_failure_on_other_drop_is_reported() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");
    {
        let mut state = state.borrow_mut();
        state.fail_on = Some("DROP Table".to_string());
        state.fail_code = 596;
    }

    let err = tree.drop(orders).unwrap_err();
    assert!(matches!(
        err,
        CatalogError::FailedOperation {
            verb: Verb::Drop,
            ..
        }
    ));
    assert_eq!(tree.state(orders).unwrap(), ObjectState::Existing);
}

#[test]
fn test_remove_child_returns_object_to_pending() {
    let (mut tree, _) = open_tree(sample_server());
    let db = database(&mut tree);
    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "scratch"))
        .unwrap();

    tree.remove_child(table).unwrap();
    assert_eq!(tree.state(table).unwrap(), ObjectState::Pending);
    assert!(!tree.loaded_members(db, "Table").contains(&table));

    tree.set_parent(table, db).unwrap();
    assert_eq!(tree.state(table).unwrap(), ObjectState::Creating);
}

#[test]
fn test_remove_child_rejects_existing_object() {
    let (mut tree, _) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    let err = tree.remove_child(orders).unwrap_err();
    assert!(matches!(
        err,
        CatalogError::InvalidState {
            verb: Verb::Remove,
            ..
        }
    ));
}

#[test]
fn test_rename_resorts_collection() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let tables = tree.children(db, "Table").unwrap();
    assert_eq!(names(&tree, &tables), vec!["customers", "orders", "audit"]);

    let orders = table_id(&mut tree, "dbo", "orders");
    tree.rename(orders, "archive").unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["RENAME Table [dbo].[orders] TO archive".to_string()]
    );
    let tables = tree.loaded_members(db, "Table");
    assert_eq!(names(&tree, &tables), vec!["archive", "customers", "audit"]);
    assert_eq!(tree.view(orders).unwrap().name(), "archive");
}

#[test]
fn test_rename_rejects_existing_name() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    let err = tree.rename(orders, "CUSTOMERS").unwrap_err();
    assert!(matches!(err, CatalogError::DuplicateObject { .. }));
    assert!(state.borrow().executed.is_empty());
}

#[test]
fn test_unsupported_verb_fails_before_io() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");
    let index = tree
        .child(orders, "Index", &ObjectKey::simple("ix_customer"))
        .unwrap()
        .unwrap();

    let err = tree.rename(index, "ix_other").unwrap_err();
    assert!(matches!(
        err,
        CatalogError::UnsupportedOperation {
            verb: Verb::Rename,
            ..
        }
    ));
    assert!(state.borrow().executed.is_empty());
}

#[test]
fn test_mark_for_drop_toggles_state() {
    let (mut tree, _) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    tree.mark_for_drop(orders, true).unwrap();
    assert_eq!(tree.state(orders).unwrap(), ObjectState::ToBeDropped);
    assert!(tree.set_property(orders, "Description", "x").is_err());

    tree.mark_for_drop(orders, false).unwrap();
    assert_eq!(tree.state(orders).unwrap(), ObjectState::Existing);
}

#[test]
fn test_touch_forces_alter_script() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    tree.alter(orders).unwrap();
    assert!(state.borrow().executed.is_empty());

    tree.touch(orders).unwrap();
    assert!(tree.object(orders).unwrap().is_touched());
    tree.alter(orders).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["ALTER Table [dbo].[orders] SET ".to_string()]
    );
    assert!(!tree.object(orders).unwrap().is_touched());
}

#[test]
fn test_recording_captures_without_commit() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    tree.set_execution_mode(ExecutionMode::Record);

    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "draft"))
        .unwrap();
    tree.create(table).unwrap();

    assert!(state.borrow().executed.is_empty());
    assert_eq!(
        tree.execution().captured_sql(),
        ["CREATE Table [dbo].[draft]".to_string()]
    );
    assert_eq!(tree.state(table).unwrap(), ObjectState::Creating);

    // Alter is allowed on new objects while recording.
    tree.alter(table).unwrap();

    tree.execution_mut().clear_captured();
    assert!(tree.execution().captured_sql().is_empty());
}

#[test]
fn test_execute_and_record_commits() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    tree.set_execution_mode(ExecutionMode::ExecuteAndRecord);

    let table = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "kept"))
        .unwrap();
    tree.create(table).unwrap();

    assert_eq!(state.borrow().executed.len(), 1);
    assert_eq!(tree.execution_mut().take_captured().len(), 1);
    assert_eq!(tree.state(table).unwrap(), ObjectState::Existing);
}

#[test]
fn test_create_or_alter_commits_either_way() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let orders = table_id(&mut tree, "dbo", "orders");
    let fresh = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "fresh"))
        .unwrap();

    tree.create_or_alter(orders).unwrap();
    tree.create_or_alter(fresh).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec![
            "CREATE OR ALTER Table [dbo].[orders]".to_string(),
            "CREATE OR ALTER Table [dbo].[fresh]".to_string(),
        ]
    );
    assert_eq!(tree.state(fresh).unwrap(), ObjectState::Existing);
}

#[test]
fn test_create_or_alter_requires_version() {
    let (mut tree, _) = open_tree_with(sample_server(), |info| {
        info.version = ServerVersion::new(11, 0, 0);
    });
    let orders = table_id(&mut tree, "dbo", "orders");

    let err = tree.create_or_alter(orders).unwrap_err();
    assert!(matches!(err, CatalogError::UnsupportedVersion { .. }));
}

#[test]
fn test_find_by_urn() {
    let (mut tree, _) = open_tree(sample_server());
    let urn = Urn::parse(
        "Server[@Name='mem']/Database[@Name='main']/Table[@Name='orders' and @Schema='dbo']/Column[@Name='total']",
    )
    .unwrap();

    let column = tree.find_by_urn(&urn).unwrap().expect("column found");
    assert_eq!(tree.urn(column).unwrap(), urn);

    let missing = Urn::parse(
        "Server[@Name='mem']/Database[@Name='main']/Table[@Name='nope' and @Schema='dbo']",
    )
        .unwrap();
    assert_eq!(tree.find_by_urn(&missing).unwrap(), None);

    let other_server = Urn::parse("Server[@Name='elsewhere']/Database[@Name='main']").unwrap();
    assert_eq!(tree.find_by_urn(&other_server).unwrap(), None);
}

#[test]
fn test_every_verb_is_checked_against_every_state() {
    for state in ObjectState::ALL {
        for verb in Verb::ALL {
            let (mut tree, server) = open_tree(sample_server());
            let db = database(&mut tree);
            let id = object_in_state(&mut tree, state);
            assert_eq!(tree.state(id).unwrap(), state);
            let executed = server.borrow().executed.len();

            let outcome = run_verb(&mut tree, id, verb, db);

            if check_transition(state, verb, false).is_ok() {
                if let Err(err) = outcome {
                    assert!(!is_state_rejection(&err), "{verb} on {state}: {err}");
                }
                continue;
            }
            let Err(err) = outcome else {
                panic!("{verb} on {state} was not rejected");
            };
            assert!(is_state_rejection(&err), "{verb} on {state}: {err}");
            assert_eq!(tree.state(id).unwrap(), state, "{verb} on {state}");
            assert_eq!(
                server.borrow().executed.len(),
                executed,
                "{verb} on {state}"
            );
        }
    }
}

#[test]
fn test_drop_marks_every_loaded_dependent_dropped() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let orders = table_id(&mut tree, "dbo", "orders");
    let columns = tree.children(orders, "Column").unwrap();
    let indexes = tree.children(orders, "Index").unwrap();
    let default = tree
        .singleton(columns[2], "DefaultConstraint")
        .unwrap()
        .expect("total has a default");

    tree.drop(orders).unwrap();

    assert_eq!(
        state.borrow().executed,
        vec!["DROP Table [dbo].[orders]".to_string()]
    );
    let mut dependents = columns.clone();
    dependents.extend(&indexes);
    dependents.push(default);
    for id in &dependents {
        assert_eq!(tree.state(*id).unwrap(), ObjectState::Dropped);
    }
    assert!(!tree.loaded_members(db, "Table").contains(&orders));

    assert!(
        tree.rename(columns[0], "key")
            .unwrap_err()
            .is_object_dropped()
    );
    assert!(
        tree.set_property(columns[1], "DataType", "TEXT")
            .unwrap_err()
            .is_object_dropped()
    );
    assert!(tree.alter(indexes[0]).unwrap_err().is_object_dropped());
    assert!(tree.drop(indexes[1]).unwrap_err().is_object_dropped());
    assert!(
        tree.mark_for_drop(indexes[1], true)
            .unwrap_err()
            .is_object_dropped()
    );
    assert!(tree.script(default, None).unwrap_err().is_object_dropped());
    assert_eq!(state.borrow().executed.len(), 1);
}

#[test]
fn test_change_owner_records_new_owner() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");

    tree.change_owner(orders, "auditor").unwrap();

    assert_eq!(
        state.borrow().executed,
        vec![
            "ALTER AUTHORIZATION ON Table [dbo].[orders] TO auditor".to_string(),
        ]
    );
    let before = state.borrow().reader_requests();
    assert_eq!(
        tree.property(orders, "Owner").unwrap(),
        PropertyValue::from("auditor")
    );
    assert_eq!(state.borrow().reader_requests(), before);
    assert!(!tree.view(orders).unwrap().is_dirty("Owner"));
}

#[test]
fn test_failed_change_owner_keeps_old_owner() {
    let (mut tree, state) = open_tree(sample_server());
    let orders = table_id(&mut tree, "dbo", "orders");
    state.borrow_mut().fail_on = Some("AUTHORIZATION".to_string());

    let err = tree.change_owner(orders, "auditor").unwrap_err();

    assert!(matches!(
        err,
        CatalogError::FailedOperation {
            verb: Verb::ChangeOwner,
            ..
        }
    ));
    assert_eq!(
        tree.property(orders, "Owner").unwrap(),
        PropertyValue::from("dbo")
    );
}

#[test]
fn test_change_owner_needs_capability_and_existing_object() {
    let (mut tree, state) = open_tree(sample_server());
    let db = database(&mut tree);
    let orders = table_id(&mut tree, "dbo", "orders");
    let index = tree
        .child(orders, "Index", &ObjectKey::simple("pk_orders"))
        .unwrap()
        .unwrap();
    let fresh = tree
        .new_child(db, "Table", ObjectKey::schema("dbo", "fresh"))
        .unwrap();

    let err = tree.change_owner(index, "auditor").unwrap_err();
    assert!(matches!(
        err,
        CatalogError::UnsupportedOperation {
            verb: Verb::ChangeOwner,
            ..
        }
    ));
    let err = tree.change_owner(fresh, "auditor").unwrap_err();
    assert!(matches!(
        err,
        CatalogError::InvalidState {
            verb: Verb::ChangeOwner,
            state: ObjectState::Creating,
            ..
        }
    ));
    assert!(state.borrow().executed.is_empty());
}
