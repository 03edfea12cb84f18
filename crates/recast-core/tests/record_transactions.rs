mod common;

use common::{lines, push, store, trace};
use recast_core::{Event, Options, Value};
use serde_json::json;

#[test]
fn explicit_transaction_coalesces_writes_into_one_change() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann", "age": 1}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| match event {
        Event::ChangeAttr { attr, .. } => push(&log, format!("change:{attr}")),
        Event::Change { .. } => push(&log, "change"),
        _ => {}
    });

    store
        .transaction(user, &Options::default(), |store| {
            let _ = store.set(user, json!({"name": "bob"}), &Options::default());
            let _ = store.set(user, json!({"age": 2}), &Options::default());
        })
        .expect("transaction must run");

    assert_eq!(lines(&t), vec!["change:name", "change:age", "change"]);
}

#[test]
fn reentrant_set_from_change_handler_joins_the_episode() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann", "age": 1}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |store, event| match event {
        Event::Change { node } => {
            push(&log, "change");
            // Writes back into the node mid-notification. The write joins
            // the in-flight transaction; a second `change` must not fire.
            let _ = store.set(*node, json!({"age": 2}), &Options::default());
        }
        Event::ChangeAttr { attr, .. } => push(&log, format!("change:{attr}")),
        _ => {}
    });

    store
        .set(user, json!({"name": "bob"}), &Options::default())
        .expect("set must apply");

    assert_eq!(lines(&t), vec!["change:name", "change", "change:age"]);
    assert_eq!(store.get(user, "age"), Some(&Value::Number(2.0)));
}

#[test]
fn previous_and_has_changed_are_visible_during_notification() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann"}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |store, event| {
        if let Event::ChangeAttr { node, attr, .. } = event {
            let prev = store.previous(*node, attr);
            push(
                &log,
                format!(
                    "{attr} changed={} prev={prev:?}",
                    store.has_changed(*node, attr)
                ),
            );
        }
    });

    store
        .set(user, json!({"name": "bob"}), &Options::default())
        .expect("set must apply");

    assert_eq!(
        lines(&t),
        vec![format!(
            "name changed=true prev={:?}",
            Some(Value::Str("ann".to_string()))
        )]
    );
    // Outside of a transaction the snapshot is gone.
    assert_eq!(store.previous(user, "name"), None);
    assert!(!store.has_changed(user, "name"));
}

#[test]
fn nested_payload_updates_the_owned_record_in_place() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann", "profile": {"bio": "old"}}))
        .expect("user must construct");
    let Some(&Value::Record(profile)) = store.get(user, "profile") else {
        panic!("profile must be an owned record");
    };

    store
        .set(user, json!({"profile": {"bio": "new"}}), &Options::default())
        .expect("set must apply");

    // Same child instance, updated in place.
    assert_eq!(store.get(user, "profile"), Some(&Value::Record(profile)));
    assert_eq!(store.get(profile, "bio"), Some(&Value::Str("new".into())));
}

#[test]
fn nested_update_fires_child_events_before_owner_events() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"profile": {"bio": "old"}}))
        .expect("user must construct");
    let Some(&Value::Record(profile)) = store.get(user, "profile") else {
        panic!("profile must be an owned record");
    };

    let t = trace();
    let log = t.clone();
    store.on(profile, move |_, event| {
        if let Event::Change { .. } = event {
            push(&log, "child change");
        }
    });
    let log = t.clone();
    store.on(user, move |_, event| match event {
        Event::ChangeAttr { attr, .. } => push(&log, format!("owner change:{attr}")),
        Event::Change { .. } => push(&log, "owner change"),
        _ => {}
    });

    store
        .set(user, json!({"profile": {"bio": "new"}}), &Options::default())
        .expect("set must apply");

    assert_eq!(
        lines(&t),
        vec!["child change", "owner change:profile", "owner change"]
    );
}
