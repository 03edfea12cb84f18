mod common;

use common::{lines, push, store, trace};
use recast_core::{Event, Options, Value};
use serde_json::json;

#[test]
fn set_fires_one_change_attr_per_changed_attribute_then_one_change() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann", "age": 30}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| match event {
        Event::ChangeAttr { attr, .. } => push(&log, format!("change:{attr}")),
        Event::Change { .. } => push(&log, "change"),
        _ => {}
    });

    store
        .set(user, json!({"name": "bob", "age": 30}), &Options::default())
        .expect("set must apply");

    assert_eq!(lines(&t), vec!["change:name", "change"]);
    assert_eq!(store.get(user, "name"), Some(&Value::Str("bob".into())));
}

#[test]
fn setting_the_same_value_fires_nothing() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann"}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| push(&log, format!("{event:?}")));

    store
        .set(user, json!({"name": "ann"}), &Options::default())
        .expect("set must apply");

    assert!(lines(&t).is_empty(), "no-op set must stay silent");
}

#[test]
fn undefined_and_null_are_distinct_values() {
    let mut store = store();
    let user = store
        .create_record("User", json!({}))
        .expect("user must construct");
    assert_eq!(store.get(user, "name"), Some(&Value::Undefined));

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| {
        if let Event::ChangeAttr { attr, .. } = event {
            push(&log, format!("change:{attr}"));
        }
    });

    store
        .set(user, json!({"name": null}), &Options::default())
        .expect("set must apply");
    assert_eq!(store.get(user, "name"), Some(&Value::Null));
    assert_eq!(lines(&t), vec!["change:name"]);
}

#[test]
fn silent_set_mutates_without_notifications() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann"}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| push(&log, format!("{event:?}")));

    let silent = Options {
        silent: true,
        ..Options::default()
    };
    store
        .set(user, json!({"name": "bob"}), &silent)
        .expect("set must apply");

    assert!(lines(&t).is_empty());
    assert_eq!(store.get(user, "name"), Some(&Value::Str("bob".into())));
}

#[test]
fn values_cast_to_the_declared_attribute_type() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"age": "42", "name": 7}))
        .expect("user must construct");

    assert_eq!(store.get(user, "age"), Some(&Value::Number(42.0)));
    assert_eq!(store.get(user, "name"), Some(&Value::Str("7".into())));
}

#[test]
fn unknown_attributes_are_skipped_not_stored() {
    let mut store = store();
    let user = store
        .create_record("User", json!({"name": "ann"}))
        .expect("user must construct");

    store
        .set(user, json!({"nickname": "annie"}), &Options::default())
        .expect("set must apply");
    assert_eq!(store.get(user, "nickname"), None);
}

#[test]
fn payload_entries_apply_in_payload_order() {
    let mut store = store();
    let user = store
        .create_record("User", json!({}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |_, event| {
        if let Event::ChangeAttr { attr, .. } = event {
            push(&log, attr.clone());
        }
    });

    store
        .set(user, json!({"age": 1, "name": "a"}), &Options::default())
        .expect("set must apply");
    assert_eq!(lines(&t), vec!["age", "name"]);
}

#[test]
fn listener_added_during_dispatch_misses_the_in_flight_event() {
    let mut store = store();
    let user = store
        .create_record("User", json!({}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    store.on(user, move |store, event| {
        if let Event::Change { node } = event {
            push(&log, "outer");
            let inner = log.clone();
            store.on(*node, move |_, _| push(&inner, "inner"));
        }
    });

    store
        .set(user, json!({"name": "ann"}), &Options::default())
        .expect("set must apply");
    assert_eq!(lines(&t), vec!["outer"]);

    store
        .set(user, json!({"name": "bob"}), &Options::default())
        .expect("set must apply");
    // The late listener observes the next episode.
    assert!(lines(&t).iter().filter(|l| *l == "inner").count() >= 1);
}

#[test]
fn removed_listener_stops_firing() {
    let mut store = store();
    let user = store
        .create_record("User", json!({}))
        .expect("user must construct");

    let t = trace();
    let log = t.clone();
    let id = store.on(user, move |_, _| push(&log, "fired"));
    assert!(store.off(user, id));

    store
        .set(user, json!({"name": "ann"}), &Options::default())
        .expect("set must apply");
    assert!(lines(&t).is_empty());
}
