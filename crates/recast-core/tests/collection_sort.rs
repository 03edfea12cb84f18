mod common;

use common::{lines, push, store, trace};
use recast_core::{elements, Comparator, Event, Options, Value};
use serde_json::json;

#[test]
fn sort_reorders_by_attribute_and_fires_sort_then_change() {
    let mut store = store();
    let col = store
        .create_collection(
            "User",
            &[
                json!({"id": 1, "age": 30}),
                json!({"id": 2, "age": 10}),
                json!({"id": 3, "age": 20}),
            ],
        )
        .expect("collection must construct");
    store
        .set_comparator(col, Some(Comparator::Attr("age".into())))
        .expect("comparator");

    let t = trace();
    let log = t.clone();
    store.on(col, move |_, event| match event {
        Event::Sort { .. } => push(&log, "sort"),
        Event::Change { .. } => push(&log, "change"),
        _ => {}
    });

    assert!(store.sort(col, &Options::default()));
    assert_eq!(
        store.pluck(col, "age"),
        vec![Value::Number(10.0), Value::Number(20.0), Value::Number(30.0)]
    );
    assert_eq!(lines(&t), vec!["sort", "change"]);
}

#[test]
fn sort_on_an_already_sorted_collection_is_silent() {
    let mut store = store();
    let col = store
        .create_collection("User", &[json!({"id": 1, "age": 1}), json!({"id": 2, "age": 2})])
        .expect("collection must construct");
    store
        .set_comparator(col, Some(Comparator::Attr("age".into())))
        .expect("comparator");

    let t = trace();
    let log = t.clone();
    store.on(col, move |_, event| push(&log, format!("{event:?}")));

    assert!(!store.sort(col, &Options::default()));
    assert!(lines(&t).is_empty());
}

#[test]
fn sort_without_a_comparator_is_a_no_op() {
    let mut store = store();
    let col = store
        .create_collection("User", &[json!({"id": 2}), json!({"id": 1})])
        .expect("collection must construct");
    let before = store.models(col).to_vec();
    assert!(!store.sort(col, &Options::default()));
    assert_eq!(store.models(col), before.as_slice());
}

#[test]
fn adds_into_a_sorted_collection_keep_comparator_order() {
    let mut store = store();
    let col = store
        .create_collection("User", &[])
        .expect("collection must construct");
    store
        .set_comparator(col, Some(Comparator::Attr("age".into())))
        .expect("comparator");

    store
        .set_elements(
            col,
            elements(json!([
                {"id": 1, "age": 30},
                {"id": 2, "age": 10}
            ])),
            &Options::default(),
        )
        .expect("set must apply");
    store
        .add(col, elements(json!([{"id": 3, "age": 20}])), &Options::default())
        .expect("add must apply");

    assert_eq!(
        store.pluck(col, "age"),
        vec![Value::Number(10.0), Value::Number(20.0), Value::Number(30.0)]
    );
}

#[test]
fn add_that_lands_in_comparator_order_fires_no_sort() {
    let mut store = store();
    let col = store
        .create_collection("User", &[json!({"id": 1, "age": 10}), json!({"id": 2, "age": 20})])
        .expect("collection must construct");
    store
        .set_comparator(col, Some(Comparator::Attr("age".into())))
        .expect("comparator");

    let t = trace();
    let log = t.clone();
    store.on(col, move |_, event| match event {
        Event::Add { .. } => push(&log, "add"),
        Event::Sort { .. } => push(&log, "sort"),
        Event::Change { .. } => push(&log, "change"),
        _ => {}
    });

    store
        .add(col, elements(json!([{"id": 3, "age": 30}])), &Options::default())
        .expect("add must apply");
    assert_eq!(lines(&t), vec!["add", "change"]);

    store
        .add(col, elements(json!([{"id": 4, "age": 15}])), &Options::default())
        .expect("add must apply");
    assert_eq!(lines(&t), vec!["add", "change", "add", "sort", "change"]);
    assert_eq!(
        store.pluck(col, "age"),
        vec![
            Value::Number(10.0),
            Value::Number(15.0),
            Value::Number(20.0),
            Value::Number(30.0)
        ]
    );
}

#[test]
fn key_and_closure_comparators_order_models() {
    let mut store = store();
    let col = store
        .create_collection(
            "User",
            &[
                json!({"id": 1, "name": "bb"}),
                json!({"id": 2, "name": "a"}),
                json!({"id": 3, "name": "ccc"}),
            ],
        )
        .expect("collection must construct");

    store
        .set_comparator(
            col,
            Some(Comparator::Key(std::sync::Arc::new(|store, cid| {
                match store.get(cid, "name") {
                    Some(Value::Str(s)) => Value::Number(s.len() as f64),
                    _ => Value::Undefined,
                }
            }))),
        )
        .expect("comparator");
    store.sort(col, &Options::default());
    assert_eq!(
        store.pluck(col, "name"),
        vec![
            Value::Str("a".into()),
            Value::Str("bb".into()),
            Value::Str("ccc".into())
        ]
    );

    store
        .set_comparator(
            col,
            Some(Comparator::Cmp(std::sync::Arc::new(|store, a, b| {
                let age = |cid| match store.get(cid, "id") {
                    Some(Value::Number(n)) => *n,
                    _ => f64::NAN,
                };
                age(b).partial_cmp(&age(a)).unwrap_or(std::cmp::Ordering::Equal)
            }))),
        )
        .expect("comparator");
    store.sort(col, &Options::default());
    assert_eq!(
        store.pluck(col, "id"),
        vec![Value::Number(3.0), Value::Number(2.0), Value::Number(1.0)]
    );
}

#[test]
fn stable_sort_keeps_incoming_order_for_equal_keys() {
    let mut store = store();
    let col = store
        .create_collection(
            "User",
            &[
                json!({"id": 1, "age": 5, "name": "first"}),
                json!({"id": 2, "age": 5, "name": "second"}),
            ],
        )
        .expect("collection must construct");
    store
        .set_comparator(col, Some(Comparator::Attr("age".into())))
        .expect("comparator");

    assert!(!store.sort(col, &Options::default()), "equal keys keep order");
    assert_eq!(
        store.pluck(col, "name"),
        vec![Value::Str("first".into()), Value::Str("second".into())]
    );
}
