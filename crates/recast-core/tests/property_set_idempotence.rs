mod common;

use common::{lines, push, store, trace};
use proptest::prelude::*;
use recast_core::{elements, Options};
use serde_json::json;

proptest! {
    /// Applying the same payload a second time must change nothing and
    /// notify nobody.
    #[test]
    fn repeated_record_set_is_silent(
        name in "[a-z]{0,8}",
        age in -1000i32..1000,
    ) {
        let mut store = store();
        let user = store
            .create_record("User", json!({}))
            .expect("user must construct");
        let payload = json!({"name": name, "age": age});

        store.set(user, payload.clone(), &Options::default()).expect("first set");
        let after_first = store.record_to_json(user).expect("serialize");

        let t = trace();
        let log = t.clone();
        store.on(user, move |_, event| push(&log, format!("{event:?}")));
        store.set(user, payload, &Options::default()).expect("second set");

        prop_assert!(lines(&t).is_empty(), "second set fired: {:?}", lines(&t));
        prop_assert_eq!(store.record_to_json(user).expect("serialize"), after_first);
    }

    /// Reconciling a collection against its own serialized state is a
    /// structural no-op.
    #[test]
    fn set_against_own_state_changes_no_membership(
        ids in proptest::collection::btree_set(0i64..50, 1..12),
    ) {
        let mut store = store();
        let payload: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
        let col = store
            .create_collection("User", &payload)
            .expect("collection must construct");
        let before = store.models(col).to_vec();

        let t = trace();
        let log = t.clone();
        store.on(col, move |_, event| push(&log, format!("{event:?}")));

        let target = store.collection_to_json(col).expect("serialize");
        let added = store
            .set_elements(col, elements(target), &Options::default())
            .expect("set must apply");

        prop_assert!(added.is_empty());
        prop_assert_eq!(store.models(col), before.as_slice());
        prop_assert!(lines(&t).is_empty(), "events fired: {:?}", lines(&t));
    }

    /// Duplicate ids in one batch collapse to one member however often they
    /// repeat.
    #[test]
    fn duplicate_ids_collapse(
        id in 0i64..10,
        repeats in 2usize..6,
    ) {
        let mut store = store();
        let col = store
            .create_collection("User", &[])
            .expect("collection must construct");
        let batch: Vec<_> = (0..repeats).map(|_| json!({"id": id})).collect();

        store
            .set_elements(col, elements(json!(batch)), &Options::default())
            .expect("set must apply");
        prop_assert_eq!(store.len(col), 1);
        prop_assert!(store.get_by_id(col, &json!(id)).is_some());
    }
}
