#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use recast_core::{AttrSpec, RecordSchema, Store, TypeRegistry};

/// Profile -> User -> Team fixture: one nested record edge and one nested
/// collection edge, enough for every ownership shape.
pub fn registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    RecordSchema::define("Profile")
        .attr("bio", AttrSpec::string())
        .attr("avatar", AttrSpec::string())
        .register(&mut registry)
        .expect("Profile must register");
    RecordSchema::define("User")
        .attr("name", AttrSpec::string())
        .attr("age", AttrSpec::number())
        .attr("profile", AttrSpec::record_of("Profile"))
        .register(&mut registry)
        .expect("User must register");
    RecordSchema::define("Team")
        .attr("name", AttrSpec::string())
        .attr("users", AttrSpec::collection_of("User"))
        .register(&mut registry)
        .expect("Team must register");
    registry
}

pub fn store() -> Store {
    Store::new(registry())
}

/// Shared event trace. Listener closures push formatted lines; tests assert
/// on the full ordered trace.
pub type Trace = Arc<Mutex<Vec<String>>>;

pub fn trace() -> Trace {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn push(trace: &Trace, line: impl Into<String>) {
    trace.lock().expect("trace lock").push(line.into());
}

pub fn lines(trace: &Trace) -> Vec<String> {
    trace.lock().expect("trace lock").clone()
}
