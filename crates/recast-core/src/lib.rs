//! recast-core: a reactive typed-record state engine.
//!
//! Records carry schema-typed attributes, collections hold ordered
//! identity-indexed sets of records, and every mutation runs through a
//! two-phase transaction: mutate first, notify once. Nested ownership forms
//! a tree, and a dirty child bubbles exactly one aggregated `change` through
//! each ancestor per mutation episode.

pub mod collection;
pub mod events;
pub mod metatype;
mod record;
pub mod schema;
pub mod store;
mod transaction;
pub mod value;

pub use collection::{elements, Comparator, Element};
pub use events::Event;
pub use metatype::{CastError, Metatype, TypeKey};
pub use schema::{AttrSpec, DefinitionError, RecordSchema, SchemaBuilder, TypeRegistry};
pub use store::{ConstructionError, Options, Owner, Store, StoreError};
pub use value::{Cid, IdKey, Value};
