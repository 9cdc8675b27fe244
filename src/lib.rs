//! Optimistic concurrency control for ORM-style statement pipelines.
//!
//! Models designate a version field through declarative tags; the plugin
//! seeds it on create, gates every targeted update on the observed
//! version, verifies the bump after execution, and hands mismatches to a
//! caller-supplied conflict handler.

pub mod conflict;
pub mod diff;
mod error;
pub mod metrics;
pub mod model;
pub mod plugin;
mod rewrite;
pub mod schema;
mod seed;
pub mod session;
pub mod statement;
pub mod testing;
mod verify;
pub mod version;

pub use conflict::{Conflict, OnVersionMismatch};
pub use diff::{Change, ChangeSet, DiffReporter, diff_records};
pub use error::{Error, Result};
pub use model::{FieldValue, FromFieldValue, Model, Record, ToFieldValue};
pub use plugin::OptimisticLock;
pub use schema::{FieldDef, FieldType, ModelSchema, NamingStrategy};
pub use session::{Backend, Callbacks, Dialect, Plugin, Session, SessionBuilder};
pub use statement::{Assignment, Operation, Predicate, SetExpr, Statement};
pub use version::{NextVersion, TimestampPrecision, VersionField, VersionKind, find_version_field};

pub use optlock_derive::Model;

pub mod prelude {
    pub use crate::conflict::Conflict;
    pub use crate::plugin::OptimisticLock;
    pub use crate::session::{Dialect, Session};
    pub use crate::{Error, FieldValue, Model, Result};
}
