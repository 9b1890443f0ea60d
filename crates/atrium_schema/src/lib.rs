//! Schema-driven data layer.
//!
//! Structures are declared as JSON files; this crate turns them into tables,
//! injection-safe CRUD, position ordering, soft deletes, joins, counts and
//! child subrequests. The [`Registry`] loads a definition directory and hands
//! out one [`Schema`] per structure; the [`Migrator`] reconciles the declared
//! structures with the live database.

pub mod count;
pub mod definition;
pub mod error;
pub mod field;
pub mod join;
pub mod migration;
pub mod modification;
pub mod query;
pub mod record;
pub mod registry;
pub mod request;
pub mod schema;
pub mod selection;
pub mod structure;
pub mod subrequest;

pub use definition::Definitions;
pub use error::{Result, SchemaError};
pub use field::{Field, FieldKind};
pub use migration::{DataMigration, MigrationReport, Migrator};
pub use modification::FieldValues;
pub use query::{Query, UpdateValue};
pub use record::Record;
pub use registry::{MediaConfig, Registry};
pub use request::RequestValues;
pub use schema::Schema;
pub use selection::Selection;
pub use structure::Structure;
