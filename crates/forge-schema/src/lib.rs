//! Typed input/output record schemas shared by every node type, plus the
//! cache-key fingerprint algorithm that is driven by field declaration
//! order (spec §3, §4.3).

mod field;
mod fingerprint;
mod record;
mod schema;

pub use field::{FieldType, FieldValue};
pub use fingerprint::compute_cache_key;
pub use record::{Record, field_type};
pub use schema::{FieldSpec, Schema};
