//! Factory domain model (tenant root).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a factory slug.
pub const MAX_SLUG_LEN: usize = 100;

/// A factory is the tenant boundary: every non-root entity belongs to
/// exactly one factory, and all queries are scoped by its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Factory {
    pub id: i64,
    pub slug: String,
    pub name: String,
    /// IANA timezone name, e.g. "Asia/Kolkata". Schedule predicates for
    /// this factory's rules evaluate in this zone.
    pub timezone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
