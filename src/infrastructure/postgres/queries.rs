//! SQL used by the harness to cross-check API results.
//!
//! Statements are positional (`$1`, `$2`, ...) and executed verbatim by the
//! gateway. information_schema columns are cast to text so their JSON shape
//! does not depend on how the server describes its domains.

/// Liveness probe.
pub const NOW: &str = "SELECT NOW()";

/// `$1`: group id
pub const GET_GROUP_BY_ID: &str = "SELECT group_name FROM scheduling_groups WHERE id = $1";

pub const GET_ALL_GROUPS: &str =
    "SELECT id, group_name, area, status FROM scheduling_groups ORDER BY id";

pub const COUNT_GROUPS: &str = "SELECT COUNT(*) AS total_records FROM scheduling_groups";

pub const LIST_GROUP_RECORDS: &str = "SELECT id, group_name, created_by, status, created_at \
     FROM scheduling_groups ORDER BY created_at DESC";

/// `$1`: row limit
pub const RECENT_GROUPS: &str = "SELECT id, group_name, created_at \
     FROM scheduling_groups ORDER BY id DESC LIMIT $1";

/// `$1`: status
pub const DELETE_GROUPS_BY_STATUS: &str =
    "DELETE FROM scheduling_groups WHERE status = $1 RETURNING id";

/// `$1`: group id, `$2`: action, `$3`: old values (JSON text or NULL),
/// `$4`: new values (JSON text or NULL), `$5`: changed by
pub const INSERT_AUDIT_LOG: &str = "INSERT INTO scheduling_groups_audit \
     (group_id, action, old_values, new_values, changed_by) \
     VALUES ($1, $2, $3::jsonb, $4::jsonb, $5) \
     RETURNING id::bigint AS id, group_id::bigint AS group_id, action, old_values, \
     new_values, changed_by, changed_at::timestamp AS changed_at";

/// `$1`: group id
pub const GET_GROUP_AUDIT_HISTORY: &str = "SELECT id::bigint AS id, group_id::bigint AS group_id, \
     action, old_values, new_values, changed_by, changed_at::timestamp AS changed_at \
     FROM scheduling_groups_audit WHERE group_id = $1 ORDER BY changed_at ASC, id ASC";

pub const SERVER_INFO: &str = "SELECT version() AS version, current_database()::text AS database, \
     current_user::text AS user_name, NOW() AS server_time";

pub const TABLE_SCHEMA: &str = "SELECT column_name::text AS column_name, \
     data_type::text AS data_type, is_nullable::text AS is_nullable \
     FROM information_schema.columns \
     WHERE table_name = 'scheduling_groups' \
     ORDER BY ordinal_position";

/// Add one column to `scheduling_groups` unless it already exists.
///
/// Both parts are spliced into the statement verbatim, so only pass trusted
/// identifiers and type names.
pub fn add_group_column(name: &str, data_type: &str) -> String {
    format!("ALTER TABLE scheduling_groups ADD COLUMN IF NOT EXISTS {name} {data_type}")
}
