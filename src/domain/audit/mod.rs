//! Audit trail for scheduling groups.
//!
//! Records create, update and delete events in `scheduling_groups_audit` and
//! reads the history back so tests can assert on it.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GatewayError, Result};
use crate::postgres::{queries, Gateway, PoolBackend, SqlParam};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
        }
    }
}

/// One row of `scheduling_groups_audit`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub group_id: i64,
    pub action: AuditAction,
    #[serde(default)]
    pub old_values: Option<Value>,
    #[serde(default)]
    pub new_values: Option<Value>,
    pub changed_by: String,
    pub changed_at: NaiveDateTime,
}

/// Before and after value of one changed field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// Audit log writer and reader over a gateway.
pub struct AuditLog<'a, B: PoolBackend> {
    gateway: &'a Gateway<B>,
}

impl<'a, B: PoolBackend> AuditLog<'a, B> {
    pub fn new(gateway: &'a Gateway<B>) -> Self {
        Self { gateway }
    }

    pub async fn log_create(&self, group_id: i64, user_id: &str) -> Result<AuditEntry> {
        self.insert(group_id, AuditAction::Create, None, None, user_id)
            .await
    }

    /// Record an update with the values before and after it.
    pub async fn log_update(
        &self,
        group_id: i64,
        old_values: &Map<String, Value>,
        new_values: &Map<String, Value>,
        user_id: &str,
    ) -> Result<AuditEntry> {
        self.insert(
            group_id,
            AuditAction::Update,
            Some(old_values),
            Some(new_values),
            user_id,
        )
        .await
    }

    pub async fn log_delete(&self, group_id: i64, user_id: &str) -> Result<AuditEntry> {
        self.insert(group_id, AuditAction::Delete, None, None, user_id)
            .await
    }

    /// Every audit entry for `group_id`, oldest first.
    pub async fn history(&self, group_id: i64) -> Result<Vec<AuditEntry>> {
        self.gateway
            .query_as(queries::GET_GROUP_AUDIT_HISTORY, &[SqlParam::Int(group_id)])
            .await
    }

    async fn insert(
        &self,
        group_id: i64,
        action: AuditAction,
        old_values: Option<&Map<String, Value>>,
        new_values: Option<&Map<String, Value>>,
        user_id: &str,
    ) -> Result<AuditEntry> {
        let params = [
            SqlParam::Int(group_id),
            SqlParam::from(action.as_str()),
            json_text(old_values)?,
            json_text(new_values)?,
            SqlParam::from(user_id),
        ];

        let entry = self
            .gateway
            .query_one::<AuditEntry>(queries::INSERT_AUDIT_LOG, &params)
            .await?
            .ok_or_else(|| GatewayError::Query {
                source: sqlx::Error::RowNotFound,
            })?;

        tracing::debug!(
            group_id,
            action = action.as_str(),
            audit_id = entry.id,
            "Audit entry recorded"
        );

        Ok(entry)
    }
}

// The statement casts these to jsonb.
fn json_text(values: Option<&Map<String, Value>>) -> Result<SqlParam> {
    match values {
        Some(map) => serde_json::to_string(map)
            .map(SqlParam::Text)
            .map_err(|source| GatewayError::Decode {
                source: source.into(),
            }),
        None => Ok(SqlParam::Null),
    }
}

/// Fields of `new_values` whose value differs from `old_values`.
///
/// A field absent from `old_values` counts as changed from `null`. Fields only
/// present in `old_values` are ignored.
pub fn changed_fields(
    old_values: &Map<String, Value>,
    new_values: &Map<String, Value>,
) -> BTreeMap<String, FieldChange> {
    new_values
        .iter()
        .filter_map(|(key, new)| {
            let old = old_values.get(key).cloned().unwrap_or(Value::Null);
            (old != *new).then(|| {
                (
                    key.clone(),
                    FieldChange {
                        old,
                        new: new.clone(),
                    },
                )
            })
        })
        .collect()
}
