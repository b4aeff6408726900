//! In-memory pooling backend for exercising the gateway without a database.
#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use schedgate::config::DatabaseConfig;
use schedgate::postgres::{queries, PoolBackend, Row, SqlParam};

/// Operation counts observed by the backend.
#[derive(Debug, Default)]
pub struct Counters {
    pub pools_created: AtomicU32,
    pub pools_closed: AtomicU32,
    pub acquired: AtomicU32,
    pub released: AtomicU32,
    pub probes: AtomicU32,
    pub fetches: AtomicU32,
}

impl Counters {
    pub fn pools_created(&self) -> u32 {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub fn pools_closed(&self) -> u32 {
        self.pools_closed.load(Ordering::SeqCst)
    }

    pub fn acquired(&self) -> u32 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> u32 {
        self.released.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct MemoryPool {
    pub id: u32,
    closed: Arc<AtomicBool>,
}

pub struct MemoryLease {
    counters: Arc<Counters>,
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Returns a column the row decoder has no rendering for.
pub const INTERVAL_QUERY: &str = "SELECT INTERVAL '1 day' AS span";

/// Understands the statements in `queries` against an in-memory
/// `scheduling_groups` table; anything else fails like a syntax error.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub counters: Arc<Counters>,
    failing_probes: Arc<AtomicU32>,
    groups: Arc<Mutex<Vec<(i64, String)>>>,
    columns: Arc<Mutex<Vec<(String, String)>>>,
    audit: Arc<Mutex<Vec<Row>>>,
}

impl MemoryBackend {
    /// `scheduling_groups` starts with `id` and `group_name` only.
    pub fn new() -> Self {
        Self::default()
            .with_column("id", "integer")
            .with_column("group_name", "character varying")
    }

    pub fn with_column(self, name: &str, data_type: &str) -> Self {
        self.columns
            .lock()
            .unwrap()
            .push((name.to_string(), data_type.to_string()));
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn with_group(self, id: i64, name: &str) -> Self {
        self.groups.lock().unwrap().push((id, name.to_string()));
        self
    }

    /// The next `n` liveness probes fail with "connection refused".
    pub fn fail_next_probes(&self, n: u32) {
        self.failing_probes.store(n, Ordering::SeqCst);
    }

    fn next_probe_fails(&self) -> bool {
        self.failing_probes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn run(&self, sql: &str, params: &[SqlParam]) -> Result<Vec<Row>, sqlx::Error> {
        let groups = self.groups.lock().unwrap().clone();

        let rows = match sql {
            queries::GET_GROUP_BY_ID => {
                let id = int_param(params, 0)?;
                groups
                    .iter()
                    .filter(|(gid, _)| *gid == id)
                    .map(|(_, name)| row(json!({ "group_name": name })))
                    .collect()
            }
            queries::GET_ALL_GROUPS => groups
                .iter()
                .map(|(id, name)| {
                    row(json!({ "id": id, "group_name": name, "area": null, "status": "active" }))
                })
                .collect(),
            queries::COUNT_GROUPS => vec![row(json!({ "total_records": groups.len() }))],
            queries::LIST_GROUP_RECORDS => groups
                .iter()
                .rev()
                .map(|(id, name)| row(json!({ "id": id, "group_name": name, "status": "active" })))
                .collect(),
            queries::SERVER_INFO => vec![row(json!({
                "version": "PostgreSQL 16.2 on x86_64-pc-linux-gnu, compiled by gcc",
                "database": "automation_practice",
                "user_name": "postgres",
                "server_time": Utc::now().to_rfc3339(),
            }))],
            queries::TABLE_SCHEMA => self
                .columns
                .lock()
                .unwrap()
                .iter()
                .map(|(name, data_type)| {
                    let nullable = if name == "id" || name == "group_name" { "NO" } else { "YES" };
                    row(json!({ "column_name": name, "data_type": data_type, "is_nullable": nullable }))
                })
                .collect(),
            INTERVAL_QUERY => {
                return Err(sqlx::Error::ColumnDecode {
                    index: "span".to_string(),
                    source: "no JSON rendering for column type INTERVAL".into(),
                })
            }
            alter if alter.starts_with(ADD_COLUMN_PREFIX) => {
                let definition = &alter[ADD_COLUMN_PREFIX.len()..];
                let (name, data_type) = definition.split_once(' ').ok_or_else(|| {
                    sqlx::Error::Protocol(format!("syntax error at end of input: {alter}"))
                })?;
                let mut columns = self.columns.lock().unwrap();
                if !columns.iter().any(|(existing, _)| existing == name) {
                    columns.push((name.to_string(), data_type.to_lowercase()));
                }
                Vec::new()
            }
            queries::INSERT_AUDIT_LOG => {
                let group_id = int_param(params, 0)?;
                let old_values = json_param(&params[2])?;
                let new_values = json_param(&params[3])?;

                let mut audit = self.audit.lock().unwrap();
                let entry = row(json!({
                    "id": audit.len() + 1,
                    "group_id": group_id,
                    "action": param_value(&params[1]),
                    "old_values": old_values,
                    "new_values": new_values,
                    "changed_by": param_value(&params[4]),
                    "changed_at": "2024-05-01T09:30:00",
                }));
                audit.push(entry.clone());
                vec![entry]
            }
            queries::GET_GROUP_AUDIT_HISTORY => {
                let id = int_param(params, 0)?;
                self.audit
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|entry| entry["group_id"] == json!(id))
                    .cloned()
                    .collect()
            }
            other => {
                return Err(sqlx::Error::Protocol(format!(
                    "syntax error at or near \"{}\"",
                    other
                )))
            }
        };

        Ok(rows)
    }
}

#[async_trait]
impl PoolBackend for MemoryBackend {
    type Pool = MemoryPool;
    type Lease = MemoryLease;

    fn create_pool(&self, _config: &DatabaseConfig) -> MemoryPool {
        let id = self.counters.pools_created.fetch_add(1, Ordering::SeqCst) + 1;
        MemoryPool {
            id,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn acquire(&self, pool: &MemoryPool) -> Result<MemoryLease, sqlx::Error> {
        tokio::task::yield_now().await;
        if pool.closed.load(Ordering::SeqCst) {
            return Err(sqlx::Error::PoolClosed);
        }
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryLease {
            counters: self.counters.clone(),
        })
    }

    async fn ping(&self, _lease: &mut MemoryLease) -> Result<DateTime<Utc>, sqlx::Error> {
        tokio::task::yield_now().await;
        self.counters.probes.fetch_add(1, Ordering::SeqCst);
        if self.next_probe_fails() {
            return Err(sqlx::Error::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        Ok(Utc::now())
    }

    async fn fetch(
        &self,
        _lease: &mut MemoryLease,
        sql: &str,
        params: &[SqlParam],
    ) -> Result<Vec<Row>, sqlx::Error> {
        tokio::task::yield_now().await;
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        self.run(sql, params)
    }

    async fn close(&self, pool: &MemoryPool) {
        pool.closed.store(true, Ordering::SeqCst);
        self.counters.pools_closed.fetch_add(1, Ordering::SeqCst);
    }
}

const ADD_COLUMN_PREFIX: &str = "ALTER TABLE scheduling_groups ADD COLUMN IF NOT EXISTS ";

fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => unreachable!("rows are objects"),
    }
}

fn int_param(params: &[SqlParam], index: usize) -> Result<i64, sqlx::Error> {
    match params.get(index) {
        Some(SqlParam::Int(v)) => Ok(*v),
        other => Err(sqlx::Error::Protocol(format!(
            "bind message supplies {:?} for parameter ${}",
            other,
            index + 1
        ))),
    }
}

fn param_value(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::Null,
        SqlParam::Bool(v) => json!(v),
        SqlParam::Int(v) => json!(v),
        SqlParam::Float(v) => json!(v),
        SqlParam::Text(v) => json!(v),
        SqlParam::Json(v) => v.clone(),
        SqlParam::Uuid(v) => json!(v.to_string()),
        SqlParam::Timestamp(v) => json!(v.to_rfc3339()),
    }
}

// Mirrors the `::jsonb` cast in INSERT_AUDIT_LOG.
fn json_param(param: &SqlParam) -> Result<Value, sqlx::Error> {
    match param {
        SqlParam::Null => Ok(Value::Null),
        SqlParam::Text(text) => serde_json::from_str(text).map_err(|e| sqlx::Error::Decode(Box::new(e))),
        other => Ok(param_value(other)),
    }
}

pub fn config() -> DatabaseConfig {
    DatabaseConfig::default()
}
