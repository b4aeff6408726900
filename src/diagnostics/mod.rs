//! Connection diagnostics for the test harness.
//!
//! Answers the usual "why can't the test see the row the API just inserted"
//! questions: is the database reachable, which database and user are we
//! actually on, what does the table contain, and do the harness and the API
//! server point at the same database. Also brings an older
//! `scheduling_groups` table up to the columns the API writes.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{DatabaseConfig, FieldDifference};
use crate::error::Result;
use crate::postgres::{queries, Gateway, PoolBackend, Row, SqlParam};

/// Number of newest groups listed in a diagnostic report.
const LATEST_GROUPS: usize = 5;

/// Optional `scheduling_groups` columns that tables created before they were
/// introduced lack.
pub const OPTIONAL_GROUP_COLUMNS: &[(&str, &str)] = &[
    ("area", "VARCHAR(255)"),
    ("notes", "TEXT"),
    ("allocations_menu", "VARCHAR(255)"),
    ("last_amended_by", "VARCHAR(255)"),
    ("last_amended_date", "TIMESTAMP"),
    ("updated_at", "TIMESTAMP"),
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerInfo {
    pub version: String,
    pub database: String,
    pub user_name: String,
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GroupSummary {
    pub id: i64,
    pub group_name: String,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
}

/// Result of looking the newest group up again by id.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOutcome {
    pub id: i64,
    /// `group_name` of the matching row, `None` when no row came back
    pub found: Option<String>,
}

/// Everything `run_diagnostics` learned.
#[derive(Debug, Clone)]
pub struct DiagnosticReport {
    pub health_check_at: DateTime<Utc>,
    pub server: Option<ServerInfo>,
    pub group_count: usize,
    pub latest: Vec<GroupSummary>,
    pub lookup: Option<LookupOutcome>,
    pub schema: Vec<ColumnInfo>,
}

/// Initialize, health-check, then inspect `scheduling_groups`.
///
/// Does not close the gateway.
pub async fn run_diagnostics<B: PoolBackend>(gateway: &Gateway<B>) -> Result<DiagnosticReport> {
    tracing::info!("Step 1: initializing database pool");
    gateway.initialize().await?;

    tracing::info!("Step 2: running health check");
    let health_check_at = gateway.health_check().await?;

    tracing::info!("Step 3: verifying database version and connection");
    let server = gateway
        .query_one::<ServerInfo>(queries::SERVER_INFO, &[])
        .await?;

    tracing::info!("Step 4: querying all scheduling groups");
    let groups: Vec<GroupSummary> = gateway.query_as(queries::GET_ALL_GROUPS, &[]).await?;

    let latest = groups
        .iter()
        .skip(groups.len().saturating_sub(LATEST_GROUPS))
        .cloned()
        .collect();

    let (lookup, schema) = match groups.last() {
        Some(newest) => {
            tracing::info!(id = newest.id, "Step 5: querying newest group by id");
            let rows = gateway
                .query(queries::GET_GROUP_BY_ID, &[SqlParam::Int(newest.id)])
                .await?;
            let found = rows
                .first()
                .and_then(|row| row.get("group_name"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            if found.is_none() {
                tracing::warn!(
                    id = newest.id,
                    "Group listed but not found by id, check for a database or isolation mismatch"
                );
            }

            tracing::info!("Step 6: verifying table schema");
            let schema = gateway.query_as(queries::TABLE_SCHEMA, &[]).await?;

            (
                Some(LookupOutcome {
                    id: newest.id,
                    found,
                }),
                schema,
            )
        }
        None => {
            tracing::warn!("No groups found in database");
            (None, Vec::new())
        }
    };

    Ok(DiagnosticReport {
        health_check_at,
        server,
        group_count: groups.len(),
        latest,
        lookup,
        schema,
    })
}

/// Record count and listing of `scheduling_groups`, newest first.
#[derive(Debug, Clone)]
pub struct RecordListing {
    pub total: i64,
    pub records: Vec<Row>,
}

pub async fn list_records<B: PoolBackend>(gateway: &Gateway<B>) -> Result<RecordListing> {
    #[derive(Deserialize)]
    struct Count {
        total_records: i64,
    }

    let total = gateway
        .query_one::<Count>(queries::COUNT_GROUPS, &[])
        .await?
        .map(|c| c.total_records)
        .unwrap_or(0);
    let records = gateway.query(queries::LIST_GROUP_RECORDS, &[]).await?;

    Ok(RecordListing { total, records })
}

/// Outcome of [`migrate_missing_columns`].
#[derive(Debug, Clone)]
pub struct MigrationReport {
    /// Column names before the migration, in table order
    pub existing: Vec<String>,
    /// Columns added, with their SQL type
    pub added: Vec<(String, String)>,
    /// Schema after the migration
    pub schema: Vec<ColumnInfo>,
}

impl MigrationReport {
    pub fn is_up_to_date(&self) -> bool {
        self.added.is_empty()
    }
}

/// Add any of [`OPTIONAL_GROUP_COLUMNS`] missing from `scheduling_groups`.
///
/// Safe to run repeatedly. Stops at the first failing statement.
pub async fn migrate_missing_columns<B: PoolBackend>(
    gateway: &Gateway<B>,
) -> Result<MigrationReport> {
    tracing::info!("Step 1: checking existing columns");
    let before: Vec<ColumnInfo> = gateway.query_as(queries::TABLE_SCHEMA, &[]).await?;
    let existing: Vec<String> = before.iter().map(|c| c.column_name.clone()).collect();

    let missing: Vec<_> = OPTIONAL_GROUP_COLUMNS
        .iter()
        .filter(|(name, _)| !existing.iter().any(|e| e.as_str() == *name))
        .collect();

    if missing.is_empty() {
        tracing::info!("All columns already exist");
        return Ok(MigrationReport {
            existing,
            added: Vec::new(),
            schema: before,
        });
    }

    tracing::info!(count = missing.len(), "Step 2: adding missing columns");
    let mut added = Vec::with_capacity(missing.len());
    for (name, data_type) in missing {
        gateway
            .query(&queries::add_group_column(name, data_type), &[])
            .await?;
        tracing::info!(column = *name, data_type = *data_type, "Added column");
        added.push((name.to_string(), data_type.to_string()));
    }

    tracing::info!("Step 3: verifying final schema");
    let schema = gateway.query_as(queries::TABLE_SCHEMA, &[]).await?;

    Ok(MigrationReport {
        existing,
        added,
        schema,
    })
}

/// Side-by-side database settings of two `.env` files.
#[derive(Debug, Clone)]
pub struct ComparisonReport {
    pub local_path: PathBuf,
    pub local: DatabaseConfig,
    pub other_path: PathBuf,
    pub other: DatabaseConfig,
    pub differences: Vec<FieldDifference>,
}

impl ComparisonReport {
    pub fn is_same(&self) -> bool {
        self.differences.is_empty()
    }
}

/// Compare the database settings of two `.env` files.
///
/// A missing or unreadable file is logged and treated as all defaults.
pub fn compare_env_files(local: &Path, other: &Path) -> ComparisonReport {
    let local_config = load_or_default(local);
    let other_config = load_or_default(other);
    let differences = local_config.diff(&other_config);

    ComparisonReport {
        local_path: local.to_path_buf(),
        local: local_config,
        other_path: other.to_path_buf(),
        other: other_config,
        differences,
    }
}

fn load_or_default(path: &Path) -> DatabaseConfig {
    DatabaseConfig::from_env_file(path).unwrap_or_else(|e| {
        tracing::error!(path = %path.display(), error = %e, "Could not read env file, using defaults");
        DatabaseConfig::default()
    })
}

fn write_config(f: &mut fmt::Formatter<'_>, config: &DatabaseConfig) -> fmt::Result {
    writeln!(f, "   Host: {}", config.host)?;
    writeln!(f, "   Port: {}", config.port)?;
    writeln!(f, "   User: {}", config.user)?;
    writeln!(f, "   Database: {}", config.database)
}

/// Connection settings block printed at the top of a report.
pub struct ConfigSummary<'a>(pub &'a DatabaseConfig);

impl fmt::Display for ConfigSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database configuration:")?;
        write_config(f, self.0)
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Health check passed at {}", self.health_check_at)?;

        if let Some(server) = &self.server {
            let version = server.version.split(',').next().unwrap_or(&server.version);
            writeln!(f, "   Database: {}", server.database)?;
            writeln!(f, "   User: {}", server.user_name)?;
            writeln!(f, "   Version: {}", version)?;
            writeln!(f, "   Server Time: {}", server.server_time)?;
        }

        writeln!(f, "Found {} groups in database", self.group_count)?;
        if self.group_count == 0 {
            return writeln!(f, "No groups found in database. Create some test data first.");
        }

        writeln!(f, "Latest {} groups:", self.latest.len())?;
        for (index, group) in self.latest.iter().enumerate() {
            writeln!(
                f,
                "  {}. ID: {}, Name: {}, Area: {}, Status: {}",
                index + 1,
                group.id,
                group.group_name,
                group.area.as_deref().unwrap_or("NULL"),
                group.status.as_deref().unwrap_or("NULL"),
            )?;
        }

        if let Some(lookup) = &self.lookup {
            match &lookup.found {
                Some(name) => writeln!(f, "Lookup by ID {}: found '{}'", lookup.id, name)?,
                None => {
                    writeln!(f, "Lookup by ID {}: NOT FOUND", lookup.id)?;
                    writeln!(f, "This indicates a database connection or isolation issue.")?;
                }
            }
        }

        if !self.schema.is_empty() {
            writeln!(f, "Table columns:")?;
            write_schema(f, &self.schema)?;
        }

        Ok(())
    }
}

fn write_schema(f: &mut fmt::Formatter<'_>, schema: &[ColumnInfo]) -> fmt::Result {
    for column in schema {
        let nullable = if column.is_nullable == "YES" {
            "NULL"
        } else {
            "NOT NULL"
        };
        writeln!(f, "   - {}: {} {}", column.column_name, column.data_type, nullable)?;
    }
    Ok(())
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Existing columns: {}", self.existing.join(", "))?;

        if self.is_up_to_date() {
            writeln!(f, "All columns already exist in the table")?;
        } else {
            writeln!(f, "Added {} missing column(s):", self.added.len())?;
            for (name, data_type) in &self.added {
                writeln!(f, "   + {} ({})", name, data_type)?;
            }
        }

        writeln!(f, "Table schema:")?;
        write_schema(f, &self.schema)
    }
}

impl fmt::Display for RecordListing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total Records in Database: {}", self.total)?;

        if self.records.is_empty() {
            return writeln!(f, "No records found in database");
        }

        writeln!(f, "All Records ({} total):", self.records.len())?;
        for record in &self.records {
            let line = serde_json::to_string(record).map_err(|_| fmt::Error)?;
            writeln!(f, "  {}", line)?;
        }
        Ok(())
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Local configuration ({}):", self.local_path.display())?;
        write_config(f, &self.local)?;
        writeln!(f, "   Password: {}", self.local.masked_password())?;
        writeln!(f)?;
        writeln!(f, "Other configuration ({}):", self.other_path.display())?;
        write_config(f, &self.other)?;
        writeln!(f, "   Password: {}", self.other.masked_password())?;
        writeln!(f)?;

        if self.is_same() {
            return writeln!(f, "Both configurations point to the SAME database");
        }

        writeln!(f, "Configurations point to DIFFERENT databases!")?;
        writeln!(f, "Differences:")?;
        for diff in &self.differences {
            if diff.field == "password" {
                writeln!(f, "   Password differs (masked)")?;
            } else {
                writeln!(
                    f,
                    "   {}: local=\"{}\" vs other=\"{}\"",
                    diff.field, diff.local, diff.other
                )?;
            }
        }
        writeln!(f)?;
        writeln!(
            f,
            "Fix: make the configurations identical, e.g. cp {} {}",
            self.other_path.display(),
            self.local_path.display()
        )
    }
}
