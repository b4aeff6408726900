//! Audit trail and diagnostics over the gateway
//!
//! Uses the in-memory backend, so no database is required.

mod common;

use serde_json::{json, Map, Value};

use common::{config, MemoryBackend};
use schedgate::audit::{changed_fields, AuditAction, AuditLog};
use schedgate::diagnostics::{list_records, migrate_missing_columns, run_diagnostics, OPTIONAL_GROUP_COLUMNS};
use schedgate::postgres::Gateway;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

mod audit_tests {
    use super::*;

    #[tokio::test]
    async fn test_audit_lifecycle() {
        let backend = MemoryBackend::new().with_group(42, "Ops");
        let gateway = Gateway::with_backend(config(), backend.clone());
        let audit = AuditLog::new(&gateway);

        let created = audit.log_create(42, "qa-bot").await.unwrap();
        assert_eq!(created.action, AuditAction::Create);
        assert_eq!(created.group_id, 42);
        assert!(created.old_values.is_none());

        let old = object(json!({"group_name": "Ops", "status": "active"}));
        let new = object(json!({"group_name": "Ops", "status": "inactive"}));
        let updated = audit.log_update(42, &old, &new, "qa-bot").await.unwrap();
        assert_eq!(updated.action, AuditAction::Update);
        assert_eq!(updated.old_values, Some(Value::Object(old.clone())));
        assert_eq!(updated.new_values, Some(Value::Object(new.clone())));

        audit.log_delete(42, "qa-admin").await.unwrap();
        audit.log_create(7, "qa-bot").await.unwrap();

        let history = audit.history(42).await.unwrap();
        let actions: Vec<_> = history.iter().map(|e| e.action).collect();
        assert_eq!(
            actions,
            vec![AuditAction::Create, AuditAction::Update, AuditAction::Delete]
        );
        assert_eq!(history[2].changed_by, "qa-admin");

        let changes = changed_fields(&old, &new);
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["status"]);

        // Every lease was returned
        assert_eq!(backend.counters.released(), backend.counters.acquired());
    }

    #[tokio::test]
    async fn test_history_for_unknown_group_is_empty() {
        let backend = MemoryBackend::new();
        let gateway = Gateway::with_backend(config(), backend);

        let history = AuditLog::new(&gateway).history(404).await.unwrap();
        assert!(history.is_empty());
    }
}

mod diagnostics_tests {
    use super::*;

    #[tokio::test]
    async fn test_diagnostics_on_populated_table() {
        let backend = (1..=7).fold(MemoryBackend::new(), |b, id| {
            b.with_group(id, &format!("Group {id}"))
        });
        let gateway = Gateway::with_backend(config(), backend.clone());

        let report = run_diagnostics(&gateway).await.unwrap();

        assert_eq!(report.group_count, 7);
        let latest: Vec<_> = report.latest.iter().map(|g| g.id).collect();
        assert_eq!(latest, vec![3, 4, 5, 6, 7]);

        let lookup = report.lookup.as_ref().unwrap();
        assert_eq!(lookup.id, 7);
        assert_eq!(lookup.found.as_deref(), Some("Group 7"));

        let server = report.server.as_ref().unwrap();
        assert_eq!(server.database, "automation_practice");
        assert_eq!(report.schema.len(), 2);

        let text = report.to_string();
        assert!(text.contains("Found 7 groups in database"));
        assert!(text.contains("Lookup by ID 7: found 'Group 7'"));

        // Diagnostics leave the pool open for the caller to close
        assert!(gateway.is_initialized().await);
        gateway.close().await;
        assert_eq!(backend.counters.pools_closed(), 1);
    }

    #[tokio::test]
    async fn test_diagnostics_on_empty_table() {
        let gateway = Gateway::with_backend(config(), MemoryBackend::new());

        let report = run_diagnostics(&gateway).await.unwrap();

        assert_eq!(report.group_count, 0);
        assert!(report.lookup.is_none());
        assert!(report.schema.is_empty());
        assert!(report.to_string().contains("No groups found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_diagnostics_unreachable_database() {
        let backend = MemoryBackend::new();
        backend.fail_next_probes(100);
        let gateway = Gateway::with_backend(config(), backend);

        let err = run_diagnostics(&gateway).await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_list_records() {
        let backend = MemoryBackend::new().with_group(1, "Ops").with_group(2, "Dispatch");
        let gateway = Gateway::with_backend(config(), backend);

        let listing = list_records(&gateway).await.unwrap();

        assert_eq!(listing.total, 2);
        assert_eq!(listing.records.len(), 2);
        // Newest first
        assert_eq!(listing.records[0]["group_name"], json!("Dispatch"));
        assert!(listing.to_string().contains("Total Records in Database: 2"));
    }

    #[tokio::test]
    async fn test_migration_adds_missing_columns() {
        let backend = MemoryBackend::new().with_column("area", "character varying");
        let gateway = Gateway::with_backend(config(), backend.clone());

        let report = migrate_missing_columns(&gateway).await.unwrap();

        assert_eq!(report.existing, vec!["id", "group_name", "area"]);
        let added: Vec<_> = report.added.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            added,
            vec!["notes", "allocations_menu", "last_amended_by", "last_amended_date", "updated_at"]
        );
        assert_eq!(report.schema.len(), 2 + OPTIONAL_GROUP_COLUMNS.len());
        assert_eq!(backend.column_names().len(), report.schema.len());
        assert!(report.to_string().contains("Added 5 missing column(s):"));

        // A second run finds nothing to do
        let again = migrate_missing_columns(&gateway).await.unwrap();
        assert!(again.is_up_to_date());
    }

    #[tokio::test]
    async fn test_migration_when_all_columns_exist() {
        let backend = OPTIONAL_GROUP_COLUMNS
            .iter()
            .fold(MemoryBackend::new(), |b, (name, data_type)| b.with_column(name, data_type));
        let gateway = Gateway::with_backend(config(), backend.clone());
        let fetches_before = backend.counters.fetches();

        let report = migrate_missing_columns(&gateway).await.unwrap();

        assert!(report.is_up_to_date());
        assert_eq!(report.schema.len(), 8);
        // Only the schema lookup ran, no ALTER TABLE
        assert_eq!(backend.counters.fetches() - fetches_before, 1);
        assert!(report.to_string().contains("All columns already exist in the table"));
    }
}
