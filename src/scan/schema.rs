//! Database schema for scan.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
};

// =============================================================================
// Profiles
// =============================================================================

/// Search profiles with their denormalized scan state and progress counters.
const PROFILES_TABLE_V0: Table = Table {
    name: "profiles",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        // JSON arrays of strings
        sqlite_column!(
            "industries",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!(
            "roles",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!(
            "locations",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'[]'")
        ),
        sqlite_column!(
            "scan_status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'idle'")
        ),
        sqlite_column!("scan_batch_id", &SqlType::Text),
        sqlite_column!(
            "progress_jobs_found",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "progress_companies_found",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "progress_signals_generated",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "progress_tasks_pending",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "progress_tasks_completed",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("progress_last_updated", &SqlType::Integer),
        sqlite_column!("last_synced_at", &SqlType::Integer),
        sqlite_column!("scan_error", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_profiles_owner", "owner_id")],
    unique_constraints: &[],
};

// =============================================================================
// Batches and tasks
// =============================================================================

/// Expansion runs. Append-only.
const SCAN_BATCHES_TABLE_V0: Table = Table {
    name: "scan_batches",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "profile_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "profiles",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "total_tasks",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[("idx_scan_batches_profile", "profile_id")],
    unique_constraints: &[],
};

/// Deferred search work. Rows are never deleted.
const SCAN_TASKS_TABLE_V0: Table = Table {
    name: "scan_tasks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!(
            "batch_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "scan_batches",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("profile_id", &SqlType::Text, non_null = true),
        sqlite_column!("task_type", &SqlType::Text, non_null = true),
        sqlite_column!("keywords", &SqlType::Text, non_null = true),
        sqlite_column!("location", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "max_attempts",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("3")
        ),
        sqlite_column!("scheduled_for", &SqlType::Integer, non_null = true),
        sqlite_column!("jobs_found", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
    ],
    indices: &[
        ("idx_scan_tasks_claim", "status, scheduled_for"),
        ("idx_scan_tasks_batch", "batch_id, status"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Budget ledger and credentials
// =============================================================================

/// Daily call counters. One row per (api, credential, UTC day); the shared
/// default credential uses the empty string.
const RATE_BUDGETS_TABLE_V0: Table = Table {
    name: "rate_budgets",
    columns: &[
        sqlite_column!("api_name", &SqlType::Text, non_null = true),
        sqlite_column!(
            "credential_id",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("budget_date", &SqlType::Text, non_null = true),
        sqlite_column!(
            "calls_made",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_call_at", &SqlType::Integer),
    ],
    indices: &[],
    unique_constraints: &[&["api_name", "credential_id", "budget_date"]],
};

const API_CREDENTIALS_TABLE_V0: Table = Table {
    name: "api_credentials",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("owner_id", &SqlType::Text, non_null = true),
        sqlite_column!("api_name", &SqlType::Text, non_null = true),
        sqlite_column!("encrypted_key", &SqlType::Text, non_null = true),
        sqlite_column!("daily_limit", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "is_active",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!(
            "is_unlimited",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_api_credentials_owner", "owner_id, api_name")],
    unique_constraints: &[],
};

pub const SCAN_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        PROFILES_TABLE_V0,
        SCAN_BATCHES_TABLE_V0,
        SCAN_TASKS_TABLE_V0,
        RATE_BUDGETS_TABLE_V0,
        API_CREDENTIALS_TABLE_V0,
    ],
    migration: None,
}];
