// Copyright (C) 2026 DBHA Autofix Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL-backed record store.
//!
//! The dispatch claim takes the episode's rows `FOR UPDATE` inside a
//! transaction so concurrent reconciler workers serialize per episode.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::error::{AutofixError, Result};
use crate::model::{
    AutofixRecord, AutofixStep, NewAutofixRecord, Phase, TicketStatus, UpsertOutcome,
};

use super::{RecordRow, RecordStore, decode_rows, phase_columns};

const SELECT_COLUMNS: &str = r#"
    id, check_id, ip, port, bk_cloud_id, bk_biz_id, cluster_id, immute_domain,
    cluster_type, machine_type, instance_role, event_create_time,
    dbha_gm_ip, master_host, master_port, master_log_file, master_log_pos,
    current_step, inplace_ticket_id, inplace_ticket_status,
    replace_ticket_id, replace_ticket_status, created_at, updated_at
"#;

/// PostgreSQL-backed record store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store from an existing pool. Migrations must already have
    /// run (see [`crate::migrations::run_postgres`]).
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RecordStore for PostgresStore {
    async fn upsert_record(&self, new: &NewAutofixRecord) -> Result<UpsertOutcome> {
        let now = Utc::now();
        let inserted = sqlx::query(
            r#"
            INSERT INTO autofix_records (
                check_id, ip, port, bk_cloud_id, bk_biz_id, cluster_id,
                immute_domain, cluster_type, machine_type, instance_role,
                event_create_time, dbha_gm_ip, master_host, master_port,
                master_log_file, master_log_pos, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (check_id, ip, port) DO NOTHING
            "#,
        )
        .bind(new.check_id)
        .bind(&new.ip)
        .bind(new.port)
        .bind(new.bk_cloud_id)
        .bind(new.bk_biz_id)
        .bind(new.cluster_id)
        .bind(&new.immute_domain)
        .bind(new.cluster_type.as_str())
        .bind(new.machine_type.as_str())
        .bind(&new.instance_role)
        .bind(new.event_create_time)
        .bind(&new.context.dbha_gm_ip)
        .bind(&new.context.master_host)
        .bind(new.context.master_port)
        .bind(&new.context.master_log_file)
        .bind(new.context.master_log_pos)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(UpsertOutcome::Inserted);
        }

        // Re-report: refresh event context only, progress fields untouched.
        sqlx::query(
            r#"
            UPDATE autofix_records
            SET event_create_time = $1, dbha_gm_ip = $2, master_host = $3,
                master_port = $4, master_log_file = $5, master_log_pos = $6,
                updated_at = $7
            WHERE check_id = $8 AND ip = $9 AND port = $10
            "#,
        )
        .bind(new.event_create_time)
        .bind(&new.context.dbha_gm_ip)
        .bind(&new.context.master_host)
        .bind(new.context.master_port)
        .bind(&new.context.master_log_file)
        .bind(new.context.master_log_pos)
        .bind(now)
        .bind(new.check_id)
        .bind(&new.ip)
        .bind(new.port)
        .execute(&self.pool)
        .await?;

        Ok(UpsertOutcome::Refreshed)
    }

    async fn get_record(
        &self,
        check_id: i64,
        ip: &str,
        port: i32,
    ) -> Result<Option<AutofixRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM autofix_records WHERE check_id = $1 AND ip = $2 AND port = $3"
        ))
        .bind(check_id)
        .bind(ip)
        .bind(port)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AutofixRecord::try_from).transpose()
    }

    async fn list_open_records(&self) -> Result<Vec<AutofixRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM autofix_records
            WHERE inplace_ticket_status IN ('UNSUBMITTED', 'PENDING', 'RUNNING')
               OR replace_ticket_status IN ('UNSUBMITTED', 'PENDING', 'RUNNING')
            ORDER BY check_id, bk_cloud_id, ip, port
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        decode_rows(rows)
    }

    async fn list_all_records(&self, limit: i64) -> Result<Vec<AutofixRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {SELECT_COLUMNS} FROM autofix_records ORDER BY id DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        decode_rows(rows)
    }

    async fn set_phase_status(&self, id: i64, phase: Phase, status: TicketStatus) -> Result<()> {
        let (_, status_col) = phase_columns(phase);
        sqlx::query(&format!(
            r#"
            UPDATE autofix_records SET {status_col} = $1, updated_at = $2
            WHERE id = $3
              AND {status_col} NOT IN ('SUCCEEDED', 'TERMINATED', 'REVOKED')
            "#
        ))
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_current_step(&self, id: i64, step: AutofixStep) -> Result<()> {
        sqlx::query("UPDATE autofix_records SET current_step = $1, updated_at = $2 WHERE id = $3")
            .bind(step.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn claim_dispatch(&self, ids: &[i64], phase: Phase, ticket_id: i64) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let (id_col, status_col) = phase_columns(phase);

        let mut tx = self.pool.begin().await?;

        // Row-level lock on the episode's records; a concurrent claim for
        // the same episode blocks here and then fails the precondition.
        sqlx::query("SELECT id FROM autofix_records WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(ids)
            .fetch_all(&mut *tx)
            .await?;

        let sql = format!(
            r#"
            UPDATE autofix_records
            SET {id_col} = $1, {status_col} = 'PENDING', updated_at = $2
            WHERE id = ANY($3)
              AND {status_col} = 'UNSUBMITTED' AND {id_col} = 0
            "#
        );
        let claimed = sqlx::query(&sql)
            .bind(ticket_id)
            .bind(Utc::now())
            .bind(ids)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await.map_err(|e| AutofixError::Database {
            operation: "commit",
            details: e.to_string(),
        })?;

        Ok(claimed)
    }

    async fn health_check(&self) -> Result<bool> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
