use anyhow::{Context, Result};
use sqlx::Row;

use super::PgStore;
use crate::types::{UoStatus, UserOpRecord, UserOperation};

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<UserOpRecord> {
    let status: String = row.try_get("status")?;
    Ok(UserOpRecord {
        user_op_hash: row.try_get("user_op_hash")?,
        user_op: UserOperation {
            sender: row.try_get("sender")?,
            nonce: row.try_get("nonce")?,
            init_code: row.try_get("init_code")?,
            call_data: row.try_get("call_data")?,
            call_gas_limit: row.try_get("call_gas_limit")?,
            verification_gas_limit: row.try_get("verification_gas_limit")?,
            pre_verification_gas: row.try_get("pre_verification_gas")?,
            max_fee_per_gas: row.try_get("max_fee_per_gas")?,
            max_priority_fee_per_gas: row.try_get("max_priority_fee_per_gas")?,
            paymaster_and_data: row.try_get("paymaster_and_data")?,
            signature: row.try_get("signature")?,
        },
        status: UoStatus::parse(&status)?,
        created_at_unix: row
            .try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?
            .timestamp(),
        submitted_at_unix: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("submitted_at")?
            .map(|t| t.timestamp()),
        confirmed_at_unix: row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("confirmed_at")?
            .map(|t| t.timestamp()),
        tx_hash: row.try_get("tx_hash")?,
        gas_used: row.try_get("gas_used")?,
        gas_cost: row.try_get("gas_cost")?,
        error_message: row.try_get("error_message")?,
        block_number: row.try_get("block_number")?,
    })
}

impl PgStore {
    pub(super) async fn save_user_op_row(&self, record: &UserOpRecord) -> Result<()> {
        let n = sqlx::query(
            "insert into bundler.user_operations ( \
                user_op_hash, sender, nonce, init_code, call_data, call_gas_limit, \
                verification_gas_limit, pre_verification_gas, max_fee_per_gas, \
                max_priority_fee_per_gas, paymaster_and_data, signature, status \
             ) values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13) \
             on conflict (user_op_hash) do nothing",
        )
        .bind(&record.user_op_hash)
        .bind(&record.user_op.sender)
        .bind(&record.user_op.nonce)
        .bind(&record.user_op.init_code)
        .bind(&record.user_op.call_data)
        .bind(&record.user_op.call_gas_limit)
        .bind(&record.user_op.verification_gas_limit)
        .bind(&record.user_op.pre_verification_gas)
        .bind(&record.user_op.max_fee_per_gas)
        .bind(&record.user_op.max_priority_fee_per_gas)
        .bind(&record.user_op.paymaster_and_data)
        .bind(&record.user_op.signature)
        .bind(record.status.as_db_str())
        .execute(self.pool())
        .await
        .context("insert bundler.user_operations")?
        .rows_affected();

        if n != 1 {
            anyhow::bail!("duplicate-hash: {}", record.user_op_hash);
        }
        Ok(())
    }

    pub(super) async fn update_user_op_status_row(
        &self,
        hash: &str,
        new_status: UoStatus,
        tx_hash: Option<&str>,
        gas_used: Option<&str>,
        gas_cost: Option<&str>,
        error_message: Option<&str>,
        block_number: Option<&str>,
    ) -> Result<()> {
        let expected_prev = expected_previous_states_for_transition(new_status)?;

        sqlx::query(
            "update bundler.user_operations set \
                status = $1, \
                submitted_at = case when $1 = 'submitted' then now() else submitted_at end, \
                confirmed_at = case when $1 in ('confirmed','failed') then now() else confirmed_at end, \
                tx_hash = coalesce($3, tx_hash), \
                gas_used = coalesce($4, gas_used), \
                gas_cost = coalesce($5, gas_cost), \
                error_message = coalesce($6, error_message), \
                block_number = coalesce($7, block_number) \
             where user_op_hash = $2 and status = any($8)",
        )
        .bind(new_status.as_db_str())
        .bind(hash)
        .bind(tx_hash)
        .bind(gas_used)
        .bind(gas_cost)
        .bind(error_message)
        .bind(block_number)
        .bind(expected_prev)
        .execute(self.pool())
        .await
        .context("update bundler.user_operations status")?;
        // A zero-row update means the hash is absent or already past this
        // transition; both are treated as a no-op per the monotonic status
        // contract rather than an error.
        Ok(())
    }

    pub(super) async fn get_user_op_by_hash_row(&self, hash: &str) -> Result<Option<UserOpRecord>> {
        let row = sqlx::query("select * from bundler.user_operations where user_op_hash = $1")
            .bind(hash)
            .fetch_optional(self.pool())
            .await
            .context("select bundler.user_operations by hash")?;
        row.as_ref().map(row_to_record).transpose()
    }

    pub(super) async fn list_pending_rows(&self, limit: i64) -> Result<Vec<UserOpRecord>> {
        let rows = sqlx::query(
            "select * from bundler.user_operations where status = 'pending' \
             order by created_at asc limit $1",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .context("list pending bundler.user_operations")?;
        rows.iter().map(row_to_record).collect()
    }

    pub(super) async fn list_submitted_rows(&self) -> Result<Vec<UserOpRecord>> {
        let rows = sqlx::query("select * from bundler.user_operations where status = 'submitted'")
            .fetch_all(self.pool())
            .await
            .context("list submitted bundler.user_operations")?;
        rows.iter().map(row_to_record).collect()
    }
}

/// Allowed predecessor statuses for a given target status, enforced via the
/// UPDATE's `WHERE status = any(...)` predicate so the database is the
/// single source of truth for the monotonic status invariant.
fn expected_previous_states_for_transition(next: UoStatus) -> Result<Vec<&'static str>> {
    match next {
        UoStatus::Submitted => Ok(vec!["pending"]),
        UoStatus::Confirmed => Ok(vec!["submitted"]),
        UoStatus::Failed => Ok(vec!["submitted"]),
        UoStatus::Removed => Ok(vec!["pending"]),
        UoStatus::Pending => Ok(vec!["submitted"]),
    }
}
