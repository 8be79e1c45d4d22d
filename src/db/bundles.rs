use anyhow::{Context, Result};
use sqlx::Row;

use super::PgStore;
use crate::types::{BundleRecord, BundleStatus};

impl PgStore {
    pub(super) async fn save_bundle_row(&self, record: &BundleRecord) -> Result<()> {
        let mut tx = self.pool().begin().await.context("begin save_bundle tx")?;

        sqlx::query(
            "insert into bundler.bundles (bundle_hash, tx_hash, status) values ($1, $2, $3) \
             on conflict (bundle_hash) do nothing",
        )
        .bind(&record.bundle_hash)
        .bind(&record.tx_hash)
        .bind(record.status.as_db_str())
        .execute(&mut *tx)
        .await
        .context("insert bundler.bundles")?;

        for (position, hash) in record.user_op_hashes.iter().enumerate() {
            sqlx::query(
                "insert into bundler.bundle_user_operations (bundle_hash, user_op_hash, position) \
                 values ($1, $2, $3) on conflict (bundle_hash, user_op_hash) do nothing",
            )
            .bind(&record.bundle_hash)
            .bind(hash)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .context("insert bundler.bundle_user_operations")?;
        }

        tx.commit().await.context("commit save_bundle tx")?;
        Ok(())
    }

    pub(super) async fn update_bundle_status_row(
        &self,
        bundle_hash: &str,
        new_status: BundleStatus,
        block_number: Option<&str>,
        total_gas_used: Option<&str>,
        total_gas_cost: Option<&str>,
    ) -> Result<()> {
        let expected_prev: &[&str] = match new_status {
            BundleStatus::Submitted => &["pending"],
            BundleStatus::Confirmed => &["submitted"],
            BundleStatus::Failed => &["submitted"],
            BundleStatus::Pending => &["submitted"],
        };

        sqlx::query(
            "update bundler.bundles set \
                status = $1, \
                submitted_at = case when $1 = 'submitted' then now() else submitted_at end, \
                confirmed_at = case when $1 in ('confirmed','failed') then now() else confirmed_at end, \
                block_number = coalesce($3, block_number), \
                total_gas_used = coalesce($4, total_gas_used), \
                total_gas_cost = coalesce($5, total_gas_cost) \
             where bundle_hash = $2 and status = any($6)",
        )
        .bind(new_status.as_db_str())
        .bind(bundle_hash)
        .bind(block_number)
        .bind(total_gas_used)
        .bind(total_gas_cost)
        .bind(expected_prev)
        .execute(self.pool())
        .await
        .context("update bundler.bundles status")?;
        Ok(())
    }

    pub(super) async fn list_bundle_member_hashes_row(&self, bundle_hash: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "select user_op_hash from bundler.bundle_user_operations \
             where bundle_hash = $1 order by position asc",
        )
        .bind(bundle_hash)
        .fetch_all(self.pool())
        .await
        .context("select bundler.bundle_user_operations by bundle_hash")?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("user_op_hash").map_err(Into::into))
            .collect()
    }

    pub(super) async fn get_bundle_by_tx_hash_row(&self, tx_hash: &str) -> Result<Option<BundleRecord>> {
        let row = sqlx::query("select * from bundler.bundles where tx_hash = $1")
            .bind(tx_hash)
            .fetch_optional(self.pool())
            .await
            .context("select bundler.bundles by tx_hash")?;
        let Some(row) = row else { return Ok(None) };

        let bundle_hash: String = row.try_get("bundle_hash")?;
        let member_rows = sqlx::query(
            "select user_op_hash from bundler.bundle_user_operations \
             where bundle_hash = $1 order by position asc",
        )
        .bind(&bundle_hash)
        .fetch_all(self.pool())
        .await
        .context("select bundler.bundle_user_operations")?;
        let user_op_hashes = member_rows
            .iter()
            .map(|r| r.try_get::<String, _>("user_op_hash"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let status: String = row.try_get("status")?;
        Ok(Some(BundleRecord {
            bundle_hash,
            tx_hash: row.try_get("tx_hash")?,
            user_op_hashes,
            total_gas_used: row.try_get("total_gas_used")?,
            total_gas_cost: row.try_get("total_gas_cost")?,
            status: BundleStatus::parse(&status)?,
            block_number: row.try_get("block_number")?,
            created_at_unix: row
                .try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?
                .timestamp(),
            submitted_at_unix: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("submitted_at")?
                .map(|t| t.timestamp()),
            confirmed_at_unix: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("confirmed_at")?
                .map(|t| t.timestamp()),
        }))
    }
}
