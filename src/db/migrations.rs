use anyhow::{Context, Result};
use sqlx::Acquire;

use super::{PgStore, exec_sql_batch};

const MIGRATIONS: &[(i32, &str)] = &[
    (1, include_str!("../../db/migrations/0001_schema.sql")),
    (2, include_str!("../../db/migrations/0002_bundles.sql")),
];

impl PgStore {
    pub async fn migrate(&self) -> Result<()> {
        // Advisory locks are per-connection: run the whole sequence on one
        // acquired connection so lock/unlock cannot straddle pool connections.
        const MIGRATION_LOCK_KEY: i64 = 0x4255_4E44_4C45_5253; // "BUNDLERS"
        let mut conn = self
            .pool()
            .acquire()
            .await
            .context("acquire connection for bundler migrations")?;

        sqlx::query("select pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await
            .context("acquire bundler migration lock")?;

        let res: Result<()> = async {
            exec_sql_batch(&mut *conn, MIGRATIONS[0].1)
                .await
                .context("apply bundler schema bootstrap (v1)")?;

            for (version, sql) in MIGRATIONS {
                if *version == 1 {
                    continue;
                }
                let applied: Option<i32> = sqlx::query_scalar(
                    "select version from bundler.schema_migrations where version = $1",
                )
                .bind(*version)
                .fetch_optional(&mut *conn)
                .await
                .context("read bundler.schema_migrations")?;

                if applied.is_some() {
                    continue;
                }

                let mut tx = conn.begin().await.context("begin migration tx")?;
                exec_sql_batch(&mut *tx, sql)
                    .await
                    .with_context(|| format!("apply bundler migration v{version}"))?;
                sqlx::query("insert into bundler.schema_migrations(version) values ($1)")
                    .bind(*version)
                    .execute(&mut *tx)
                    .await
                    .context("insert bundler.schema_migrations")?;
                tx.commit().await.context("commit migration tx")?;
            }
            Ok(())
        }
        .await;

        let _ = sqlx::query("select pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await;

        res
    }
}
