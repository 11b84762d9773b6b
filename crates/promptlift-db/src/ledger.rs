//! PostgreSQL quota ledger implementation.
//!
//! The `users` row carries all usage counters; every mutation is a single
//! atomic statement (or one transaction) so concurrent requests for the same
//! user serialize on the row and never lose an increment or double-spend the
//! last free-tier slot.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use promptlift_core::defaults::FREE_DAILY_LIMIT;
use promptlift_core::{Error, Platform, QuotaCheck, QuotaLedger, QuotaSnapshot, Result, Tier};

/// PostgreSQL implementation of `QuotaLedger`.
#[derive(Clone)]
pub struct PgQuotaLedger {
    pool: PgPool,
}

impl PgQuotaLedger {
    /// Create a new ledger backed by the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read a snapshot with the day rollover applied in the read.
    async fn fetch_snapshot<'e, E>(executor: E, email: &str) -> Result<Option<QuotaSnapshot>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query(
            r#"
            SELECT
                lifetime_count,
                CASE WHEN last_reset_date < CURRENT_DATE THEN 0 ELSE daily_count END
                    AS effective_daily,
                subscription_tier
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(executor)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let tier = Tier::from_db(row.get::<String, _>("subscription_tier").as_str());
            QuotaSnapshot::new(
                row.get("lifetime_count"),
                row.get("effective_daily"),
                tier,
                FREE_DAILY_LIMIT,
            )
        }))
    }

    /// Atomic rollover-check-increment of the usage counters.
    ///
    /// Returns the post-increment snapshot, or `None` when the write-time
    /// limit re-check refused the increment (free tier at the limit).
    async fn try_increment<'e, E>(
        executor: E,
        email: &str,
        platform: Platform,
    ) -> Result<Option<QuotaSnapshot>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let row = sqlx::query(
            r#"
            UPDATE users SET
                lifetime_count = lifetime_count + 1,
                daily_count = CASE
                    WHEN last_reset_date < CURRENT_DATE THEN 0
                    ELSE daily_count
                END + CASE WHEN subscription_tier = 'free' THEN 1 ELSE 0 END,
                last_reset_date = CURRENT_DATE,
                platform_counts = jsonb_set(
                    platform_counts,
                    ARRAY[$2],
                    to_jsonb(COALESCE((platform_counts->>$2)::bigint, 0) + 1)
                ),
                updated_at_utc = NOW()
            WHERE email = $1
              AND (
                subscription_tier <> 'free'
                OR (CASE WHEN last_reset_date < CURRENT_DATE THEN 0 ELSE daily_count END) < $3
              )
            RETURNING lifetime_count, daily_count, subscription_tier
            "#,
        )
        .bind(email)
        .bind(platform.as_str())
        .bind(FREE_DAILY_LIMIT)
        .fetch_optional(executor)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|row| {
            let tier = Tier::from_db(row.get::<String, _>("subscription_tier").as_str());
            QuotaSnapshot::new(
                row.get("lifetime_count"),
                row.get("daily_count"),
                tier,
                FREE_DAILY_LIMIT,
            )
        }))
    }
}

#[async_trait]
impl QuotaLedger for PgQuotaLedger {
    async fn ensure_user(&self, email: &str, display_name: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO users (email, display_name)
            VALUES ($1, $2)
            ON CONFLICT (email) DO UPDATE SET
                display_name = COALESCE(EXCLUDED.display_name, users.display_name),
                updated_at_utc = NOW()
            "#,
        )
        .bind(email)
        .bind(display_name)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    }

    async fn check_quota(&self, email: &str) -> Result<QuotaCheck> {
        // Materialize the rollover so a later increment in the same day
        // starts from a reset counter.
        sqlx::query(
            r#"
            UPDATE users
            SET daily_count = 0, last_reset_date = CURRENT_DATE, updated_at_utc = NOW()
            WHERE email = $1 AND last_reset_date < CURRENT_DATE
            "#,
        )
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let snapshot = Self::fetch_snapshot(&self.pool, email)
            .await?
            .ok_or_else(|| Error::UserNotFound(email.to_string()))?;

        Ok(QuotaCheck {
            allowed: !snapshot.limit_reached,
            snapshot,
        })
    }

    async fn commit_usage(
        &self,
        event_id: &str,
        email: &str,
        platform: Platform,
    ) -> Result<QuotaSnapshot> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO enhancement_events (id, user_email, platform)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(email)
        .bind(platform.as_str())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if inserted == 0 {
            // Replayed commit: counters were already charged for this event.
            debug!(
                subsystem = "ledger",
                op = "commit",
                event_id,
                email,
                "Duplicate commit ignored"
            );
            let snapshot = Self::fetch_snapshot(&mut *tx, email)
                .await?
                .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
            tx.commit().await.map_err(Error::Database)?;
            return Ok(snapshot);
        }

        match Self::try_increment(&mut *tx, email, platform).await? {
            Some(snapshot) => {
                tx.commit().await.map_err(Error::Database)?;
                Ok(snapshot)
            }
            None => {
                // Write-time re-check refused the increment. Roll back so the
                // event row disappears with the refused charge.
                let snapshot = Self::fetch_snapshot(&mut *tx, email)
                    .await?
                    .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
                tx.rollback().await.map_err(Error::Database)?;
                warn!(
                    subsystem = "ledger",
                    op = "commit",
                    email,
                    daily_count = snapshot.daily_count,
                    "Commit refused at limit"
                );
                Ok(snapshot)
            }
        }
    }

    async fn record_usage(&self, email: &str, platform: Platform) -> Result<QuotaCheck> {
        sqlx::query(
            r#"
            INSERT INTO users (email) VALUES ($1)
            ON CONFLICT (email) DO NOTHING
            "#,
        )
        .bind(email)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        match Self::try_increment(&self.pool, email, platform).await? {
            Some(snapshot) => Ok(QuotaCheck {
                allowed: true,
                snapshot,
            }),
            None => {
                let snapshot = Self::fetch_snapshot(&self.pool, email)
                    .await?
                    .ok_or_else(|| Error::UserNotFound(email.to_string()))?;
                Ok(QuotaCheck {
                    allowed: false,
                    snapshot,
                })
            }
        }
    }

    async fn get_user(&self, email: &str) -> Result<Option<QuotaSnapshot>> {
        Self::fetch_snapshot(&self.pool, email).await
    }
}
