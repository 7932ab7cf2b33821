use serde::Serialize;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client as DbClient, Ws};
use tracing::{debug, info};

use crate::CRATE_NAME;
use crate::config::EngineConfig;
use crate::misc::die;

/// Connects to the SurrealDB instance at `EngineConfig::database_uri` over the
/// `remote::ws` engine and selects the engine's namespace/database. Tasks
/// themselves are never persisted here (§9 "no attempt to preserve in-flight
/// tasks across restarts" — `registry.rs`'s `TaskRegistry` is in-memory only);
/// this backs only the durable `QuotaStore` adapter below.
#[tracing::instrument]
pub async fn db_init() -> Surreal<DbClient> {
    let config = EngineConfig::from_env();
    let address = config
        .database_uri
        .trim_start_matches("ws://")
        .trim_start_matches("wss://");

    debug!("Connecting to database at {} ...", config.database_uri);
    let db = Surreal::new::<Ws>(address)
        .await
        .unwrap_or_else(|e| die(format!("Failed to connect to database: {e}")));

    db.use_ns(CRATE_NAME)
        .use_db(CRATE_NAME)
        .await
        .unwrap_or_else(|e| die(format!("Failed to select namespace/database: {e}")));

    info!("Database is ready.");
    db
}

/// Durable `QuotaStore` (§12 open question #1's persistent adapter), not
/// part of the tested contract (`quota.rs`'s own test suite runs against
/// `InMemoryQuotaStore`). One row per Telegram user, keyed by `user.0`.
pub struct SurrealQuotaStore {
    db: Surreal<DbClient>,
}

impl SurrealQuotaStore {
    pub fn new(db: Surreal<DbClient>) -> Self {
        SurrealQuotaStore { db }
    }
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
struct StoredQuota {
    user_id: i64,
    tier: String,
    plan_expiry_date: Option<String>,
    last_reset_date: String,
    daily_used_bytes: u64,
    total_used_bytes: u64,
    files_processed: u64,
    caption_footer: Option<String>,
}

impl StoredQuota {
    fn from_quota(user_id: i64, quota: &crate::quota::UserQuota) -> Self {
        StoredQuota {
            user_id,
            tier: quota.tier.clone(),
            plan_expiry_date: quota.plan_expiry_date.clone(),
            last_reset_date: quota.last_reset_date.clone(),
            daily_used_bytes: quota.daily_used_bytes,
            total_used_bytes: quota.total_used_bytes,
            files_processed: quota.files_processed,
            caption_footer: quota.caption_footer.clone(),
        }
    }

    fn into_quota(self) -> crate::quota::UserQuota {
        crate::quota::UserQuota {
            tier: self.tier,
            plan_expiry_date: self.plan_expiry_date,
            last_reset_date: self.last_reset_date,
            daily_used_bytes: self.daily_used_bytes,
            total_used_bytes: self.total_used_bytes,
            files_processed: self.files_processed,
            caption_footer: self.caption_footer,
        }
    }
}

impl crate::quota::QuotaStore for SurrealQuotaStore {
    #[tracing::instrument(skip(self))]
    async fn get_or_create(
        &self,
        user: teloxide::types::UserId,
        default_tier: &str,
        today: &str,
    ) -> crate::error::EngineResult<crate::quota::UserQuota> {
        let query = "SELECT * FROM quota WHERE user_id = $user_id";
        let found: Vec<StoredQuota> = self
            .db
            .query(query)
            .bind(("user_id", user.0 as i64))
            .await
            .map_err(crate::error::EngineError::fatal)?
            .take(0)
            .map_err(crate::error::EngineError::fatal)?;

        match found.into_iter().next() {
            Some(stored) => Ok(stored.into_quota()),
            None => Ok(crate::quota::UserQuota::new(default_tier, today)),
        }
    }

    #[tracing::instrument(skip(self, quota))]
    async fn save(&self, user: teloxide::types::UserId, quota: crate::quota::UserQuota) -> crate::error::EngineResult<()> {
        let stored = StoredQuota::from_quota(user.0 as i64, &quota);

        // No `UPSERT` in this crate's query surface yet, so read-then-write.
        let existing: Vec<StoredQuota> = self
            .db
            .query("SELECT * FROM quota WHERE user_id = $user_id")
            .bind(("user_id", user.0 as i64))
            .await
            .map_err(crate::error::EngineError::fatal)?
            .take(0)
            .map_err(crate::error::EngineError::fatal)?;

        if existing.is_empty() {
            let _: Vec<StoredQuota> = self
                .db
                .create("quota")
                .content(stored)
                .await
                .map_err(crate::error::EngineError::fatal)?;
        } else {
            self.db
                .query("UPDATE quota CONTENT $stored WHERE user_id = $user_id")
                .bind(("stored", stored))
                .bind(("user_id", user.0 as i64))
                .await
                .map_err(crate::error::EngineError::fatal)?;
        }
        Ok(())
    }
}
