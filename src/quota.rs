use std::collections::HashMap;
use std::sync::Mutex;

use teloxide::types::UserId;
use tracing::info;

use crate::error::{EngineError, EngineResult};

/// A user's plan/usage record, the Rust equivalent of `database.py`'s
/// `new_user` document shape, narrowed to the fields the Quota Gate (4.J)
/// actually reads and mutates.
#[derive(Debug, Clone)]
pub struct UserQuota {
    pub tier: String,
    pub plan_expiry_date: Option<String>,
    pub last_reset_date: String,
    pub daily_used_bytes: u64,
    pub total_used_bytes: u64,
    pub files_processed: u64,
    /// Custom caption suffix appended to every upload (§6 `/add_footer`,
    /// `/remove_footer`); lives on the quota record so it persists through
    /// the same `QuotaStore` as the rest of the user's plan state.
    pub caption_footer: Option<String>,
}

impl UserQuota {
    pub fn new(default_tier: &str, today: &str) -> Self {
        UserQuota {
            tier: default_tier.to_string(),
            plan_expiry_date: None,
            last_reset_date: today.to_string(),
            daily_used_bytes: 0,
            total_used_bytes: 0,
            files_processed: 0,
            caption_footer: None,
        }
    }
}

/// The persistent user/quota store boundary (§12's open question #1's
/// "modeled here as a `QuotaStore` trait"). Async fns make this
/// non-dyn-compatible the same way `ChatTransport`/`InputFetcher` are (see
/// `DESIGN.md` Q4); callers take it as a generic bound.
pub trait QuotaStore: Send + Sync {
    async fn get_or_create(&self, user: UserId, default_tier: &str, today: &str) -> EngineResult<UserQuota>;
    async fn save(&self, user: UserId, quota: UserQuota) -> EngineResult<()>;
}

/// In-memory `QuotaStore` — the one this crate tests its quota logic
/// against, per §12's note that the durable adapter isn't part of the
/// tested contract. Shape mirrors `database.py`'s `col` collection keyed by
/// user id, collapsed to a `Mutex<HashMap>`.
#[derive(Default)]
pub struct InMemoryQuotaStore {
    users: Mutex<HashMap<UserId, UserQuota>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        InMemoryQuotaStore::default()
    }
}

impl QuotaStore for InMemoryQuotaStore {
    async fn get_or_create(&self, user: UserId, default_tier: &str, today: &str) -> EngineResult<UserQuota> {
        let mut users = self.users.lock().unwrap();
        Ok(users.entry(user).or_insert_with(|| UserQuota::new(default_tier, today)).clone())
    }

    async fn save(&self, user: UserId, quota: UserQuota) -> EngineResult<()> {
        self.users.lock().unwrap().insert(user, quota);
        Ok(())
    }
}

/// Per-tier daily byte budget lookup, the Rust side of `EngineConfig`'s
/// `daily_limit_gib_by_tier`.
pub trait TierLimits {
    fn tier_limit_bytes(&self, tier: &str) -> Option<u64>;

    /// Path to the maintenance-mode sentinel file (§11). `None` means this
    /// `TierLimits` implementation never gates on maintenance mode (e.g.
    /// the fixed-limit test doubles below).
    fn maintenance_sentinel_path(&self) -> Option<&std::path::Path> {
        None
    }
}

impl TierLimits for crate::config::EngineConfig {
    fn tier_limit_bytes(&self, tier: &str) -> Option<u64> {
        crate::config::EngineConfig::tier_limit_bytes(self, tier)
    }

    fn maintenance_sentinel_path(&self) -> Option<&std::path::Path> {
        Some(std::path::Path::new(&self.maintenance_sentinel_path))
    }
}

/// Admission decision for an incoming transfer of `incoming_size` bytes
/// (§4.J). Steps, in order, per the spec:
/// 1. maintenance-mode sentinel (non-admins only),
/// 2. admin bypass,
/// 3. expired-plan revert to default,
/// 4. daily-usage reset on date rollover,
/// 5. budget check.
/// Returns the (possibly tier-reverted/date-rolled) quota to persist via
/// `mark_transfer_complete` once the transfer actually succeeds — admission
/// alone doesn't charge usage.
pub async fn admit<S: QuotaStore, L: TierLimits>(
    store: &S,
    limits: &L,
    user: UserId,
    is_admin: bool,
    default_tier: &str,
    today: &str,
    incoming_size: u64,
) -> EngineResult<UserQuota> {
    if !is_admin {
        if let Some(sentinel) = limits.maintenance_sentinel_path() {
            if sentinel.exists() {
                return Err(EngineError::user_input("the bot is in maintenance mode right now, please try again later"));
            }
        }
    }

    if is_admin {
        return store.get_or_create(user, default_tier, today).await;
    }

    let mut quota = store.get_or_create(user, default_tier, today).await?;

    if let Some(expiry) = &quota.plan_expiry_date {
        if expiry.as_str() < today {
            info!("plan for {user:?} expired on {expiry}, reverting to {default_tier}");
            quota.tier = default_tier.to_string();
            quota.plan_expiry_date = None;
        }
    }

    if quota.last_reset_date != today {
        quota.daily_used_bytes = 0;
        quota.last_reset_date = today.to_string();
    }

    let limit = limits.tier_limit_bytes(&quota.tier).unwrap_or(u64::MAX);
    if quota.daily_used_bytes + incoming_size > limit {
        return Err(EngineError::Quota { needed: incoming_size, available: limit.saturating_sub(quota.daily_used_bytes) });
    }

    store.save(user, quota.clone()).await?;
    Ok(quota)
}

/// Atomically increments daily/total usage and files-processed on a
/// successful transfer (§4.J "On successful transfer completion ...
/// incremented atomically"). Grounded on `database.py::update_user_stats`.
pub async fn mark_transfer_complete<S: QuotaStore>(store: &S, user: UserId, default_tier: &str, today: &str, transferred_bytes: u64) -> EngineResult<()> {
    let mut quota = store.get_or_create(user, default_tier, today).await?;
    quota.daily_used_bytes += transferred_bytes;
    quota.total_used_bytes += transferred_bytes;
    quota.files_processed += 1;
    store.save(user, quota).await
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLimits(u64);
    impl TierLimits for FixedLimits {
        fn tier_limit_bytes(&self, _tier: &str) -> Option<u64> {
            Some(self.0)
        }
    }

    struct MaintenanceLimits {
        limit: u64,
        sentinel: std::path::PathBuf,
    }
    impl TierLimits for MaintenanceLimits {
        fn tier_limit_bytes(&self, _tier: &str) -> Option<u64> {
            Some(self.limit)
        }
        fn maintenance_sentinel_path(&self) -> Option<&std::path::Path> {
            Some(&self.sentinel)
        }
    }

    #[tokio::test]
    async fn maintenance_sentinel_rejects_non_admins_before_any_other_check() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("maintenance.flag");
        std::fs::write(&sentinel, b"").unwrap();
        let store = InMemoryQuotaStore::new();
        let limits = MaintenanceLimits { limit: 1_000_000, sentinel };

        let result = admit(&store, &limits, UserId(1), false, "free", "2026-01-01", 1).await;
        assert!(matches!(result, Err(EngineError::UserInput { .. })));
    }

    #[tokio::test]
    async fn maintenance_sentinel_does_not_block_admins() {
        let dir = tempfile::tempdir().unwrap();
        let sentinel = dir.path().join("maintenance.flag");
        std::fs::write(&sentinel, b"").unwrap();
        let store = InMemoryQuotaStore::new();
        let limits = MaintenanceLimits { limit: 1_000_000, sentinel };

        let result = admit(&store, &limits, UserId(1), true, "free", "2026-01-01", 1).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn admin_bypasses_the_budget_check() {
        let store = InMemoryQuotaStore::new();
        let limits = FixedLimits(10);
        let quota = admit(&store, &limits, UserId(1), true, "free", "2026-01-01", 1_000_000).await.unwrap();
        assert_eq!(quota.tier, "free");
    }

    #[tokio::test]
    async fn over_budget_transfer_is_rejected_with_quota_error() {
        let store = InMemoryQuotaStore::new();
        let limits = FixedLimits(100);
        let result = admit(&store, &limits, UserId(1), false, "free", "2026-01-01", 1_000).await;
        assert!(matches!(result, Err(EngineError::Quota { .. })));
    }

    #[tokio::test]
    async fn daily_usage_resets_on_date_rollover() {
        let store = InMemoryQuotaStore::new();
        let limits = FixedLimits(1_000_000);
        mark_transfer_complete(&store, UserId(1), "free", "2026-01-01", 900_000).await.unwrap();

        let quota = admit(&store, &limits, UserId(1), false, "free", "2026-01-02", 900_000).await.unwrap();
        assert_eq!(quota.daily_used_bytes, 0);
        assert_eq!(quota.last_reset_date, "2026-01-02");
    }

    #[tokio::test]
    async fn expired_plan_reverts_to_default_tier() {
        let store = InMemoryQuotaStore::new();
        let mut quota = store.get_or_create(UserId(1), "free", "2026-01-01").await.unwrap();
        quota.tier = "plus".to_string();
        quota.plan_expiry_date = Some("2025-12-31".to_string());
        store.save(UserId(1), quota).await.unwrap();

        let limits = FixedLimits(1_000_000);
        let quota = admit(&store, &limits, UserId(1), false, "free", "2026-01-01", 1).await.unwrap();
        assert_eq!(quota.tier, "free");
        assert!(quota.plan_expiry_date.is_none());
    }

    #[tokio::test]
    async fn successful_transfer_increments_usage_and_file_count_atomically() {
        let store = InMemoryQuotaStore::new();
        mark_transfer_complete(&store, UserId(1), "free", "2026-01-01", 500).await.unwrap();
        mark_transfer_complete(&store, UserId(1), "free", "2026-01-01", 300).await.unwrap();

        let quota = store.get_or_create(UserId(1), "free", "2026-01-01").await.unwrap();
        assert_eq!(quota.daily_used_bytes, 800);
        assert_eq!(quota.total_used_bytes, 800);
        assert_eq!(quota.files_processed, 2);
    }
}
