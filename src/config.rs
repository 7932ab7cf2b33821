use std::time::Duration;

use crate::misc::die;

/// Process-wide configuration loaded once at boot from the environment
/// variables enumerated in §6. Shares the "read env, fail fast on what's
/// missing, hand a typed struct to the rest of the program" shape of the
/// bot token bootstrap this crate started from.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bot_token: String,
    pub extra_worker_tokens: Vec<String>,
    pub owner_ids: Vec<i64>,
    pub database_uri: String,
    pub log_channel_id: Option<i64>,
    pub bin_channel_id: Option<i64>,
    pub public_base_url: String,
    pub daily_limit_gib_by_tier: Vec<(String, f64)>,
    pub default_plan: String,
    pub torrent_rpc_host: String,
    pub torrent_rpc_port: u16,
    pub torrent_rpc_user: Option<String>,
    pub torrent_rpc_pass: Option<String>,
    pub bind_addr: String,
    pub bind_port: u16,
    pub ping_interval: Duration,
    /// Sentinel file whose presence puts the Quota Gate into maintenance
    /// mode for non-admins (§11).
    pub maintenance_sentinel_path: String,

    pub stagger: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_startup_grace: Duration,
    pub cpu_threshold_pct: f32,
    pub ram_threshold_pct: f32,
    pub idle_timeout: Duration,
    pub restart_grace: Duration,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let bot_token = require_env("TELOXIDE_TOKEN");
        let extra_worker_tokens = env_list("EXTRA_WORKER_TOKENS");
        let owner_ids = env_list("OWNER_IDS")
            .into_iter()
            .map(|s| s.parse::<i64>().unwrap_or_else(|_| die(format!("OWNER_IDS: invalid id {s}"))))
            .collect();
        let database_uri = env_or("DATABASE_URI", "ws://127.0.0.1:8000");
        let log_channel_id = env_opt_i64("LOG_CHANNEL_ID");
        let bin_channel_id = env_opt_i64("BIN_CHANNEL_ID");
        let public_base_url = env_or("PUBLIC_BASE_URL", "http://127.0.0.1:8080");
        let default_plan = env_or("DEFAULT_PLAN", "free");
        let daily_limit_gib_by_tier = parse_tier_limits(&env_or("DAILY_LIMIT_GIB", "free:2.0"));
        let torrent_rpc_host = env_or("TORRENT_RPC_HOST", "127.0.0.1");
        let torrent_rpc_port = env_or("TORRENT_RPC_PORT", "8090").parse().unwrap_or(8090);
        let torrent_rpc_user = std::env::var("TORRENT_RPC_USER").ok();
        let torrent_rpc_pass = std::env::var("TORRENT_RPC_PASS").ok();
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0");
        let bind_port = env_or("BIND_PORT", "8080").parse().unwrap_or(8080);
        let ping_interval = Duration::from_secs(env_or("PING_INTERVAL_SECS", "60").parse().unwrap_or(60));
        let maintenance_sentinel_path = env_or("MAINTENANCE_FILE", "maintenance.flag");

        EngineConfig {
            bot_token,
            extra_worker_tokens,
            owner_ids,
            database_uri,
            log_channel_id,
            bin_channel_id,
            public_base_url,
            daily_limit_gib_by_tier,
            default_plan,
            torrent_rpc_host,
            torrent_rpc_port,
            torrent_rpc_user,
            torrent_rpc_pass,
            bind_addr,
            bind_port,
            ping_interval,
            maintenance_sentinel_path,

            stagger: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(300),
            watchdog_startup_grace: Duration::from_secs(120),
            cpu_threshold_pct: 90.0,
            ram_threshold_pct: 90.0,
            idle_timeout: Duration::from_secs(86_400),
            restart_grace: Duration::from_secs(3),
        }
    }

    pub fn is_owner(&self, user_id: i64) -> bool {
        self.owner_ids.contains(&user_id)
    }

    pub fn tier_limit_bytes(&self, tier: &str) -> Option<u64> {
        self.daily_limit_gib_by_tier
            .iter()
            .find(|(name, _)| name == tier)
            .map(|(_, gib)| (*gib * 1024.0 * 1024.0 * 1024.0) as u64)
    }
}

fn require_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| die(format!("missing required environment variable {key}")))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_i64(key: &str) -> Option<i64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Parses `"free:2.0 plus:20.0"` into per-tier daily GiB budgets.
fn parse_tier_limits(raw: &str) -> Vec<(String, f64)> {
    raw.split_whitespace()
        .filter_map(|entry| {
            let (name, gib) = entry.split_once(':')?;
            Some((name.to_string(), gib.parse().ok()?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_tier_limits() {
        let tiers = parse_tier_limits("free:2.0 plus:20.0 pro:100.5");
        assert_eq!(tiers.len(), 3);
        assert_eq!(tiers[1], ("plus".to_string(), 20.0));
    }

    #[test]
    fn tier_limit_bytes_converts_gib_to_bytes() {
        let cfg = EngineConfig {
            bot_token: String::new(),
            extra_worker_tokens: vec![],
            owner_ids: vec![],
            database_uri: String::new(),
            log_channel_id: None,
            bin_channel_id: None,
            public_base_url: String::new(),
            daily_limit_gib_by_tier: vec![("free".to_string(), 1.0)],
            default_plan: "free".to_string(),
            torrent_rpc_host: String::new(),
            torrent_rpc_port: 0,
            torrent_rpc_user: None,
            torrent_rpc_pass: None,
            bind_addr: String::new(),
            bind_port: 0,
            ping_interval: Duration::from_secs(1),
            maintenance_sentinel_path: "maintenance.flag".to_string(),
            stagger: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(300),
            watchdog_startup_grace: Duration::from_secs(120),
            cpu_threshold_pct: 90.0,
            ram_threshold_pct: 90.0,
            idle_timeout: Duration::from_secs(86_400),
            restart_grace: Duration::from_secs(3),
        };
        assert_eq!(cfg.tier_limit_bytes("free"), Some(1024 * 1024 * 1024));
        assert_eq!(cfg.tier_limit_bytes("missing"), None);
    }
}
