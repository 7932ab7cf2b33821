use std::time::{Duration, Instant};

use sysinfo::System;
use tracing::{info, warn};

/// Reasons the Watchdog (4.K) decided to trigger a restart, handed to the
/// Restart Coordinator (4.L). Grounded on `restart.py::_watchdog_loop`'s
/// two trigger conditions.
#[derive(Debug, Clone, PartialEq)]
pub enum RestartReason {
    ResourceSaturation { cpu_pct: f32, ram_pct: f32 },
    Idle { idle: Duration },
}

impl std::fmt::Display for RestartReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartReason::ResourceSaturation { cpu_pct, ram_pct } => {
                write!(f, "high resource usage (CPU: {cpu_pct:.0}%, RAM: {ram_pct:.0}%)")
            }
            RestartReason::Idle { idle } => write!(f, "inactivity restart ({:.1}h idle)", idle.as_secs_f64() / 3600.0),
        }
    }
}

/// Tracks "no tasks running and either saturated or idle past the
/// threshold" — the two independent conditions §4.K evaluates each tick.
/// Pure decision logic, no sleeping/process exit: `tracing::instrument`ed
/// callers own the loop, `restart.rs` owns the actual exit.
pub struct Watchdog {
    pub cpu_threshold_pct: f32,
    pub ram_threshold_pct: f32,
    pub idle_timeout: Duration,
    last_activity: Instant,
    system: System,
}

impl Watchdog {
    pub fn new(cpu_threshold_pct: f32, ram_threshold_pct: f32, idle_timeout: Duration) -> Self {
        Watchdog { cpu_threshold_pct, ram_threshold_pct, idle_timeout, last_activity: Instant::now(), system: System::new() }
    }

    /// Resets the idle clock. Call on any user-initiated activity, the
    /// Rust side of `restart.py::touch_activity`.
    pub fn touch_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    fn sample_resources(&mut self) -> (f32, f32) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();
        let cpu = self.system.global_cpu_usage();
        let ram = if self.system.total_memory() == 0 {
            0.0
        } else {
            (self.system.used_memory() as f32 / self.system.total_memory() as f32) * 100.0
        };
        (cpu, ram)
    }

    /// One health-check tick (§4.K): returns `Some(reason)` only when a
    /// restart should actually fire — resource saturation with zero active
    /// tasks, or idle past the timeout with zero active tasks. Saturation
    /// with tasks still running is logged but doesn't trigger, matching
    /// `restart.py`'s "waiting for them to finish" branch.
    pub fn check(&mut self, active_task_count: usize) -> Option<RestartReason> {
        let (cpu, ram) = self.sample_resources();
        let saturated = cpu > self.cpu_threshold_pct || ram > self.ram_threshold_pct;

        if saturated && active_task_count == 0 {
            warn!("health: CPU={cpu:.1}% RAM={ram:.1}%, no active tasks, triggering restart");
            return Some(RestartReason::ResourceSaturation { cpu_pct: cpu, ram_pct: ram });
        }
        if saturated {
            warn!("health: CPU={cpu:.1}% RAM={ram:.1}%, {active_task_count} tasks active, waiting for them to finish");
        }

        let idle = self.last_activity.elapsed();
        if idle > self.idle_timeout && active_task_count == 0 {
            info!("idle for {:.1}h, triggering restart", idle.as_secs_f64() / 3600.0);
            return Some(RestartReason::Idle { idle });
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_watchdog_with_no_activity_elapsed_does_not_trigger() {
        let mut watchdog = Watchdog::new(90.0, 90.0, Duration::from_secs(86_400));
        assert_eq!(watchdog.check(0), None);
    }

    #[test]
    fn touch_activity_resets_the_idle_clock() {
        let mut watchdog = Watchdog::new(90.0, 90.0, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        watchdog.touch_activity();
        // idle_timeout is 1ms but we just touched activity, so this tick's
        // idle duration is far below it regardless of threshold crossing.
        assert!(watchdog.last_activity.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn restart_reason_display_matches_the_documented_wording_shape() {
        let reason = RestartReason::ResourceSaturation { cpu_pct: 95.0, ram_pct: 40.0 };
        assert_eq!(reason.to_string(), "high resource usage (CPU: 95%, RAM: 40%)");
    }
}
