use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Process-level configuration for the agent binary itself, distinct from
/// the managed document tree `ConfigStore` holds (§11). Flags fall back to
/// environment variables, mirroring the corpus's CLI convention.
#[derive(Debug, Parser)]
#[command(name = "nucleus-agent", about = "Edge-device deployment agent", version)]
pub struct AgentSettings {
    /// Root of the on-disk persistent state layout (§6).
    #[arg(long, env = "NUCLEUS_ROOT_DIR", default_value = "/var/lib/nucleus")]
    pub root_dir: PathBuf,

    /// Identifier this device reports itself as in status documents.
    #[arg(long, env = "NUCLEUS_DEVICE_ID")]
    pub device_id: String,

    /// Platform selector tags, most to least specific, used to rank recipe
    /// manifest variants (§4.2), e.g. "ubuntu,linux".
    #[arg(long, env = "NUCLEUS_PLATFORM_TAGS", value_delimiter = ',', default_value = "linux")]
    pub platform_tags: Vec<String>,

    /// Base URL the recipe fetcher pulls uncached recipe documents from.
    #[arg(long, env = "NUCLEUS_RECIPE_BASE_URL")]
    pub recipe_base_url: Option<String>,

    /// Base URL the cloud channel reports status and errors to. Absent
    /// means status/error reporting falls back to structured logging only.
    #[arg(long, env = "NUCLEUS_CLOUD_BASE_URL")]
    pub cloud_base_url: Option<String>,

    /// Restart-budget sliding window (§4.4).
    #[arg(long, env = "NUCLEUS_RESTART_WINDOW_SEC", default_value_t = 600)]
    pub restart_window_sec: u64,

    /// Restart-budget failure count within the window that trips BROKEN (§4.4).
    #[arg(long, env = "NUCLEUS_RESTART_MAX_FAILURES", default_value_t = 3)]
    pub restart_max_failures: u32,

    /// Time RUNNING must hold before the restart budget resets (§4.4).
    #[arg(long, env = "NUCLEUS_RESTART_STABILIZATION_SEC", default_value_t = 120)]
    pub restart_stabilization_sec: u64,

    /// Per-component safe-update vote window (§4.6).
    #[arg(long, env = "NUCLEUS_SAFE_UPDATE_VOTE_WINDOW_SEC", default_value_t = 60)]
    pub safe_update_vote_window_sec: u64,

    /// Total deferral a single update may accumulate before proceeding
    /// anyway (§4.6).
    #[arg(long, env = "NUCLEUS_SAFE_UPDATE_DEFER_CAP_SEC", default_value_t = 900)]
    pub safe_update_defer_cap_sec: u64,

    /// Post-apply window a deployment must hold steady before it commits
    /// (§4.7).
    #[arg(long, env = "NUCLEUS_STABILIZATION_WINDOW_SEC", default_value_t = 30)]
    pub stabilization_window_sec: u64,

    /// Interval between dependency-transition propagation ticks (§4.4, §4.5).
    #[arg(long, env = "NUCLEUS_RECONCILE_TICK_MS", default_value_t = 2_000)]
    pub reconcile_tick_ms: u64,

    /// Per-component startup/shutdown phase timeout.
    #[arg(long, env = "NUCLEUS_COMPONENT_TIMEOUT_SEC", default_value_t = 30)]
    pub component_timeout_sec: u64,
}

impl AgentSettings {
    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_sec)
    }

    pub fn restart_stabilization(&self) -> Duration {
        Duration::from_secs(self.restart_stabilization_sec)
    }

    pub fn safe_update_vote_window(&self) -> Duration {
        Duration::from_secs(self.safe_update_vote_window_sec)
    }

    pub fn safe_update_defer_cap(&self) -> Duration {
        Duration::from_secs(self.safe_update_defer_cap_sec)
    }

    pub fn stabilization_window(&self) -> Duration {
        Duration::from_secs(self.stabilization_window_sec)
    }

    pub fn reconcile_tick(&self) -> Duration {
        Duration::from_millis(self.reconcile_tick_ms)
    }

    pub fn component_timeout(&self) -> Duration {
        Duration::from_secs(self.component_timeout_sec)
    }
}
