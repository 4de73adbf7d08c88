use serde::Deserialize;

use crate::engine::EngineSettings;
use crate::rollup::{MinLevels, RollupLevelConfig, validate_levels};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub rollup: RollupConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    pub live: LiveConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    /// Level 0 first (raw), coarsest last.
    pub levels: Vec<RollupLevelConfig>,
    #[serde(default)]
    pub min_level: MinLevels,
    pub rollup_interval_secs: u64,
    /// A bucket is rolled up only once it ended at least this long ago.
    pub rollup_delay_millis: i64,
    /// Optional cron expression for VACUUM (e.g. "0 3 * * *" = 03:00 daily). Uses local time.
    #[serde(default)]
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    #[serde(default = "default_vacuum_interval_secs")]
    pub vacuum_interval_secs: u64,
}

fn default_vacuum_interval_secs() -> u64 {
    86_400
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    /// Consecutive points farther apart than this many intervals get a gap.
    pub gap_multiplier: f64,
    pub live_tail_suppression_millis: i64,
    pub fallback_interval_multiplier: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        let engine = EngineSettings::default();
        Self {
            gap_multiplier: 1.5,
            live_tail_suppression_millis: engine.live_tail_suppression_millis,
            fallback_interval_multiplier: engine.fallback_interval_multiplier,
        }
    }
}

impl ChartConfig {
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            live_tail_suppression_millis: self.live_tail_suppression_millis,
            fallback_interval_multiplier: self.fallback_interval_multiplier,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveConfig {
    pub flush_interval_secs: u64,
    /// Live records younger than this are not flushed yet.
    pub flush_delay_millis: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    /// Upper bound on concurrently running pool tasks (report queries, backfill).
    pub max_concurrent_queries: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 8,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );

        validate_levels(&self.rollup.levels)?;
        let coarsest = self.rollup.levels.len() - 1;
        anyhow::ensure!(
            self.rollup.min_level.transaction <= coarsest,
            "rollup.min_level.transaction must be <= {}, got {}",
            coarsest,
            self.rollup.min_level.transaction
        );
        anyhow::ensure!(
            self.rollup.min_level.synthetic <= coarsest,
            "rollup.min_level.synthetic must be <= {}, got {}",
            coarsest,
            self.rollup.min_level.synthetic
        );
        anyhow::ensure!(
            self.rollup.rollup_interval_secs > 0,
            "rollup.rollup_interval_secs must be > 0, got {}",
            self.rollup.rollup_interval_secs
        );
        anyhow::ensure!(
            self.rollup.rollup_delay_millis > self.live.flush_delay_millis,
            "rollup.rollup_delay_millis must be > live.flush_delay_millis ({}), got {}",
            self.live.flush_delay_millis,
            self.rollup.rollup_delay_millis
        );
        anyhow::ensure!(
            self.rollup.vacuum_interval_secs > 0,
            "rollup.vacuum_interval_secs must be > 0, got {}",
            self.rollup.vacuum_interval_secs
        );
        if let Some(ref schedule) = self.rollup.vacuum_schedule {
            anyhow::ensure!(
                <cron::Schedule as std::str::FromStr>::from_str(schedule).is_ok(),
                "rollup.vacuum_schedule is not a valid cron expression: {}",
                schedule
            );
        }
        for (i, pair) in self.rollup.levels.windows(2).enumerate() {
            if let Some(retention) = pair[0].retention_millis() {
                anyhow::ensure!(
                    retention > pair[1].interval_millis + self.rollup.rollup_delay_millis,
                    "rollup.levels[{}].retention_hours must outlast one level {} bucket plus rollup_delay_millis",
                    i,
                    i + 1
                );
            }
        }

        anyhow::ensure!(
            self.chart.gap_multiplier >= 1.0,
            "chart.gap_multiplier must be >= 1, got {}",
            self.chart.gap_multiplier
        );
        anyhow::ensure!(
            self.chart.live_tail_suppression_millis >= 0,
            "chart.live_tail_suppression_millis must be >= 0, got {}",
            self.chart.live_tail_suppression_millis
        );
        anyhow::ensure!(
            self.chart.fallback_interval_multiplier > 0.0,
            "chart.fallback_interval_multiplier must be > 0, got {}",
            self.chart.fallback_interval_multiplier
        );
        anyhow::ensure!(
            self.live.flush_interval_secs > 0,
            "live.flush_interval_secs must be > 0, got {}",
            self.live.flush_interval_secs
        );
        anyhow::ensure!(
            self.live.flush_delay_millis >= 0,
            "live.flush_delay_millis must be >= 0, got {}",
            self.live.flush_delay_millis
        );
        anyhow::ensure!(
            self.workers.max_concurrent_queries > 0,
            "workers.max_concurrent_queries must be > 0, got {}",
            self.workers.max_concurrent_queries
        );
        Ok(())
    }
}
