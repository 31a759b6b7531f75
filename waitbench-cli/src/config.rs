//! Configuration loading from waitbench.toml
//!
//! Defaults for the command line can be kept in a `waitbench.toml` file. The
//! file is discovered by walking up from the current directory; flags given on
//! the command line override it.

use crate::background::ExecutionContext;
use crate::report::OutputFormat;
use crate::strategy::FailureMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File name looked up during discovery
pub const CONFIG_FILE: &str = "waitbench.toml";

/// Waitbench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WaitbenchConfig {
    /// Benchmark run defaults
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Heartbeat defaults
    #[serde(default)]
    pub heartbeat: HeartbeatSection,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Defaults for `waitbench run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Strategies to compare; `all` expands to every strategy
    #[serde(default = "default_strategies")]
    pub strategies: Vec<String>,
    /// Tasks per batch
    #[serde(default = "default_task_count")]
    pub task_count: usize,
    /// Wait per task (e.g., "1s", "250ms")
    #[serde(default = "default_task_duration")]
    pub task_duration: String,
    /// Concurrency limit for the pools (one worker per task when unset)
    #[serde(default)]
    pub workers: Option<usize>,
    /// CPU budget of the distributed pool
    #[serde(default)]
    pub cpus: Option<usize>,
    /// Distributed only: completions to await before returning
    #[serde(default)]
    pub await_count: Option<usize>,
    /// Cooperative failure policy: "gather" or "first-failure"
    #[serde(default)]
    pub mode: FailureMode,
    /// Draw a progress bar per strategy
    #[serde(default)]
    pub progress: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            task_count: default_task_count(),
            task_duration: default_task_duration(),
            workers: None,
            cpus: None,
            await_count: None,
            mode: FailureMode::default(),
            progress: false,
        }
    }
}

fn default_strategies() -> Vec<String> {
    vec!["all".to_string()]
}
fn default_task_count() -> usize {
    10
}
fn default_task_duration() -> String {
    "1s".to_string()
}

/// Defaults for `waitbench heartbeat`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSection {
    /// Ticker interval
    #[serde(default = "default_tick")]
    pub tick_interval: String,
    /// Announcer interval
    #[serde(default = "default_announce")]
    pub announce_interval: String,
    /// Announcer text
    #[serde(default = "default_message")]
    pub message: String,
    /// Where the units run: "thread", "process" or "distributed"
    #[serde(default)]
    pub context: ExecutionContext,
    /// CPU budget for the distributed context
    #[serde(default = "default_heartbeat_cpus")]
    pub cpus: usize,
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        Self {
            tick_interval: default_tick(),
            announce_interval: default_announce(),
            message: default_message(),
            context: ExecutionContext::default(),
            cpus: default_heartbeat_cpus(),
        }
    }
}

fn default_tick() -> String {
    "1s".to_string()
}
fn default_announce() -> String {
    "5s".to_string()
}
fn default_message() -> String {
    waitbench_core::heartbeat::DEFAULT_ANNOUNCEMENT.to_string()
}
fn default_heartbeat_cpus() -> usize {
    1
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    /// Report format: human or json
    #[serde(default)]
    pub format: OutputFormat,
}

impl WaitbenchConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!(path = %config_path.display(), error = %e, "ignoring unreadable config");
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Generate a default configuration as TOML string
    pub fn default_toml() -> String {
        r#"# Waitbench Configuration

[runner]
# Strategies to compare: sequential, cooperative, cooperative-list,
# thread-pool, process-pool, distributed, or all
strategies = ["all"]
# Tasks per batch
task_count = 10
# Wait per task
task_duration = "1s"
# Concurrency limit for the pools (uncomment to enable)
# workers = 4
# CPU budget for the distributed pool (defaults to workers, then the
# machine's available parallelism)
# cpus = 4
# Only await the first K distributed completions (uncomment to enable)
# await_count = 5
# Cooperative failure policy: "gather" or "first-failure"
mode = "gather"
# Draw a progress bar per strategy
progress = false

[heartbeat]
tick_interval = "1s"
announce_interval = "5s"
message = "task is running"
# Where the units run: "thread", "process" or "distributed"
context = "thread"
# CPU budget for the distributed context
cpus = 1

[output]
# Report format: human or json
format = "human"
"#
        .to_string()
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m")
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        // Find where the number ends and unit begins
        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic() || *c == 'µ')
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Duration must be non-negative: {}", s));
        }

        let seconds_per_unit = match unit_part.to_lowercase().as_str() {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" | "" => 1.0,
            "m" | "min" => 60.0,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|e| anyhow::anyhow!("Duration out of range: {}: {}", s, e))
    }
}
