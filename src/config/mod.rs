//! Kernel configuration, assembled from environment variables with the
//! defaults from the design's §6 table. Each subsystem gets its own
//! sub-struct: fleet, bus, files, tasks, assignment, health,
//! coordination, sync, and the API surface.

use crate::constants::*;
use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub fleet: FleetConfig,
    pub bus: BusConfig,
    pub files: FileConfig,
    pub tasks: TaskConfig,
    pub assignment: AssignmentConfig,
    pub health: HealthConfig,
    pub coordination: CoordinationConfig,
    pub sync: SyncConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetConfig {
    pub max_agents: usize,
    pub max_concurrent_tasks_per_agent: u32,
    pub agent_heartbeat_interval: Duration,
    pub agent_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    pub queue_size: usize,
    pub retry_attempts: u32,
    pub message_timeout: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub lock_timeout: Duration,
    pub max_locks_per_agent: usize,
    pub backup_retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub default_task_timeout: Duration,
    pub max_task_retries: u32,
    pub priority_levels: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentConfig {
    pub weight_specialization: f64,
    pub weight_load: f64,
    pub weight_capability: f64,
    pub weight_priority: f64,
    pub weight_time: f64,
    pub weight_performance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    pub max_concurrent_sessions: usize,
    pub max_workflow_steps: usize,
    pub max_error_history: usize,
    pub cache_ttl: Duration,
    pub cleanup_interval: Duration,
    pub metrics_collection_interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub heartbeat_check_interval: Duration,
    pub max_missed_heartbeats: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub api_key: Option<String>,
    pub enable_auth: bool,
    pub allowed_origins: Vec<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(key, default_secs))
}

impl Config {
    /// Loads configuration from the environment, falling back to the
    /// design's defaults for anything unset. Nothing here is a *hard*
    /// requirement — the kernel can run fully unconfigured for local
    /// development and tests.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!("Loaded .env file from: {:?}", path),
            Err(_) => tracing::debug!("No .env file found, using process environment"),
        }

        let fleet = FleetConfig {
            max_agents: env_parse("KERNEL_MAX_AGENTS", DEFAULT_MAX_AGENTS),
            max_concurrent_tasks_per_agent: env_parse(
                "KERNEL_MAX_CONCURRENT_TASKS_PER_AGENT",
                DEFAULT_MAX_CONCURRENT_TASKS_PER_AGENT,
            ),
            agent_heartbeat_interval: env_secs(
                "KERNEL_AGENT_HEARTBEAT_INTERVAL_SECS",
                DEFAULT_AGENT_HEARTBEAT_INTERVAL_SECS,
            ),
            agent_timeout: env_secs("KERNEL_AGENT_TIMEOUT_SECS", DEFAULT_AGENT_TIMEOUT_SECS),
        };

        let bus = BusConfig {
            queue_size: env_parse("KERNEL_MESSAGE_QUEUE_SIZE", DEFAULT_MESSAGE_QUEUE_SIZE),
            retry_attempts: env_parse(
                "KERNEL_MESSAGE_RETRY_ATTEMPTS",
                DEFAULT_MESSAGE_RETRY_ATTEMPTS,
            ),
            message_timeout: env_secs(
                "KERNEL_MESSAGE_TIMEOUT_SECS",
                DEFAULT_MESSAGE_TIMEOUT_SECS,
            ),
            sweep_interval: env_secs("KERNEL_QUEUE_SWEEP_INTERVAL_SECS", QUEUE_SWEEP_INTERVAL_SECS),
        };

        let files = FileConfig {
            lock_timeout: env_secs(
                "KERNEL_FILE_LOCK_TIMEOUT_SECS",
                DEFAULT_FILE_LOCK_TIMEOUT_SECS,
            ),
            max_locks_per_agent: env_parse(
                "KERNEL_MAX_FILE_LOCKS_PER_AGENT",
                DEFAULT_MAX_FILE_LOCKS_PER_AGENT,
            ),
            backup_retention_days: env_parse(
                "KERNEL_FILE_BACKUP_RETENTION_DAYS",
                DEFAULT_FILE_BACKUP_RETENTION_DAYS,
            ),
        };

        let tasks = TaskConfig {
            default_task_timeout: env_secs(
                "KERNEL_DEFAULT_TASK_TIMEOUT_SECS",
                DEFAULT_TASK_TIMEOUT_SECS,
            ),
            max_task_retries: env_parse("KERNEL_MAX_TASK_RETRIES", DEFAULT_MAX_TASK_RETRIES),
            priority_levels: env_parse("KERNEL_TASK_PRIORITY_LEVELS", TASK_PRIORITY_LEVELS),
        };

        let assignment = AssignmentConfig {
            weight_specialization: env_parse("KERNEL_WEIGHT_SPEC", WEIGHT_SPECIALIZATION),
            weight_load: env_parse("KERNEL_WEIGHT_LOAD", WEIGHT_LOAD),
            weight_capability: env_parse("KERNEL_WEIGHT_CAP", WEIGHT_CAPABILITY),
            weight_priority: env_parse("KERNEL_WEIGHT_PRIO", WEIGHT_PRIORITY),
            weight_time: env_parse("KERNEL_WEIGHT_TIME", WEIGHT_TIME),
            weight_performance: env_parse("KERNEL_WEIGHT_PERF", WEIGHT_PERFORMANCE),
        };

        let health = HealthConfig {
            interval: env_secs("KERNEL_HEALTH_INTERVAL_SECS", 15),
            timeout: env_secs("KERNEL_HEALTH_TIMEOUT_SECS", 5),
            retry_attempts: env_parse("KERNEL_HEALTH_RETRY_ATTEMPTS", 3u32),
            retry_delay: env_secs("KERNEL_HEALTH_RETRY_DELAY_SECS", 2),
            failure_threshold: env_parse(
                "KERNEL_HEALTH_FAILURE_THRESHOLD",
                DEFAULT_HEALTH_FAILURE_THRESHOLD,
            ),
            recovery_threshold: env_parse(
                "KERNEL_HEALTH_RECOVERY_THRESHOLD",
                DEFAULT_HEALTH_RECOVERY_THRESHOLD,
            ),
        };

        let coordination = CoordinationConfig {
            max_concurrent_sessions: env_parse(
                "KERNEL_MAX_COLLABORATION_SESSIONS",
                DEFAULT_MAX_COLLABORATION_SESSIONS,
            ),
            max_workflow_steps: env_parse(
                "KERNEL_MAX_WORKFLOW_STEPS",
                DEFAULT_MAX_WORKFLOW_STEPS,
            ),
            max_error_history: env_parse(
                "KERNEL_MAX_ERROR_HISTORY",
                DEFAULT_MAX_ERROR_HISTORY,
            ),
            cache_ttl: env_secs("KERNEL_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS),
            cleanup_interval: env_secs(
                "KERNEL_CLEANUP_INTERVAL_SECS",
                DEFAULT_CLEANUP_INTERVAL_SECS,
            ),
            metrics_collection_interval: env_secs(
                "KERNEL_METRICS_COLLECTION_INTERVAL_SECS",
                DEFAULT_METRICS_COLLECTION_INTERVAL_SECS,
            ),
        };

        let sync = SyncConfig {
            heartbeat_check_interval: env_secs(
                "KERNEL_SYNC_HEARTBEAT_CHECK_INTERVAL_SECS",
                DEFAULT_SYNC_HEARTBEAT_CHECK_INTERVAL_SECS,
            ),
            max_missed_heartbeats: env_parse(
                "KERNEL_SYNC_MAX_MISSED_HEARTBEATS",
                DEFAULT_SYNC_MAX_MISSED_HEARTBEATS,
            ),
        };

        let api_key = env::var("KERNEL_API_KEY").ok();
        if api_key.is_none() {
            tracing::warn!("KERNEL_API_KEY not set; control API will run without authentication");
        }

        let allowed_origins = env::var("KERNEL_ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let api = ApiConfig {
            host: env::var("KERNEL_API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("KERNEL_API_PORT", 4180u16),
            enable_auth: api_key.is_some(),
            api_key,
            allowed_origins,
        };

        let config = Config {
            fleet,
            bus,
            files,
            tasks,
            assignment,
            health,
            coordination,
            sync,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let weights_sum = self.assignment.weight_specialization
            + self.assignment.weight_load
            + self.assignment.weight_capability
            + self.assignment.weight_priority
            + self.assignment.weight_time
            + self.assignment.weight_performance;
        if (weights_sum - 1.0).abs() > 0.01 {
            return Err(KernelError::Configuration(format!(
                "assignment scoring weights must sum to ~1.0, got {weights_sum}"
            )));
        }
        if self.fleet.max_agents == 0 {
            return Err(KernelError::Configuration(
                "max_agents must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fleet: FleetConfig {
                max_agents: DEFAULT_MAX_AGENTS,
                max_concurrent_tasks_per_agent: DEFAULT_MAX_CONCURRENT_TASKS_PER_AGENT,
                agent_heartbeat_interval: Duration::from_secs(
                    DEFAULT_AGENT_HEARTBEAT_INTERVAL_SECS,
                ),
                agent_timeout: Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS),
            },
            bus: BusConfig {
                queue_size: DEFAULT_MESSAGE_QUEUE_SIZE,
                retry_attempts: DEFAULT_MESSAGE_RETRY_ATTEMPTS,
                message_timeout: Duration::from_secs(DEFAULT_MESSAGE_TIMEOUT_SECS),
                sweep_interval: Duration::from_secs(QUEUE_SWEEP_INTERVAL_SECS),
            },
            files: FileConfig {
                lock_timeout: Duration::from_secs(DEFAULT_FILE_LOCK_TIMEOUT_SECS),
                max_locks_per_agent: DEFAULT_MAX_FILE_LOCKS_PER_AGENT,
                backup_retention_days: DEFAULT_FILE_BACKUP_RETENTION_DAYS,
            },
            tasks: TaskConfig {
                default_task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
                max_task_retries: DEFAULT_MAX_TASK_RETRIES,
                priority_levels: TASK_PRIORITY_LEVELS,
            },
            assignment: AssignmentConfig {
                weight_specialization: WEIGHT_SPECIALIZATION,
                weight_load: WEIGHT_LOAD,
                weight_capability: WEIGHT_CAPABILITY,
                weight_priority: WEIGHT_PRIORITY,
                weight_time: WEIGHT_TIME,
                weight_performance: WEIGHT_PERFORMANCE,
            },
            health: HealthConfig {
                interval: Duration::from_secs(15),
                timeout: Duration::from_secs(5),
                retry_attempts: 3,
                retry_delay: Duration::from_secs(2),
                failure_threshold: DEFAULT_HEALTH_FAILURE_THRESHOLD,
                recovery_threshold: DEFAULT_HEALTH_RECOVERY_THRESHOLD,
            },
            coordination: CoordinationConfig {
                max_concurrent_sessions: DEFAULT_MAX_COLLABORATION_SESSIONS,
                max_workflow_steps: DEFAULT_MAX_WORKFLOW_STEPS,
                max_error_history: DEFAULT_MAX_ERROR_HISTORY,
                cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
                cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
                metrics_collection_interval: Duration::from_secs(
                    DEFAULT_METRICS_COLLECTION_INTERVAL_SECS,
                ),
            },
            sync: SyncConfig {
                heartbeat_check_interval: Duration::from_secs(
                    DEFAULT_SYNC_HEARTBEAT_CHECK_INTERVAL_SECS,
                ),
                max_missed_heartbeats: DEFAULT_SYNC_MAX_MISSED_HEARTBEATS,
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 4180,
                api_key: None,
                enable_auth: false,
                allowed_origins: vec!["http://localhost:3000".to_string()],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unbalanced_weights() {
        let mut config = Config::default();
        config.assignment.weight_specialization = 0.9;
        assert!(config.validate().is_err());
    }

    // Mutates process-wide env vars, so this can't run concurrently with
    // any other test that also calls `Config::load`.
    #[test]
    #[serial]
    fn load_picks_up_overridden_env_var() {
        env::set_var("KERNEL_MAX_AGENTS", "7");
        let config = Config::load().unwrap();
        assert_eq!(config.fleet.max_agents, 7);
        env::remove_var("KERNEL_MAX_AGENTS");
    }

    #[test]
    #[serial]
    fn load_falls_back_to_default_when_unset() {
        env::remove_var("KERNEL_MAX_AGENTS");
        let config = Config::load().unwrap();
        assert_eq!(config.fleet.max_agents, DEFAULT_MAX_AGENTS);
    }
}
