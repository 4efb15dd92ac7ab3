//! 🎯 KERNEL CONSTANTS: system-wide defaults
//! Values mirror the defaults table in the design doc; override via `Config`.

// 🏗️ FLEET CAPS
pub const DEFAULT_MAX_AGENTS: usize = 10;
pub const DEFAULT_MAX_CONCURRENT_TASKS_PER_AGENT: u32 = 3;

/// ⏱️ HEARTBEAT CADENCE: how often an agent refreshes liveness
/// Why: 30s balances bus chatter against detection latency.
pub const DEFAULT_AGENT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Connection is considered dead past this heartbeat age.
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_MAX_TASK_RETRIES: u32 = 3;
pub const TASK_PRIORITY_LEVELS: u32 = 4;

// 📁 FILE MANAGER
pub const DEFAULT_FILE_LOCK_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_FILE_LOCKS_PER_AGENT: usize = 5;
pub const DEFAULT_FILE_BACKUP_RETENTION_DAYS: i64 = 7;
pub const CHANGE_HISTORY_RING_CAP: usize = 100;
pub const SNAPSHOT_RING_CAP: usize = 10;

// 📨 MESSAGE BUS
pub const DEFAULT_MESSAGE_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_MESSAGE_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_MESSAGE_TIMEOUT_SECS: u64 = 30;
/// Offline-queue redelivery sweep cadence (design §4.A: "every 5s").
pub const QUEUE_SWEEP_INTERVAL_SECS: u64 = 5;

// 🤝 COORDINATION MANAGER
pub const DEFAULT_MAX_COLLABORATION_SESSIONS: usize = 5;
pub const DEFAULT_MAX_WORKFLOW_STEPS: usize = 50;

// 🧹 HOUSEKEEPING
pub const DEFAULT_MAX_ERROR_HISTORY: usize = 1000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_METRICS_COLLECTION_INTERVAL_SECS: u64 = 60;

// 🎯 ASSIGNMENT ENGINE SCORING WEIGHTS
pub const WEIGHT_SPECIALIZATION: f64 = 0.30;
pub const WEIGHT_LOAD: f64 = 0.25;
pub const WEIGHT_CAPABILITY: f64 = 0.20;
pub const WEIGHT_PRIORITY: f64 = 0.10;
pub const WEIGHT_TIME: f64 = 0.10;
pub const WEIGHT_PERFORMANCE: f64 = 0.05;

/// Timeout trigger ratio: elapsed/estimated beyond this is reassigned.
pub const REASSIGNMENT_TIMEOUT_RATIO: f64 = 1.5;
/// Liveness trigger ratio: heartbeat silence beyond N×interval is a failure.
pub const REASSIGNMENT_HEARTBEAT_MULTIPLIER: u64 = 3;

// ❤️ HEALTH MONITOR
pub const DEFAULT_HEALTH_FAILURE_THRESHOLD: u32 = 3;
pub const DEFAULT_HEALTH_RECOVERY_THRESHOLD: u32 = 2;
pub const HEALTH_SCORE_MAX: i32 = 100;
pub const HEALTH_SCORE_MIN: i32 = 0;
pub const HEALTH_SCORE_SUCCESS_DELTA: i32 = 2;
pub const HEALTH_SCORE_FAILURE_DELTA: i32 = 10;
/// Below this score a degraded agent is replaced rather than reset.
pub const HEALTH_SCORE_REPLACE_THRESHOLD: i32 = 20;
pub const RECOVERY_RESTART_FAILURE_CEILING: u32 = 5;
pub const RECOVERY_RESET_FAILURE_CEILING: u32 = 10;

// 🔄 REALTIME SYNC
/// Its own heartbeat cadence and tolerance, independent of the bus's
/// connection timeout — a late joiner should be declared disconnected in
/// the mirrored view well before the bus's own (longer) timeout fires.
pub const DEFAULT_SYNC_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SYNC_MAX_MISSED_HEARTBEATS: u32 = 3;

// 🧩 CONFLICT DETECTION WINDOWS (design §4.B priority table)
pub const CONFLICT_LOCK_TIMEOUT_WINDOW_SECS: i64 = 1;
pub const CONFLICT_LOCK_TIMEOUT_MIN_CHANGES: usize = 3;
pub const CONFLICT_MERGE_WINDOW_SECS: i64 = 10;
pub const CONFLICT_MERGE_MIN_GAP_SECS: i64 = 1;
pub const CONFLICT_CONCURRENT_WINDOW_SECS: i64 = 5;
