//! Stable event-type names published on the message bus (design §6).

pub const AGENT_CREATED: &str = "agent:created";
pub const AGENT_DESTROYED: &str = "agent:destroyed";
pub const AGENT_STATUS_CHANGED: &str = "agent:status_changed";
pub const AGENT_ERROR: &str = "agent:error";

pub const TASK_CREATED: &str = "task:created";
pub const TASK_ASSIGNED: &str = "task:assigned";
pub const TASK_STARTED: &str = "task:started";
pub const TASK_COMPLETED: &str = "task:completed";
pub const TASK_FAILED: &str = "task:failed";

pub const FILE_LOCKED: &str = "file:locked";
pub const FILE_UNLOCKED: &str = "file:unlocked";
pub const FILE_MODIFIED: &str = "file:modified";
pub const FILE_CONFLICT: &str = "file:conflict";

pub const COLLABORATION_STARTED: &str = "collaboration:started";
pub const COLLABORATION_ENDED: &str = "collaboration:ended";
pub const COLLABORATION_JOINED: &str = "collaboration:joined";
pub const COLLABORATION_LEFT: &str = "collaboration:left";

pub const SYSTEM_STARTUP: &str = "system:startup";
pub const SYSTEM_SHUTDOWN: &str = "system:shutdown";
pub const SYSTEM_ERROR: &str = "system:error";
pub const SYSTEM_HEALTH_CHECK: &str = "system:health_check";

pub const AGENT_RECOVERY_STARTED: &str = "agent:recovery_started";
pub const AGENT_ALERT_RAISED: &str = "agent:alert_raised";

pub const WORKFLOW_STARTED: &str = "workflow:started";
pub const WORKFLOW_STEP_COMPLETED: &str = "workflow:step_completed";
pub const WORKFLOW_COMPLETED: &str = "workflow:completed";
pub const WORKFLOW_FAILED: &str = "workflow:failed";

/// Emitted by the Coordination Manager's rules engine on every
/// `validate_agent_action` call, for observability of what was allowed
/// or denied and why.
pub const RULE_EVALUATED: &str = "rule:evaluated";
