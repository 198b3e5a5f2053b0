/// Audit logging for rule-table changes
///
/// Every transition that touches the kernel tables, and each phase of the
/// operator demo, is appended as one JSON object per line to `audit.log` in
/// the state directory. Opt-in through `enable_audit_log`.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Transition,
    DemoApply,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if the operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log in the state directory, creating the directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined or created
    pub fn new() -> std::io::Result<Self> {
        crate::utils::ensure_state_dir()?;
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    /// Audit log at an explicit path
    #[cfg(test)]
    pub fn at(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event to the audit log (JSON-lines)
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    #[cfg(test)]
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    #[cfg(test)]
    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}

async fn write_event(event: AuditEvent) {
    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit.log(event).await {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit log unavailable: {}", e),
    }
}

pub fn transition_event(
    state: &str,
    action: &str,
    success: bool,
    error: Option<String>,
) -> AuditEvent {
    AuditEvent::new(
        EventType::Transition,
        success,
        serde_json::json!({
            "state": state,
            "action": action,
        }),
        error,
    )
}

/// Logs a state transition that was acted upon
pub async fn log_transition(state: &str, action: &str, success: bool, error: Option<String>) {
    write_event(transition_event(state, action, success, error)).await;
}

/// Logs one rule-set application from the demo entry point
pub async fn log_demo_apply(rule_set: &str, failed_commands: usize) {
    let event = AuditEvent::new(
        EventType::DemoApply,
        failed_commands == 0,
        serde_json::json!({
            "rule_set": rule_set,
            "failed_commands": failed_commands,
        }),
        None,
    );
    write_event(event).await;
}
