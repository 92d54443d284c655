use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use taskgrid_execution::{ExecutionTrace, TaskOutcome, TaskPayload};

/// Identifier minted by the manager. 0 means "not assigned yet".
pub type RequestId = u64;

/// Lifecycle of a request as tracked by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Unsent,
    Waiting,
    Running,
    Finished,
    Crashed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Crashed)
    }
}

/// Answer to a status poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusReply {
    Waiting,
    Running,
    Finished,
    Crashed,
    UnknownRequest,
}

impl From<RequestStatus> for StatusReply {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Unsent | RequestStatus::Waiting => Self::Waiting,
            RequestStatus::Running => Self::Running,
            RequestStatus::Finished => Self::Finished,
            RequestStatus::Crashed => Self::Crashed,
        }
    }
}

/// Resources a destination must grant to run a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEstimate {
    pub cpus: u32,
    pub memory_mb: u32,
    pub time_hours: u32,
}

impl Default for ResourceEstimate {
    fn default() -> Self {
        Self {
            cpus: 1,
            memory_mb: 1024,
            time_hours: 1,
        }
    }
}

/// A distributable task plus its routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributedRequest {
    pub unique_id: RequestId,
    pub project_name: String,
    pub source_name: String,
    pub destination_name: String,
    pub task: TaskPayload,
    pub status: RequestStatus,
    pub required_cpus: u32,
    /// Megabytes.
    pub required_memory: u32,
    /// Hours. 0 disables the time budget.
    pub required_time: u32,
    pub created_at: DateTime<Utc>,
}

impl DistributedRequest {
    pub fn new(
        project_name: impl Into<String>,
        source_name: impl Into<String>,
        destination_name: impl Into<String>,
        task: TaskPayload,
    ) -> Self {
        let resources = ResourceEstimate::default();
        Self {
            unique_id: 0,
            project_name: project_name.into(),
            source_name: source_name.into(),
            destination_name: destination_name.into(),
            task,
            status: RequestStatus::Unsent,
            required_cpus: resources.cpus,
            required_memory: resources.memory_mb,
            required_time: resources.time_hours,
            created_at: Utc::now(),
        }
    }

    pub fn with_resources(mut self, resources: ResourceEstimate) -> Self {
        self.required_cpus = resources.cpus;
        self.required_memory = resources.memory_mb;
        self.required_time = resources.time_hours;
        self
    }

    pub fn resources(&self) -> ResourceEstimate {
        ResourceEstimate {
            cpus: self.required_cpus,
            memory_mb: self.required_memory,
            time_hours: self.required_time,
        }
    }

    /// Day directory used for the archive and error records.
    pub fn archive_date(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }

    /// True once the request has outlived its time budget.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.required_time > 0 && now - self.created_at > ChronoDuration::hours(i64::from(self.required_time))
    }
}

/// Content of `<project>/<date>/<id>.archive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub request: DistributedRequest,
    pub outcome: TaskOutcome,
    pub archived_at: DateTime<Utc>,
    /// What the destination observed while running the task.
    #[serde(default)]
    pub trace: Option<ExecutionTrace>,
}

/// Content of `<project>/<date>/Error/<id>.request`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub request: DistributedRequest,
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> DistributedRequest {
        DistributedRequest::new(
            "proj",
            "laptop",
            "cluster",
            TaskPayload { kind: "noop".into(), body: json!(null) },
        )
    }

    #[test]
    fn defaults() {
        let r = sample();
        assert_eq!(r.unique_id, 0);
        assert_eq!(r.status, RequestStatus::Unsent);
        assert_eq!(r.resources(), ResourceEstimate::default());
    }

    #[test]
    fn archive_date_uses_creation_day() {
        let mut r = sample();
        r.created_at = Utc.with_ymd_and_hms(2024, 3, 9, 23, 59, 0).unwrap();
        assert_eq!(r.archive_date(), "2024-03-09");
    }

    #[test]
    fn expiry_respects_time_budget() {
        let mut r = sample().with_resources(ResourceEstimate { cpus: 2, memory_mb: 512, time_hours: 2 });
        let now = Utc::now();
        r.created_at = now - ChronoDuration::hours(1);
        assert!(!r.is_expired(now));
        r.created_at = now - ChronoDuration::hours(3);
        assert!(r.is_expired(now));
        r.required_time = 0;
        assert!(!r.is_expired(now));
    }

    #[test]
    fn status_reply_mapping() {
        assert_eq!(StatusReply::from(RequestStatus::Unsent), StatusReply::Waiting);
        assert_eq!(StatusReply::from(RequestStatus::Running), StatusReply::Running);
        assert!(RequestStatus::Crashed.is_terminal());
        assert!(!RequestStatus::Waiting.is_terminal());
    }
}
