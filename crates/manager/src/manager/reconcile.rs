use chrono::Utc;
use serde::Serialize;
use taskgrid_execution::TaskError;
use tracing::{debug, info, warn};

use super::core::RequestManager;
use crate::error::{ChannelError, ManagerError};
use crate::request::{DistributedRequest, RequestStatus, StatusReply};

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Requests whose destination was asked for a status.
    pub polled: usize,
    /// Requests the destination did not know, put back on the waiting queue.
    pub resent: usize,
    pub archived: usize,
    pub crashed: usize,
    /// Requests whose non-terminal status changed.
    pub updated: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.resent == 0 && self.archived == 0 && self.crashed == 0 && self.updated == 0
    }
}

impl RequestManager {
    /// Poll the destination of every claimed request and apply what it says.
    ///
    /// Requests still on the waiting queue are skipped. A request past its
    /// time budget is recorded as crashed without polling. Unreachable
    /// destinations are logged and retried on the next pass.
    pub fn sync_statuses(&self) -> SyncReport {
        let claimed: Vec<DistributedRequest> = {
            let state = self.state();
            state
                .active
                .values()
                .filter(|r| !state.waiting.contains(&r.unique_id))
                .cloned()
                .collect()
        };

        let now = Utc::now();
        let mut report = SyncReport::default();
        for request in claimed {
            let id = request.unique_id;
            if request.is_expired(now) {
                if self.settle(self.crashed_request(id, "time budget exceeded")).is_some() {
                    report.crashed += 1;
                }
                continue;
            }

            let Some(node) = self.node(&request.destination_name) else {
                debug!(request_id = id, destination = %request.destination_name, "no channel to destination");
                continue;
            };
            report.polled += 1;

            match node.request_status(&request) {
                Err(e) => {
                    warn!(request_id = id, destination = %request.destination_name, error = %e, "status poll failed");
                }
                Ok(StatusReply::UnknownRequest) => {
                    if self.settle(self.requeue(id)).is_some() {
                        report.resent += 1;
                    }
                }
                Ok(StatusReply::Finished) => match node.fetch_result(&request) {
                    Ok(outcome) => {
                        let trace = node.fetch_trace(&request).unwrap_or_else(|e| {
                            warn!(request_id = id, error = %e, "could not fetch trace, archiving without it");
                            None
                        });
                        if self.settle(self.archive_request_with_trace(id, outcome, trace)).is_some() {
                            report.archived += 1;
                        }
                    }
                    Err(e) => warn!(request_id = id, error = %e, "could not fetch result"),
                },
                Ok(StatusReply::Crashed) => {
                    let reason = crash_reason(node.fetch_result(&request));
                    if self.settle(self.crashed_request(id, &reason)).is_some() {
                        report.crashed += 1;
                    }
                }
                Ok(StatusReply::Running) => {
                    if self.settle(self.update_status(id, RequestStatus::Running)).unwrap_or(false) {
                        report.updated += 1;
                    }
                }
                Ok(StatusReply::Waiting) => {
                    if self.settle(self.update_status(id, RequestStatus::Waiting)).unwrap_or(false) {
                        report.updated += 1;
                    }
                }
            }
        }

        if !report.is_empty() {
            info!(
                polled = report.polled,
                resent = report.resent,
                archived = report.archived,
                crashed = report.crashed,
                updated = report.updated,
                "status sync"
            );
        }
        report
    }

    /// Log a failed transition. A request that became inactive in the
    /// meantime was settled concurrently and is not an error.
    fn settle<T>(&self, result: Result<T, ManagerError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(ManagerError::Inactive(id)) => {
                debug!(request_id = id, "request settled concurrently");
                None
            }
            Err(e) => {
                warn!(error = %e, "could not apply status change");
                None
            }
        }
    }
}

fn crash_reason(result: Result<taskgrid_execution::TaskOutcome, ChannelError>) -> String {
    match result {
        Ok(Err(TaskError::Crashed(reason))) => reason,
        Ok(Err(e)) => e.to_string(),
        Ok(Ok(_)) | Err(_) => "crashed on destination".to_string(),
    }
}
