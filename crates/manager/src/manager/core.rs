use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use taskgrid_execution::{ExecutionTrace, TaskError, TaskOutcome};
use tracing::{debug, info, warn};

use crate::channel::{NodeChannel, RequestRoute};
use crate::error::ManagerError;
use crate::id::RequestIdGenerator;
use crate::request::{DistributedRequest, RequestId, RequestStatus, StatusReply};
use crate::store::RequestStore;

#[derive(Default)]
pub(super) struct ManagerState {
    pub(super) active: BTreeMap<RequestId, DistributedRequest>,
    pub(super) waiting: VecDeque<RequestId>,
}

/// File-backed registry of the requests flowing through a coordination node.
///
/// Active and waiting requests live behind one mutex. The routing table maps
/// request ids to the route that submitted them without keeping it alive.
pub struct RequestManager {
    pub(super) store: RequestStore,
    ids: RequestIdGenerator,
    pub(super) state: Mutex<ManagerState>,
    routing: Mutex<HashMap<RequestId, Weak<dyn RequestRoute>>>,
    nodes: Mutex<HashMap<String, Arc<dyn NodeChannel>>>,
}

impl RequestManager {
    /// Open the manager on `root` and restore every pending request found there.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let store = RequestStore::open(root)?;
        let ids = RequestIdGenerator::open(store.counter_path())?;
        let manager = Self {
            store,
            ids,
            state: Mutex::new(ManagerState::default()),
            routing: Mutex::new(HashMap::new()),
            nodes: Mutex::new(HashMap::new()),
        };
        manager.recover()?;
        Ok(manager)
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    pub(super) fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn routing(&self) -> MutexGuard<'_, HashMap<RequestId, Weak<dyn RequestRoute>>> {
        self.routing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn nodes(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn NodeChannel>>> {
        self.nodes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reload pending requests from disk. Requests whose waiting marker still
    /// exists go back on the waiting queue.
    fn recover(&self) -> Result<(), ManagerError> {
        let found = self.store.scan()?;
        let mut state = self.state();
        let mut requeued = 0;
        for (request, waiting) in found {
            let id = request.unique_id;
            self.ids.observe(id);
            state.active.insert(id, request);
            if waiting && !state.waiting.contains(&id) {
                state.waiting.push_back(id);
                requeued += 1;
            }
        }
        if !state.active.is_empty() {
            info!(
                active = state.active.len(),
                waiting = requeued,
                root = %self.store.root().display(),
                "restored pending requests"
            );
        }
        Ok(())
    }

    // ── Submission ──────────────────────────────────────────────

    /// Mint an id for `request`, mark it waiting, and register it.
    pub fn submit(
        &self,
        mut request: DistributedRequest,
        route: Option<&Arc<dyn RequestRoute>>,
    ) -> Result<RequestId, ManagerError> {
        request.unique_id = self.ids.next()?;
        request.status = RequestStatus::Waiting;
        let id = request.unique_id;
        self.add_request(request, route)?;
        Ok(id)
    }

    /// Register `request` under its existing id: persist it, create its
    /// waiting marker, queue it, and remember `route`.
    ///
    /// Adding an id that is already active replaces the stored request without
    /// queueing it a second time. A claimed request stays claimed and gets no
    /// waiting marker back.
    pub fn add_request(
        &self,
        request: DistributedRequest,
        route: Option<&Arc<dyn RequestRoute>>,
    ) -> Result<(), ManagerError> {
        let id = request.unique_id;
        let project = request.project_name.clone();
        let destination = request.destination_name.clone();

        {
            let mut state = self.state();
            let replaced = state.active.contains_key(&id);
            self.store.save_request(&request)?;
            if !replaced || state.waiting.contains(&id) {
                self.store.create_marker(&project, id)?;
            }
            self.ids.observe(id);
            state.active.insert(id, request);
            if !replaced {
                state.waiting.push_back(id);
            }
        }
        if let Some(route) = route {
            self.routing().insert(id, Arc::downgrade(route));
        }

        info!(request_id = id, project = %project, destination = %destination, "request added");
        Ok(())
    }

    /// Remove and return every waiting request addressed to `destination`,
    /// deleting their waiting markers. Claimed requests stay active.
    pub fn get_waiting_requests(&self, destination: &str) -> Vec<DistributedRequest> {
        let mut state = self.state();
        let ManagerState { active, waiting } = &mut *state;

        let mut claimed = Vec::new();
        waiting.retain(|id| match active.get(id) {
            Some(request) if request.destination_name == destination => {
                claimed.push(request.clone());
                false
            }
            Some(_) => true,
            None => false,
        });

        for request in &claimed {
            if let Err(e) = self.store.remove_marker(&request.project_name, request.unique_id) {
                warn!(request_id = request.unique_id, error = %e, "could not remove waiting marker");
            }
        }
        if !claimed.is_empty() {
            debug!(destination, count = claimed.len(), "requests claimed");
        }
        claimed
    }

    /// Put an active request back on the waiting queue.
    pub fn requeue(&self, id: RequestId) -> Result<(), ManagerError> {
        let request = {
            let mut state = self.state();
            let ManagerState { active, waiting } = &mut *state;
            let request = active.get_mut(&id).ok_or(ManagerError::Inactive(id))?;
            request.status = RequestStatus::Waiting;
            self.store.save_request(request)?;
            self.store.create_marker(&request.project_name, id)?;
            if !waiting.contains(&id) {
                waiting.push_back(id);
            }
            request.clone()
        };
        info!(request_id = id, destination = %request.destination_name, "request re-queued");
        self.forward(&request, RequestStatus::Waiting);
        Ok(())
    }

    /// Record a non-terminal status change. Returns whether anything changed.
    pub fn update_status(&self, id: RequestId, status: RequestStatus) -> Result<bool, ManagerError> {
        let request = {
            let mut state = self.state();
            let request = state.active.get_mut(&id).ok_or(ManagerError::Inactive(id))?;
            if request.status == status {
                return Ok(false);
            }
            request.status = status;
            self.store.save_request(request)?;
            request.clone()
        };
        debug!(request_id = id, ?status, "request status updated");
        self.forward(&request, status);
        Ok(true)
    }

    // ── Terminal transitions ────────────────────────────────────

    /// Archive a finished request with its outcome and forget it.
    pub fn archive_request(&self, id: RequestId, outcome: TaskOutcome) -> Result<PathBuf, ManagerError> {
        self.archive_request_with_trace(id, outcome, None)
    }

    /// [`archive_request`](Self::archive_request), keeping the execution
    /// trace the destination recorded.
    pub fn archive_request_with_trace(
        &self,
        id: RequestId,
        outcome: TaskOutcome,
        trace: Option<ExecutionTrace>,
    ) -> Result<PathBuf, ManagerError> {
        let (request, path) = {
            let mut state = self.state();
            let mut request = state.active.get(&id).cloned().ok_or(ManagerError::Inactive(id))?;
            request.status = RequestStatus::Finished;
            let path = self.store.write_archive(&request, &outcome, trace.as_ref())?;
            self.store.remove_request(&request.project_name, id)?;
            self.store.remove_marker(&request.project_name, id)?;
            state.active.remove(&id);
            state.waiting.retain(|w| *w != id);
            (request, path)
        };
        info!(
            request_id = id,
            project = %request.project_name,
            ok = outcome.is_ok(),
            traced = trace.is_some(),
            "request archived"
        );
        self.forward(&request, RequestStatus::Finished);
        self.routing().remove(&id);
        Ok(path)
    }

    /// Record a crashed request under the project's error directory and
    /// forget it. The routing entry is left in place.
    pub fn crashed_request(&self, id: RequestId, reason: &str) -> Result<PathBuf, ManagerError> {
        let (request, path) = {
            let mut state = self.state();
            let mut request = state.active.get(&id).cloned().ok_or(ManagerError::Inactive(id))?;
            request.status = RequestStatus::Crashed;
            let path = self.store.write_error(&request, reason)?;
            self.store.remove_request(&request.project_name, id)?;
            self.store.remove_marker(&request.project_name, id)?;
            state.active.remove(&id);
            state.waiting.retain(|w| *w != id);
            (request, path)
        };
        warn!(request_id = id, project = %request.project_name, reason, "request crashed");
        self.forward(&request, RequestStatus::Crashed);
        Ok(path)
    }

    fn forward(&self, request: &DistributedRequest, status: RequestStatus) {
        let route = self.routing().get(&request.unique_id).and_then(Weak::upgrade);
        if let Some(route) = route {
            route.status_changed(request, status);
        }
    }

    // ── Queries ─────────────────────────────────────────────────

    /// Status as seen by the submitter, including archived requests.
    pub fn request_status(&self, request: &DistributedRequest) -> StatusReply {
        if let Some(active) = self.state().active.get(&request.unique_id) {
            return active.status.into();
        }
        if self.store.archive_path(request).is_file() {
            StatusReply::Finished
        } else if self.store.error_path(request).is_file() {
            StatusReply::Crashed
        } else {
            StatusReply::UnknownRequest
        }
    }

    /// Archived outcome of a terminal request. A crashed request yields
    /// `TaskError::Crashed` with the recorded reason.
    pub fn fetch_result(&self, request: &DistributedRequest) -> Result<Option<TaskOutcome>, ManagerError> {
        if let Some(record) = self.store.load_archive(request)? {
            return Ok(Some(record.outcome));
        }
        Ok(self
            .store
            .load_error(request)?
            .map(|record| Err(TaskError::Crashed(record.reason))))
    }

    /// Trace archived with a finished request.
    pub fn fetch_trace(&self, request: &DistributedRequest) -> Result<Option<ExecutionTrace>, ManagerError> {
        Ok(self.store.load_archive(request)?.and_then(|record| record.trace))
    }

    pub fn active_request(&self, id: RequestId) -> Option<DistributedRequest> {
        self.state().active.get(&id).cloned()
    }

    pub fn active_ids(&self) -> Vec<RequestId> {
        self.state().active.keys().copied().collect()
    }

    pub fn waiting_ids(&self) -> Vec<RequestId> {
        self.state().waiting.iter().copied().collect()
    }

    pub fn num_active(&self) -> usize {
        self.state().active.len()
    }

    /// Whether a routing entry exists for `id`, live or not.
    pub fn is_routed(&self, id: RequestId) -> bool {
        self.routing().contains_key(&id)
    }

    // ── Destination nodes ───────────────────────────────────────

    /// Register the channel used to poll `name`, replacing any previous one.
    pub fn connect_node(&self, name: impl Into<String>, channel: Arc<dyn NodeChannel>) {
        let name = name.into();
        info!(node = %name, "node connected");
        self.nodes().insert(name, channel);
    }

    pub fn disconnect_node(&self, name: &str) -> bool {
        let removed = self.nodes().remove(name).is_some();
        if removed {
            info!(node = name, "node disconnected");
        }
        removed
    }

    pub fn node(&self, name: &str) -> Option<Arc<dyn NodeChannel>> {
        self.nodes().get(name).cloned()
    }
}
