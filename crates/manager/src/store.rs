use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use taskgrid_execution::{ExecutionTrace, TaskOutcome};
use tracing::{debug, warn};

use crate::error::ManagerError;
use crate::request::{ArchiveRecord, DistributedRequest, ErrorRecord, RequestId};

/// Filesystem-backed request persistence.
///
/// Layout under the root directory:
/// ```text
/// root/
///   request.counter                 ← last minted request id
///   <project>.<id>                  ← zero-length waiting marker
///   <project>/
///     Requests/<id>.request         ← pending request
///     2024-03-09/<id>.archive       ← request + outcome, dated by creation
///     2024-03-09/Error/<id>.request ← crashed request + reason
/// ```
///
/// Every write goes to a temporary sibling first and is renamed into place,
/// so a crash leaves either the previous file or none.
pub struct RequestStore {
    root: PathBuf,
}

impl RequestStore {
    /// Open a store, creating the root directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ManagerError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn counter_path(&self) -> PathBuf {
        self.root.join("request.counter")
    }

    pub fn request_path(&self, project: &str, id: RequestId) -> PathBuf {
        self.root.join(project).join("Requests").join(format!("{}.request", id))
    }

    pub fn marker_path(&self, project: &str, id: RequestId) -> PathBuf {
        self.root.join(format!("{}.{}", project, id))
    }

    pub fn archive_path(&self, request: &DistributedRequest) -> PathBuf {
        self.root
            .join(&request.project_name)
            .join(request.archive_date())
            .join(format!("{}.archive", request.unique_id))
    }

    pub fn error_path(&self, request: &DistributedRequest) -> PathBuf {
        self.root
            .join(&request.project_name)
            .join(request.archive_date())
            .join("Error")
            .join(format!("{}.request", request.unique_id))
    }

    // ── Pending requests ────────────────────────────────────────

    pub fn save_request(&self, request: &DistributedRequest) -> Result<(), ManagerError> {
        validate_project(&request.project_name)?;
        write_json(&self.request_path(&request.project_name, request.unique_id), request)
    }

    pub fn load_request(&self, project: &str, id: RequestId) -> Result<Option<DistributedRequest>, ManagerError> {
        read_json(&self.request_path(project, id))
    }

    pub fn remove_request(&self, project: &str, id: RequestId) -> Result<(), ManagerError> {
        remove_if_exists(&self.request_path(project, id))?;
        Ok(())
    }

    // ── Waiting markers ─────────────────────────────────────────

    pub fn create_marker(&self, project: &str, id: RequestId) -> Result<(), ManagerError> {
        validate_project(project)?;
        write_atomic(&self.marker_path(project, id), &[])?;
        Ok(())
    }

    pub fn remove_marker(&self, project: &str, id: RequestId) -> Result<(), ManagerError> {
        remove_if_exists(&self.marker_path(project, id))?;
        Ok(())
    }

    pub fn has_marker(&self, project: &str, id: RequestId) -> bool {
        self.marker_path(project, id).is_file()
    }

    // ── Terminal records ────────────────────────────────────────

    pub fn write_archive(
        &self,
        request: &DistributedRequest,
        outcome: &TaskOutcome,
        trace: Option<&ExecutionTrace>,
    ) -> Result<PathBuf, ManagerError> {
        let path = self.archive_path(request);
        let record = ArchiveRecord {
            request: request.clone(),
            outcome: outcome.clone(),
            archived_at: Utc::now(),
            trace: trace.cloned(),
        };
        write_json(&path, &record)?;
        Ok(path)
    }

    pub fn load_archive(&self, request: &DistributedRequest) -> Result<Option<ArchiveRecord>, ManagerError> {
        read_json(&self.archive_path(request))
    }

    pub fn write_error(&self, request: &DistributedRequest, reason: &str) -> Result<PathBuf, ManagerError> {
        let path = self.error_path(request);
        let record = ErrorRecord {
            request: request.clone(),
            reason: reason.to_string(),
            recorded_at: Utc::now(),
        };
        write_json(&path, &record)?;
        Ok(path)
    }

    pub fn load_error(&self, request: &DistributedRequest) -> Result<Option<ErrorRecord>, ManagerError> {
        read_json(&self.error_path(request))
    }

    // ── Recovery ────────────────────────────────────────────────

    /// Every pending request found under `<project>/Requests/`, with whether
    /// its waiting marker exists. Unreadable files are skipped with a warning.
    ///
    /// Temporary files left by writes that never reached their rename are
    /// deleted on the way.
    pub fn scan(&self) -> Result<Vec<(DistributedRequest, bool)>, ManagerError> {
        sweep_temp_files(&self.root)?;
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            self.sweep_project(&entry.path())?;
            let project = entry.file_name().to_string_lossy().into_owned();
            let requests_dir = entry.path().join("Requests");
            if !requests_dir.is_dir() {
                continue;
            }
            for file in fs::read_dir(&requests_dir)? {
                let path = file?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("request") {
                    continue;
                }
                match read_json::<DistributedRequest>(&path) {
                    Ok(Some(request)) if request.project_name == project => {
                        let waiting = self.has_marker(&project, request.unique_id);
                        found.push((request, waiting));
                    }
                    Ok(Some(request)) => {
                        warn!(
                            path = %path.display(),
                            project = %request.project_name,
                            "request file stored under the wrong project, skipping"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "could not restore request, skipping"),
                }
            }
        }
        found.sort_by_key(|(r, _)| r.unique_id);
        Ok(found)
    }

    /// Sweep `Requests/`, the dated archive directories and their `Error/`.
    fn sweep_project(&self, project_dir: &Path) -> io::Result<()> {
        for entry in fs::read_dir(project_dir)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            sweep_temp_files(&dir)?;
            let errors = dir.join("Error");
            if errors.is_dir() {
                sweep_temp_files(&errors)?;
            }
        }
        Ok(())
    }
}

/// Project names become directory names.
fn validate_project(project: &str) -> Result<(), ManagerError> {
    let invalid = project.is_empty()
        || project == "."
        || project == ".."
        || project.contains(['/', '\\'])
        || project.contains('\0');
    if invalid {
        return Err(ManagerError::InvalidProjectName(project.to_string()));
    }
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ManagerError> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes())?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ManagerError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Write `bytes` to a temporary sibling, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "persisted");
    Ok(())
}

/// Delete the `*.tmp` files directly inside `dir`.
fn sweep_temp_files(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("tmp") {
            continue;
        }
        if remove_if_exists(&path)? {
            warn!(path = %path.display(), "removed leftover of an interrupted write");
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
