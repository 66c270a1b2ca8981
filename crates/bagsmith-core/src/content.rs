//! Boundary to an external deep-content validation service.
//!
//! The service is opaque: a package path and a module selection go in, a job
//! token comes back, and the job is polled until it yields a per-module
//! result. No transport is provided here; callers inject an implementation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReport {
    pub modules: BTreeMap<String, ModuleResult>,
}

impl ContentReport {
    pub fn passed(&self) -> bool {
        self.modules.values().all(|m| m.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Completed(ContentReport),
    Failed(String),
}

#[derive(Debug, Error)]
pub enum ContentValidationError {
    #[error("content validation submit failed: {0}")]
    Submit(String),
    #[error("content validation poll failed: {0}")]
    Poll(String),
    #[error("content validation job failed: {0}")]
    JobFailed(String),
    #[error("content validation did not finish within {}s", .after.as_secs_f64())]
    Timeout { after: Duration },
}

pub trait ContentValidator: Send + Sync {
    fn submit(&self, package: &Path, modules: &[String]) -> Result<JobToken, ContentValidationError>;
    fn poll(&self, token: &JobToken) -> Result<JobStatus, ContentValidationError>;
}

/// Submit `package` and poll every `poll_interval` until the job completes,
/// fails, or `timeout` elapses.
pub fn await_content_validation(
    validator: &dyn ContentValidator,
    package: &Path,
    modules: &[String],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<ContentReport, ContentValidationError> {
    let started = Instant::now();
    let token = validator.submit(package, modules)?;
    info!("submitted {} for content validation as job {}", package.display(), token.0);
    loop {
        match validator.poll(&token)? {
            JobStatus::Completed(report) => {
                info!(
                    "content validation job {} finished: {}",
                    token.0,
                    if report.passed() { "passed" } else { "failed" }
                );
                return Ok(report);
            }
            JobStatus::Failed(reason) => return Err(ContentValidationError::JobFailed(reason)),
            status @ (JobStatus::Queued | JobStatus::Running) => {
                debug!("content validation job {} is {status:?}", token.0);
            }
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            warn!("content validation job {} timed out", token.0);
            return Err(ContentValidationError::Timeout { after: timeout });
        }
        thread::sleep(poll_interval.min(timeout - elapsed));
    }
}
