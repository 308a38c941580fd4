//! Render-farm transfer job contract
//!
//! A published file is handed to the farm as a Python job that syncs it to
//! the remote site. This module only describes that job and interprets the
//! farm's status reports; submission belongs to the caller.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Progress line of a job details report, e.g. `Progress: 40 % (2/5)`
static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Progress:\s*(\d+)\s*%").expect("Invalid regex"));

const JOB_POOL: &str = "pip_pool";
const JOB_GROUP: &str = "pip";
const JOB_PRIORITY: u32 = 50;
const PYTHON_VERSION: &str = "3.7";

/// One file sync to hand to the farm
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Machines allowed to run the job
    pub allowlist: String,
    pub user: String,
    pub machine: String,
}

impl TransferRequest {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>, allowlist: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            allowlist: allowlist.into(),
            user: String::new(),
            machine: String::new(),
        }
    }

    /// Record who submits the job
    pub fn with_submitter(mut self, user: impl Into<String>, machine: impl Into<String>) -> Self {
        self.user = user.into();
        self.machine = machine.into();
        self
    }

    /// Script arguments: `"source,destination"`
    pub fn arguments(&self) -> String {
        format!("{},{}", display(&self.source), display(&self.destination))
    }

    /// Job description file contents
    pub fn job_info(&self) -> String {
        [
            "Plugin=Python".to_string(),
            "Name=Transfer".to_string(),
            "Comment=None".to_string(),
            format!("Allowlist={}", self.allowlist),
            format!("Pool={}", JOB_POOL),
            format!("Group={}", JOB_GROUP),
            format!("Priority={}", JOB_PRIORITY),
            "TaskTimeoutMinutes=0".to_string(),
            "ConcurrentTasks=1".to_string(),
            "Frames=1".to_string(),
            format!("UserName={}", self.user),
            format!("MachineName={}", self.machine),
        ]
        .join("\n")
    }

    /// Plugin description file contents
    pub fn plugin_info(&self) -> String {
        format!(
            "Arguments={}\nSingleFramesOnly=False\nVersion={}",
            self.arguments(),
            PYTHON_VERSION
        )
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// State of a polled transfer job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobState {
    Running,
    Complete,
    Failed,
    Suspended,
}

impl JobState {
    /// Classify a job from its reported progress and status text
    pub fn from_report(progress: Option<u32>, status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "failed" => JobState::Failed,
            "suspended" => JobState::Suspended,
            _ if progress.is_some_and(|p| p >= 100) => JobState::Complete,
            _ => JobState::Running,
        }
    }

    /// Whether polling can stop
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobState::Running)
    }
}

/// Pull `(progress, status)` out of a job details report
///
/// Status defaults to `"unknown"` when the report has no status line.
pub fn parse_job_details(report: &str) -> (Option<u32>, String) {
    let mut progress = None;
    let mut status = "unknown".to_string();

    for line in report.lines() {
        if let Some((_, rest)) = line.split_once("Status:") {
            status = rest.trim().to_lowercase();
        }
        if let Some(caps) = PROGRESS_RE.captures(line) {
            progress = caps[1].parse().ok();
        }
    }

    (progress, status)
}

/// Job id from the submitter's output (`JobID=...`)
pub fn parse_job_id(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("JobID="))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TransferRequest {
        TransferRequest::new("/studio/DEMO/a.exr", "/remote/DEMO/a.exr", "blade01")
            .with_submitter("artist", "ws042")
    }

    #[test]
    fn test_arguments() {
        assert_eq!(request().arguments(), "/studio/DEMO/a.exr,/remote/DEMO/a.exr");
    }

    #[test]
    fn test_job_info() {
        let info = request().job_info();
        let lines: Vec<&str> = info.lines().collect();
        assert_eq!(lines[0], "Plugin=Python");
        assert!(lines.contains(&"Allowlist=blade01"));
        assert!(lines.contains(&"Pool=pip_pool"));
        assert!(lines.contains(&"Priority=50"));
        assert!(lines.contains(&"UserName=artist"));
        assert!(lines.contains(&"MachineName=ws042"));
    }

    #[test]
    fn test_plugin_info() {
        assert_eq!(
            request().plugin_info(),
            "Arguments=/studio/DEMO/a.exr,/remote/DEMO/a.exr\nSingleFramesOnly=False\nVersion=3.7"
        );
    }

    #[test]
    fn test_job_state() {
        assert_eq!(JobState::from_report(Some(40), "Active"), JobState::Running);
        assert_eq!(JobState::from_report(None, "queued"), JobState::Running);
        assert_eq!(JobState::from_report(Some(100), "Completed"), JobState::Complete);
        assert_eq!(JobState::from_report(Some(100), "Failed"), JobState::Failed);
        assert_eq!(JobState::from_report(Some(20), " suspended "), JobState::Suspended);
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Suspended.is_terminal());
    }

    #[test]
    fn test_parse_job_details() {
        let report = "Name: Transfer\nStatus: Active\nProgress: 60 % (3/5)\n";
        assert_eq!(parse_job_details(report), (Some(60), "active".to_string()));
        assert_eq!(parse_job_details("nothing here"), (None, "unknown".to_string()));
    }

    #[test]
    fn test_parse_job_id() {
        let output = "Submitting...\nResult=Success\nJobID=65f1c2aa\n";
        assert_eq!(parse_job_id(output).as_deref(), Some("65f1c2aa"));
        assert_eq!(parse_job_id("Result=Failure"), None);
    }
}
