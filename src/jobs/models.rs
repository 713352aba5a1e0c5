//! Data models for the image job queue.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a queued image job.
///
/// Transitions are monotonic: pending -> processing -> completed | failed.
/// A failed job never goes back to pending; re-running it means cloning it
/// into a fresh pending row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// What kind of image job this is, which decides output naming and
/// post-completion side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProfilePicture,
    Generic,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ProfilePicture => "profile_picture",
            JobKind::Generic => "generic",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "profile_picture" => Some(JobKind::ProfilePicture),
            "generic" => Some(JobKind::Generic),
            _ => None,
        }
    }
}

/// How a resize maps the source image onto the target dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Fill the target exactly, cropping overflow from the center.
    #[default]
    Cover,
    /// Fit entirely within the target, preserving aspect ratio.
    Contain,
}

/// Resize parameters within a transform config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub fit: FitMode,
}

fn default_quality() -> u8 {
    85
}

/// Transform parameters stored as JSON on the job row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<ResizeConfig>,
    /// JPEG quality 1-100.
    #[serde(default = "default_quality")]
    pub quality: u8,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            resize: None,
            quality: default_quality(),
        }
    }
}

/// A persisted image-processing job.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub id: String,
    /// Who enqueued the job.
    pub user_id: String,
    /// Whose image this is when an admin acts on behalf of another user.
    pub target_user_id: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub input_path: String,
    /// Optional caller-chosen output location; re-validated before use.
    pub output_path_override: Option<String>,
    pub transform: TransformConfig,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub output_path: Option<String>,
    pub error_message: Option<String>,
}

impl ImageJob {
    /// Build a fresh pending job.
    pub fn new(
        user_id: impl Into<String>,
        kind: JobKind,
        input_path: impl Into<String>,
        transform: TransformConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            target_user_id: None,
            kind,
            status: JobStatus::Pending,
            input_path: input_path.into(),
            output_path_override: None,
            transform,
            created_at: now(),
            started_at: None,
            completed_at: None,
            output_path: None,
            error_message: None,
        }
    }

    /// The user the output belongs to.
    pub fn owning_user(&self) -> &str {
        self.target_user_id.as_deref().unwrap_or(&self.user_id)
    }

    /// Deterministic output file name, so re-running the same job overwrites
    /// its previous output instead of accumulating files.
    pub fn output_file_name(&self) -> String {
        format!("{}-{}.jpg", self.kind.as_str(), self.owning_user())
    }
}

/// Current timestamp in unix seconds.
pub(crate) fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
