use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::team::TeamSummary;
use super::user::UserSummary;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    InReview,
    Done,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

/// Bug metadata. Reason, reporter and time only ever exist together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BugReport {
    pub reason: String,
    pub reported_by: String,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub team: String,
    #[serde(default)]
    pub bug: Option<BugReport>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_bugged(&self) -> bool {
        self.bug.is_some()
    }

    pub fn is_assigned_to(&self, user_id: &str) -> bool {
        self.assigned_to.as_deref() == Some(user_id)
    }
}

/// Payload of `POST /tasks`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: Option<String>,
    pub content: Option<String>,
    pub images: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_to: Option<String>,
    pub team: Option<String>,
}

/// Partial update of a task. `None` leaves the field untouched; for
/// `assigned_to`, `Some(None)` clears the assignee.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub images: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "present")]
    pub assigned_to: Option<Option<String>>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Payload of `PUT /tasks/{id}/bug`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BugFlagRequest {
    pub is_bugged: bool,
    pub bug_reason: Option<String>,
}

/// Task with every reference expanded. Bug fields are omitted unless bugged.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub assigned_to: Option<UserSummary>,
    pub created_by: Option<UserSummary>,
    pub team: Option<TeamSummary>,
    pub is_bugged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bug_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bug_reported_by: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bug_reported_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
