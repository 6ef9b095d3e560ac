use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::models::{BugReport, Task, TaskPriority, TaskStatus, Team, User};

/// Which tasks a listing returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFilter {
    pub team: String,
    pub assigned_to: Option<String>,
}

impl TaskFilter {
    pub fn team(team: impl Into<String>) -> Self {
        Self {
            team: team.into(),
            assigned_to: None,
        }
    }

    pub fn assigned_to(mut self, user_id: impl Into<String>) -> Self {
        self.assigned_to = Some(user_id.into());
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        task.team == self.team
            && self
                .assigned_to
                .as_deref()
                .map_or(true, |user_id| task.is_assigned_to(user_id))
    }
}

/// Field-level change to one task. `None` fields are left as stored, so
/// concurrent updates of different fields both survive.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub images: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `Some(None)` unassigns.
    pub assigned_to: Option<Option<String>>,
    /// `Some(None)` clears the bug.
    pub bug: Option<Option<BugReport>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskUpdate {
    pub fn new(updated_at: DateTime<Utc>) -> Self {
        Self {
            title: None,
            content: None,
            images: None,
            status: None,
            priority: None,
            assigned_to: None,
            bug: None,
            updated_at,
        }
    }

    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(content) = &self.content {
            task.content = content.clone();
        }
        if let Some(images) = &self.images {
            task.images = images.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(assigned_to) = &self.assigned_to {
            task.assigned_to = assigned_to.clone();
        }
        if let Some(bug) = &self.bug {
            task.bug = bug.clone();
        }
        task.updated_at = self.updated_at;
    }
}

/// Document storage for users, teams and tasks. Writes touch a single
/// document and only the fields they change.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    /// Lookup by email; callers pass the normalized (trimmed, lowercase) form.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_users(&self, ids: &[String]) -> Result<Vec<User>, StoreError>;

    async fn insert_team(&self, team: &Team) -> Result<(), StoreError>;
    async fn find_team(&self, id: &str) -> Result<Option<Team>, StoreError>;
    /// Adds `user_id` to the members set. `None` when the team does not exist.
    async fn add_member(
        &self,
        team_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError>;
    /// Removes `member_id` unless it is the team's manager. `None` when no
    /// team matched.
    async fn remove_member(
        &self,
        team_id: &str,
        member_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError>;
    async fn teams_managed_by(&self, user_id: &str) -> Result<Vec<Team>, StoreError>;
    async fn teams_with_member(&self, user_id: &str) -> Result<Vec<Team>, StoreError>;

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn find_task(&self, id: &str) -> Result<Option<Task>, StoreError>;
    /// Applies `update` and returns the stored task, `None` if it is gone.
    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Option<Task>, StoreError>;
    /// Returns whether a task was removed.
    async fn delete_task(&self, id: &str) -> Result<bool, StoreError>;
    /// Tasks matching `filter`, newest first.
    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;
}
