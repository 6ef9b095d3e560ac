//! Authorization and mutation rules for teams and tasks.
//!
//! Everything here is synchronous and storage-free: services load the
//! documents, ask these functions whether the caller may act, and persist
//! whatever state they return.

use chrono::{DateTime, Utc};
use log::debug;

use crate::error::ApiError;
use crate::models::{BugReport, Identity, Role, Task, TaskPatch, Team, User};
use crate::store::{TaskFilter, TaskUpdate};

/// Role guard: passes only when the caller holds one of `allowed`.
pub fn require_role(actor: &Identity, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        debug!("User {} with role {} denied, requires {:?}", actor.id, actor.role, allowed);
        Err(ApiError::forbidden("Access denied"))
    }
}

pub fn ensure_team_visible(team: &Team, actor: &Identity) -> Result<(), ApiError> {
    if team.is_manager(&actor.id) || team.has_member(&actor.id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

pub fn ensure_team_manager(team: &Team, actor: &Identity, action: &str) -> Result<(), ApiError> {
    if team.is_manager(&actor.id) {
        Ok(())
    } else {
        debug!("User {} is not the manager of team {}", actor.id, team.id);
        Err(ApiError::forbidden(format!("Only the team manager can {}", action)))
    }
}

pub fn ensure_admissible(team: &Team, user: &User) -> Result<(), ApiError> {
    if team.has_member(&user.id) {
        Err(ApiError::invalid("User is already a team member"))
    } else {
        Ok(())
    }
}

pub fn ensure_dismissible(team: &Team, member_id: &str) -> Result<(), ApiError> {
    if team.is_manager(member_id) {
        return Err(ApiError::invalid("Cannot remove the manager from the team"));
    }
    if !team.has_member(member_id) {
        return Err(ApiError::not_found("Member not found in team"));
    }
    Ok(())
}

pub fn ensure_assignable(team: &Team, user_id: &str) -> Result<(), ApiError> {
    if team.has_member(user_id) {
        Ok(())
    } else {
        Err(ApiError::invalid("Assigned user is not a member of this team"))
    }
}

/// Which tasks of `team` the caller may list. Members only ever see their own
/// assignments; managers must run the team.
pub fn task_scope(team: &Team, actor: &Identity) -> Result<TaskFilter, ApiError> {
    let filter = TaskFilter::team(team.id.clone());
    match actor.role {
        Role::Member => Ok(filter.assigned_to(actor.id.clone())),
        Role::Manager => {
            ensure_team_manager(team, actor, "view its tasks")?;
            Ok(filter)
        }
    }
}

/// A single task is visible to whoever could see it in a listing, plus its
/// creator.
pub fn ensure_task_visible(task: &Task, team: Option<&Team>, actor: &Identity) -> Result<(), ApiError> {
    let runs_team = team.map_or(false, |t| t.is_manager(&actor.id));
    if runs_team || actor.is(&task.created_by) || task.is_assigned_to(&actor.id) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Access denied"))
    }
}

pub fn ensure_task_creator(task: &Task, actor: &Identity) -> Result<(), ApiError> {
    if actor.is(&task.created_by) {
        Ok(())
    } else {
        Err(ApiError::forbidden("Only the task creator can delete this task"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskField {
    Title,
    Content,
    Images,
    Status,
    Priority,
    AssignedTo,
}

impl TaskField {
    pub const ALL: [TaskField; 6] = [
        TaskField::Title,
        TaskField::Content,
        TaskField::Images,
        TaskField::Status,
        TaskField::Priority,
        TaskField::AssignedTo,
    ];
}

impl TaskPatch {
    /// Fields this patch would change, in declaration order.
    pub fn touched_fields(&self) -> Vec<TaskField> {
        let mut fields = Vec::new();
        if self.title.is_some() {
            fields.push(TaskField::Title);
        }
        if self.content.is_some() {
            fields.push(TaskField::Content);
        }
        if self.images.is_some() {
            fields.push(TaskField::Images);
        }
        if self.status.is_some() {
            fields.push(TaskField::Status);
        }
        if self.priority.is_some() {
            fields.push(TaskField::Priority);
        }
        if self.assigned_to.is_some() {
            fields.push(TaskField::AssignedTo);
        }
        fields
    }

    /// The assignee this patch sets, if any. An empty id counts as unassigning.
    pub fn new_assignee(&self) -> Option<&str> {
        match &self.assigned_to {
            Some(Some(id)) if !id.trim().is_empty() => Some(id.as_str()),
            _ => None,
        }
    }
}

/// What a caller may change on a particular task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCapability {
    /// The team's manager, or the manager who created the task, edits every field.
    Manage,
    /// The assigned member moves the task through statuses.
    UpdateStatus,
    Denied,
}

impl TaskCapability {
    /// `team` is the task's team, if it still exists.
    pub fn resolve(task: &Task, team: Option<&Team>, actor: &Identity) -> Self {
        let runs_team = team.map_or(false, |t| t.is_manager(&actor.id));
        match actor.role {
            Role::Manager if runs_team || actor.is(&task.created_by) => TaskCapability::Manage,
            Role::Manager => TaskCapability::Denied,
            Role::Member if task.is_assigned_to(&actor.id) => TaskCapability::UpdateStatus,
            Role::Member => TaskCapability::Denied,
        }
    }

    pub fn permitted_fields(self) -> &'static [TaskField] {
        match self {
            TaskCapability::Manage => &TaskField::ALL,
            TaskCapability::UpdateStatus => &[TaskField::Status],
            TaskCapability::Denied => &[],
        }
    }

    pub fn permits(self, field: TaskField) -> bool {
        self.permitted_fields().contains(&field)
    }

    /// Checks `patch` against this capability and turns it into the update
    /// to store. Nothing is written when this fails.
    pub fn authorize(self, patch: TaskPatch, now: DateTime<Utc>) -> Result<TaskUpdate, ApiError> {
        if self == TaskCapability::Denied {
            return Err(ApiError::forbidden("Not authorized to update this task"));
        }
        if let Some(field) = patch.touched_fields().into_iter().find(|f| !self.permits(*f)) {
            debug!("Task patch rejected on field {:?}", field);
            return Err(ApiError::forbidden("Members can only update the status of a task"));
        }

        let title = match patch.title {
            Some(title) => {
                let trimmed = title.trim();
                if trimmed.is_empty() {
                    return Err(ApiError::invalid("Task title is required"));
                }
                Some(trimmed.to_string())
            }
            None => None,
        };

        Ok(TaskUpdate {
            title,
            content: patch.content,
            images: patch.images,
            status: patch.status,
            priority: patch.priority,
            assigned_to: patch
                .assigned_to
                .map(|assignee| assignee.filter(|id| !id.trim().is_empty())),
            ..TaskUpdate::new(now)
        })
    }
}

/// Requested change to a task's bug flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BugFlag {
    Raise { reason: Option<String> },
    Clear,
}

impl BugFlag {
    pub fn from_request(is_bugged: bool, reason: Option<String>) -> Self {
        if is_bugged {
            BugFlag::Raise { reason }
        } else {
            BugFlag::Clear
        }
    }
}

/// Sets or clears the bug unit. Reason, reporter and time move together.
pub fn bug_update(flag: BugFlag, actor: &Identity, now: DateTime<Utc>) -> TaskUpdate {
    let bug = match flag {
        BugFlag::Raise { reason } => Some(BugReport {
            reason: reason.unwrap_or_default(),
            reported_by: actor.id.clone(),
            reported_at: now,
        }),
        BugFlag::Clear => None,
    };
    TaskUpdate {
        bug: Some(bug),
        ..TaskUpdate::new(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskPriority, TaskStatus, UserSummary};

    fn actor(id: &str, role: Role) -> Identity {
        Identity::new(UserSummary {
            id: id.into(),
            name: id.into(),
            email: format!("{}@example.com", id),
            role,
        })
    }

    fn user(id: &str, role: Role) -> User {
        User {
            id: id.into(),
            name: id.into(),
            email: format!("{}@example.com", id),
            password: String::new(),
            role,
            created_at: Utc::now(),
        }
    }

    fn team(manager: &str, members: &[&str]) -> Team {
        let mut team = Team::new("team-1".into(), "Core".into(), manager.into(), Utc::now());
        team.members.extend(members.iter().map(|m| m.to_string()));
        team
    }

    fn task(created_by: &str, assignee: Option<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: "task-1".into(),
            title: "Write docs".into(),
            content: String::new(),
            images: Vec::new(),
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assigned_to: assignee.map(str::to_string),
            created_by: created_by.into(),
            team: "team-1".into(),
            bug: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn apply(capability: TaskCapability, task: &mut Task, patch: TaskPatch) -> Result<(), ApiError> {
        capability.authorize(patch, Utc::now())?.apply_to(task);
        Ok(())
    }

    #[test]
    fn role_guard_checks_membership_in_allowed_set() {
        assert!(require_role(&actor("m", Role::Manager), &[Role::Manager]).is_ok());
        assert!(require_role(&actor("u", Role::Member), &[Role::Manager, Role::Member]).is_ok());
        assert!(matches!(
            require_role(&actor("u", Role::Member), &[Role::Manager]),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn team_is_visible_to_manager_and_members_only() {
        let team = team("boss", &["alice"]);
        assert!(ensure_team_visible(&team, &actor("boss", Role::Manager)).is_ok());
        assert!(ensure_team_visible(&team, &actor("alice", Role::Member)).is_ok());
        assert!(ensure_team_visible(&team, &actor("mallory", Role::Member)).is_err());
        assert!(ensure_team_visible(&team, &actor("other-boss", Role::Manager)).is_err());
    }

    #[test]
    fn membership_checks_protect_the_manager() {
        let team = team("boss", &["a"]);

        assert!(ensure_admissible(&team, &user("b", Role::Member)).is_ok());
        assert!(matches!(
            ensure_admissible(&team, &user("a", Role::Member)),
            Err(ApiError::InvalidArgument(_))
        ));
        assert!(ensure_dismissible(&team, "a").is_ok());
        assert!(matches!(ensure_dismissible(&team, "b"), Err(ApiError::NotFound(_))));
        assert!(matches!(ensure_dismissible(&team, "boss"), Err(ApiError::InvalidArgument(_))));
    }

    #[test]
    fn member_scope_is_limited_to_own_assignments() {
        let team = team("boss", &["alice"]);

        let scope = task_scope(&team, &actor("alice", Role::Member)).unwrap();
        assert_eq!(scope.assigned_to.as_deref(), Some("alice"));

        let scope = task_scope(&team, &actor("boss", Role::Manager)).unwrap();
        assert_eq!(scope.assigned_to, None);

        assert!(matches!(
            task_scope(&team, &actor("other-boss", Role::Manager)),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn single_task_visibility_follows_listing_rules() {
        let team = team("boss", &["alice", "bob"]);
        let task = task("boss", Some("alice"));

        assert!(ensure_task_visible(&task, Some(&team), &actor("boss", Role::Manager)).is_ok());
        assert!(ensure_task_visible(&task, Some(&team), &actor("alice", Role::Member)).is_ok());
        assert!(ensure_task_visible(&task, Some(&team), &actor("bob", Role::Member)).is_err());
        assert!(ensure_task_visible(&task, Some(&team), &actor("stranger", Role::Manager)).is_err());
        assert!(ensure_task_visible(&task, None, &actor("boss", Role::Manager)).is_ok());
    }

    #[test]
    fn only_the_creator_may_delete() {
        let task = task("creator", None);
        assert!(ensure_task_creator(&task, &actor("creator", Role::Manager)).is_ok());
        assert!(matches!(
            ensure_task_creator(&task, &actor("team-boss", Role::Manager)),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn capability_is_resolved_from_role_team_and_assignment() {
        let team = team("boss", &["alice", "bob"]);
        let task = task("boss", Some("alice"));
        let resolve = |id: &str, role| TaskCapability::resolve(&task, Some(&team), &actor(id, role));

        assert_eq!(resolve("boss", Role::Manager), TaskCapability::Manage);
        assert_eq!(resolve("alice", Role::Member), TaskCapability::UpdateStatus);
        assert_eq!(resolve("bob", Role::Member), TaskCapability::Denied);
        assert_eq!(resolve("other-boss", Role::Manager), TaskCapability::Denied);

        assert_eq!(TaskCapability::Manage.permitted_fields().len(), TaskField::ALL.len());
        assert_eq!(TaskCapability::UpdateStatus.permitted_fields(), &[TaskField::Status]);
        assert!(TaskCapability::Denied.permitted_fields().is_empty());
    }

    #[test]
    fn creating_manager_keeps_control_after_team_handover() {
        let team = team("new-boss", &["alice"]);
        let task = task("boss", Some("alice"));

        assert_eq!(
            TaskCapability::resolve(&task, Some(&team), &actor("boss", Role::Manager)),
            TaskCapability::Manage
        );
        assert_eq!(
            TaskCapability::resolve(&task, Some(&team), &actor("new-boss", Role::Manager)),
            TaskCapability::Manage
        );
        assert_eq!(
            TaskCapability::resolve(&task, None, &actor("new-boss", Role::Manager)),
            TaskCapability::Denied
        );
    }

    #[test]
    fn manager_patch_only_touches_present_fields() {
        let mut task = task("boss", Some("alice"));
        task.content = "<p>keep</p>".into();
        let patch = TaskPatch {
            title: Some("  Renamed  ".into()),
            priority: Some(TaskPriority::High),
            ..TaskPatch::default()
        };

        apply(TaskCapability::Manage, &mut task, patch).unwrap();

        assert_eq!(task.title, "Renamed");
        assert_eq!(task.priority, TaskPriority::High);
        assert_eq!(task.content, "<p>keep</p>");
        assert_eq!(task.assigned_to.as_deref(), Some("alice"));
    }

    #[test]
    fn manager_can_unassign_with_null() {
        let mut task = task("boss", Some("alice"));
        let patch = TaskPatch {
            assigned_to: Some(None),
            ..TaskPatch::default()
        };
        apply(TaskCapability::Manage, &mut task, patch).unwrap();
        assert_eq!(task.assigned_to, None);
    }

    #[test]
    fn blank_title_is_rejected_without_partial_application() {
        let mut task = task("boss", None);
        let patch = TaskPatch {
            title: Some("   ".into()),
            status: Some(TaskStatus::Done),
            ..TaskPatch::default()
        };
        assert!(matches!(
            apply(TaskCapability::Manage, &mut task, patch),
            Err(ApiError::InvalidArgument(_))
        ));
        assert_eq!(task.status, TaskStatus::Todo);
        assert_eq!(task.title, "Write docs");
    }

    #[test]
    fn assignee_may_only_change_status() {
        let mut task = task("boss", Some("alice"));

        let status_only = TaskPatch {
            status: Some(TaskStatus::Done),
            ..TaskPatch::default()
        };
        apply(TaskCapability::UpdateStatus, &mut task, status_only).unwrap();
        assert_eq!(task.status, TaskStatus::Done);

        let sneaky = TaskPatch {
            title: Some("Hijacked".into()),
            status: Some(TaskStatus::Todo),
            ..TaskPatch::default()
        };
        assert!(matches!(
            apply(TaskCapability::UpdateStatus, &mut task, sneaky),
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(task.title, "Write docs");
        assert_eq!(task.status, TaskStatus::Done);
    }

    #[test]
    fn denied_capability_rejects_even_empty_patches() {
        let mut task = task("boss", Some("alice"));
        assert!(matches!(
            apply(TaskCapability::Denied, &mut task, TaskPatch::default()),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn status_transitions_are_unconstrained() {
        let mut task = task("boss", Some("alice"));
        for status in [TaskStatus::Done, TaskStatus::Todo, TaskStatus::InReview, TaskStatus::InProgress] {
            let patch = TaskPatch {
                status: Some(status),
                ..TaskPatch::default()
            };
            apply(TaskCapability::UpdateStatus, &mut task, patch).unwrap();
            assert_eq!(task.status, status);
        }
    }

    #[test]
    fn bug_fields_are_set_and_cleared_together() {
        let boss = actor("boss", Role::Manager);
        let now = Utc::now();
        let mut task = task("boss", None);

        bug_update(BugFlag::from_request(true, None), &boss, now).apply_to(&mut task);
        let bug = task.bug.clone().unwrap();
        assert_eq!(bug.reason, "");
        assert_eq!(bug.reported_by, "boss");
        assert_eq!(bug.reported_at, now);

        bug_update(BugFlag::from_request(true, Some("crashes on save".into())), &boss, now)
            .apply_to(&mut task);
        assert_eq!(task.bug.as_ref().unwrap().reason, "crashes on save");

        bug_update(BugFlag::from_request(false, Some("ignored".into())), &boss, now).apply_to(&mut task);
        assert!(!task.is_bugged());

        let clear = bug_update(BugFlag::Clear, &boss, now);
        assert_eq!(clear.bug, Some(None));
        clear.apply_to(&mut task);
        assert!(task.bug.is_none());
    }

    #[test]
    fn new_assignee_ignores_blank_ids() {
        let patch = TaskPatch {
            assigned_to: Some(Some(" ".into())),
            ..TaskPatch::default()
        };
        assert_eq!(patch.new_assignee(), None);
        assert_eq!(patch.touched_fields(), vec![TaskField::AssignedTo]);
    }
}
