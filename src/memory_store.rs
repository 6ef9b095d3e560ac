use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{Task, Team, User};
use crate::store::{Store, TaskFilter, TaskUpdate};

/// In-process `Store`, used by tests and `STORE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    teams: RwLock<HashMap<String, Team>>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first<T>(mut items: Vec<T>, created_at: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    items.sort_by(|a, b| created_at(b).cmp(&created_at(a)));
    items
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(StoreError::Duplicate("email".to_string()));
        }
        users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_users(&self, ids: &[String]) -> Result<Vec<User>, StoreError> {
        let users = self.users.read().await;
        Ok(ids.iter().filter_map(|id| users.get(id).cloned()).collect())
    }

    async fn insert_team(&self, team: &Team) -> Result<(), StoreError> {
        self.teams.write().await.insert(team.id.clone(), team.clone());
        Ok(())
    }

    async fn find_team(&self, id: &str) -> Result<Option<Team>, StoreError> {
        Ok(self.teams.read().await.get(id).cloned())
    }

    async fn add_member(
        &self,
        team_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError> {
        let mut teams = self.teams.write().await;
        let Some(team) = teams.get_mut(team_id) else {
            return Ok(None);
        };
        if !team.has_member(user_id) {
            team.members.push(user_id.to_string());
        }
        team.updated_at = at;
        Ok(Some(team.clone()))
    }

    async fn remove_member(
        &self,
        team_id: &str,
        member_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError> {
        let mut teams = self.teams.write().await;
        match teams.get_mut(team_id) {
            Some(team) if !team.is_manager(member_id) => {
                team.members.retain(|m| m != member_id);
                team.updated_at = at;
                Ok(Some(team.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn teams_managed_by(&self, user_id: &str) -> Result<Vec<Team>, StoreError> {
        let teams = self.teams.read().await;
        let managed: Vec<Team> = teams.values().filter(|t| t.is_manager(user_id)).cloned().collect();
        Ok(newest_first(managed, |t| t.created_at))
    }

    async fn teams_with_member(&self, user_id: &str) -> Result<Vec<Team>, StoreError> {
        let teams = self.teams.read().await;
        let joined: Vec<Team> = teams.values().filter(|t| t.has_member(user_id)).cloned().collect();
        Ok(newest_first(joined, |t| t.created_at))
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn find_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Option<Task>, StoreError> {
        let mut tasks = self.tasks.write().await;
        Ok(tasks.get_mut(id).map(|task| {
            update.apply_to(task);
            task.clone()
        }))
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.tasks.write().await.remove(id).is_some())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let matching: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        Ok(newest_first(matching, |t| t.created_at))
    }
}
