use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use log::info;
use mongodb::bson::{self, doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use crate::error::StoreError;
use crate::models::{Task, Team, User};
use crate::store::{Store, TaskFilter, TaskUpdate};

const DUPLICATE_KEY: i32 = 11000;

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let db = client.database(db_name);
        info!("Connected to MongoDB database {}", db_name);
        Ok(MongoDB { client, db })
    }
}

/// `Store` backed by the `users`, `teams` and `tasks` collections.
pub struct MongoStore {
    users: Collection<User>,
    teams: Collection<Team>,
    tasks: Collection<Task>,
}

impl MongoStore {
    pub fn new(mongodb: &MongoDB) -> Self {
        Self {
            users: mongodb.db.collection::<User>("users"),
            teams: mongodb.db.collection::<Team>("teams"),
            tasks: mongodb.db.collection::<Task>("tasks"),
        }
    }

    /// Creates the unique email index and the task listing indexes.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_email = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.users.create_index(unique_email).await?;

        self.teams
            .create_indexes([
                IndexModel::builder().keys(doc! { "manager": 1 }).build(),
                IndexModel::builder().keys(doc! { "members": 1 }).build(),
            ])
            .await?;

        self.tasks
            .create_indexes([
                IndexModel::builder().keys(doc! { "team": 1, "created_at": -1 }).build(),
                IndexModel::builder().keys(doc! { "assigned_to": 1, "created_at": -1 }).build(),
                IndexModel::builder().keys(doc! { "created_by": 1 }).build(),
            ])
            .await?;

        info!("MongoDB indexes ensured");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

/// `$set` body holding only the fields present in `update`.
fn task_set_document(update: &TaskUpdate) -> Result<Document, StoreError> {
    let mut set = doc! { "updated_at": bson::DateTime::from_chrono(update.updated_at) };
    if let Some(title) = &update.title {
        set.insert("title", title.clone());
    }
    if let Some(content) = &update.content {
        set.insert("content", content.clone());
    }
    if let Some(images) = &update.images {
        set.insert("images", images.clone());
    }
    if let Some(status) = &update.status {
        set.insert("status", bson::to_bson(status)?);
    }
    if let Some(priority) = &update.priority {
        set.insert("priority", bson::to_bson(priority)?);
    }
    if let Some(assigned_to) = &update.assigned_to {
        set.insert("assigned_to", bson::to_bson(assigned_to)?);
    }
    if let Some(bug) = &update.bug {
        set.insert("bug", bson::to_bson(bug)?);
    }
    Ok(set)
}

#[async_trait]
impl Store for MongoStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        match self.users.insert_one(user).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::Duplicate("email".to_string())),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "_id": id }).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.find_one(doc! { "email": email }).await?)
    }

    async fn find_users(&self, ids: &[String]) -> Result<Vec<User>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self.users.find(doc! { "_id": { "$in": ids.to_vec() } }).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_team(&self, team: &Team) -> Result<(), StoreError> {
        self.teams.insert_one(team).await?;
        Ok(())
    }

    async fn find_team(&self, id: &str) -> Result<Option<Team>, StoreError> {
        Ok(self.teams.find_one(doc! { "_id": id }).await?)
    }

    async fn add_member(
        &self,
        team_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError> {
        let team = self
            .teams
            .find_one_and_update(
                doc! { "_id": team_id },
                doc! {
                    "$addToSet": { "members": user_id },
                    "$set": { "updated_at": bson::DateTime::from_chrono(at) },
                },
            )
            .return_document(ReturnDocument::After)
            .await?;
        Ok(team)
    }

    async fn remove_member(
        &self,
        team_id: &str,
        member_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Team>, StoreError> {
        let team = self
            .teams
            .find_one_and_update(
                doc! { "_id": team_id, "manager": { "$ne": member_id } },
                doc! {
                    "$pull": { "members": member_id },
                    "$set": { "updated_at": bson::DateTime::from_chrono(at) },
                },
            )
            .return_document(ReturnDocument::After)
            .await?;
        Ok(team)
    }

    async fn teams_managed_by(&self, user_id: &str) -> Result<Vec<Team>, StoreError> {
        let cursor = self
            .teams
            .find(doc! { "manager": user_id })
            .sort(doc! { "created_at": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn teams_with_member(&self, user_id: &str) -> Result<Vec<Team>, StoreError> {
        let cursor = self
            .teams
            .find(doc! { "members": user_id })
            .sort(doc! { "created_at": -1 })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.insert_one(task).await?;
        Ok(())
    }

    async fn find_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.find_one(doc! { "_id": id }).await?)
    }

    async fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Option<Task>, StoreError> {
        let task = self
            .tasks
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": task_set_document(update)? })
            .return_document(ReturnDocument::After)
            .await?;
        Ok(task)
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.tasks.delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count == 1)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let mut query = doc! { "team": &filter.team };
        if let Some(user_id) = &filter.assigned_to {
            query.insert("assigned_to", user_id);
        }
        let cursor = self.tasks.find(query).sort(doc! { "created_at": -1 }).await?;
        Ok(cursor.try_collect().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BugReport, TaskStatus};

    #[test]
    fn set_document_only_names_touched_fields() {
        let now = Utc::now();
        let update = TaskUpdate {
            status: Some(TaskStatus::InReview),
            assigned_to: Some(None),
            ..TaskUpdate::new(now)
        };
        let set = task_set_document(&update).unwrap();

        let mut keys: Vec<&str> = set.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["assigned_to", "status", "updated_at"]);
        assert_eq!(set.get_str("status").unwrap(), "in-review");
        assert!(matches!(set.get("assigned_to"), Some(bson::Bson::Null)));
    }

    #[test]
    fn bug_report_is_written_as_one_subdocument() {
        let now = Utc::now();
        let update = TaskUpdate {
            bug: Some(Some(BugReport {
                reason: "crashes on save".into(),
                reported_by: "boss".into(),
                reported_at: now,
            })),
            ..TaskUpdate::new(now)
        };
        let set = task_set_document(&update).unwrap();
        let bug = set.get_document("bug").unwrap();
        assert_eq!(bug.get_str("reason").unwrap(), "crashes on save");
        assert!(bug.get_datetime("reported_at").is_ok());
    }
}
