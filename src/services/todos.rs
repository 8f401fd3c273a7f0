//! Todos service
//!
//! Todo CRUD, atomic toggles, per-todo sharing, batch operations,
//! attachments and recurring completions.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use super::attachments::{sanitize_file_name, AttachmentStore};
use super::{require_user, watch};
use crate::backend::{procedure, Adapter, AdapterExt, Query, Table};
use crate::clock::now_millis;
use crate::error::AppError;
use crate::geo::Coordinates;
use crate::models::{
    normalize_tags, Attachment, CreateTodo, Priority, ShareTodo, Todo, TodoPermission, TodoShare,
    UpdateTodo,
};
use crate::realtime::{topic, Subscription};
use crate::recurrence::{parse_date, RecurrenceRule};

#[derive(Clone)]
pub struct TodoService {
    backend: Arc<dyn Adapter>,
    attachments: AttachmentStore,
}

impl TodoService {
    pub fn new(backend: Arc<dyn Adapter>, attachments: AttachmentStore) -> Self {
        Self {
            backend,
            attachments,
        }
    }

    /// Todos visible to the caller, optionally narrowed to one list, by
    /// position and then newest first.
    pub async fn get_todos(&self, list_id: Option<&str>) -> Result<Vec<Todo>, AppError> {
        fetch_todos(self.backend.as_ref(), list_id)
    }

    pub async fn get_todo_by_id(&self, id: &str) -> Result<Option<Todo>, AppError> {
        Ok(self.backend.select_by_id(Table::Todos, id)?)
    }

    pub async fn create_todo(&self, input: CreateTodo) -> Result<Todo, AppError> {
        require_user(self.backend.as_ref())?;
        check_schedule(input.due_date.as_deref(), input.recurrence_rule.as_deref())?;
        check_location(input.latitude, input.longitude)?;

        let fields = json!({
            "list_id": input.list_id,
            "title": input.title,
            "description": input.description.unwrap_or_default(),
            "completed": input.completed.unwrap_or(false),
            "is_public": false,
            "position": self.backend.positions().next(),
            "priority": input.priority.unwrap_or_default(),
            "due_date": input.due_date,
            "location_name": input.location_name,
            "latitude": input.latitude,
            "longitude": input.longitude,
            "recurrence_rule": input.recurrence_rule,
            "notes": input.notes,
            "tags": normalize_tags(input.tags.unwrap_or_default()),
            "attachments": [],
        });

        let todo: Todo = self.backend.insert_as(Table::Todos, fields)?;
        info!(id = %todo.id, list_id = %todo.list_id, title = %todo.title, "Created todo");
        Ok(todo)
    }

    pub async fn update_todo(&self, id: &str, mut input: UpdateTodo) -> Result<Todo, AppError> {
        check_schedule(
            input.due_date.as_ref().and_then(Option::as_deref),
            input.recurrence_rule.as_ref().and_then(Option::as_deref),
        )?;
        if let (Some(Some(lat)), Some(Some(lon))) = (input.latitude, input.longitude) {
            check_location(Some(lat), Some(lon))?;
        }
        if let Some(tags) = input.tags.take() {
            input.tags = Some(normalize_tags(tags));
        }

        let todo: Todo = self.backend.update_as(Table::Todos, id, input)?;
        info!(id = %todo.id, completed = todo.completed, "Updated todo");
        Ok(todo)
    }

    pub async fn delete_todo(&self, id: &str) -> Result<(), AppError> {
        self.backend.remove(Table::Todos, id)?;
        info!(id, "Deleted todo");
        Ok(())
    }

    /// Flips `completed` in one statement, so concurrent toggles never
    /// overwrite each other.
    pub async fn toggle_todo(&self, id: &str) -> Result<Todo, AppError> {
        let todo = self.toggle_flag(id, "completed")?;
        info!(id, completed = todo.completed, "Toggled todo");
        Ok(todo)
    }

    pub async fn toggle_public(&self, id: &str) -> Result<Todo, AppError> {
        let todo = self.toggle_flag(id, "is_public")?;
        info!(id, is_public = todo.is_public, "Toggled todo visibility");
        Ok(todo)
    }

    fn toggle_flag(&self, id: &str, flag: &str) -> Result<Todo, AppError> {
        let todo: Option<Todo> = self.backend.call(
            procedure::TOGGLE_TODO_FLAG,
            json!({ "p_todo_id": id, "p_flag": flag }),
        )?;
        todo.ok_or_else(|| AppError::not_found("Todo"))
    }

    pub async fn get_shares(&self, todo_id: &str) -> Result<Vec<TodoShare>, AppError> {
        let query = Query::new().filter("todo_id", todo_id).desc("created_at");
        Ok(self.backend.select(Table::TodoShares, &query)?)
    }

    pub async fn share_todo(&self, input: ShareTodo) -> Result<TodoShare, AppError> {
        require_user(self.backend.as_ref())?;
        let email = input.shared_with_email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AppError::validation("Email cannot be empty"));
        }

        let share: TodoShare = self.backend.insert_as(
            Table::TodoShares,
            json!({
                "todo_id": input.todo_id,
                "shared_with_email": email,
                "permission": input.permission,
            }),
        )?;
        info!(id = %share.id, todo_id = %share.todo_id, "Shared todo");
        Ok(share)
    }

    pub async fn remove_share(&self, share_id: &str) -> Result<(), AppError> {
        self.backend.remove(Table::TodoShares, share_id)?;
        info!(id = share_id, "Removed todo share");
        Ok(())
    }

    pub async fn update_share_permission(
        &self,
        share_id: &str,
        permission: TodoPermission,
    ) -> Result<TodoShare, AppError> {
        let share: TodoShare =
            self.backend
                .update_as(Table::TodoShares, share_id, json!({ "permission": permission }))?;
        info!(id = share_id, "Updated todo share permission");
        Ok(share)
    }

    pub fn subscribe_to_todos<F>(&self, list_id: &str, callback: F) -> Subscription
    where
        F: Fn(Vec<Todo>) + Send + Sync + 'static,
    {
        let id = list_id.to_string();
        watch(
            &self.backend,
            topic(Table::Todos, Some(list_id)),
            move |backend| fetch_todos(backend, Some(&id)),
            callback,
        )
    }

    // Batch operations apply one todo at a time and stop at the first
    // failure; todos handled before it keep their changes.

    pub async fn bulk_complete(&self, ids: &[String]) -> Result<usize, AppError> {
        self.each(ids, "complete", |backend, id| {
            backend.update_as::<Todo>(Table::Todos, id, json!({ "completed": true }))?;
            Ok(())
        })
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<usize, AppError> {
        self.each(ids, "delete", |backend, id| Ok(backend.remove(Table::Todos, id)?))
    }

    pub async fn bulk_set_priority(&self, ids: &[String], priority: Priority) -> Result<usize, AppError> {
        self.each(ids, "set_priority", |backend, id| {
            backend.update_as::<Todo>(Table::Todos, id, json!({ "priority": priority }))?;
            Ok(())
        })
    }

    pub async fn bulk_add_tag(&self, ids: &[String], tag: &str) -> Result<usize, AppError> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(AppError::validation("Tag cannot be empty"));
        }
        self.each(ids, "add_tag", |backend, id| {
            let todo: Todo = backend
                .select_by_id(Table::Todos, id)?
                .ok_or_else(|| AppError::not_found("Todo"))?;
            let tags = normalize_tags(todo.tags.iter().map(String::as_str).chain([tag]));
            backend.update_as::<Todo>(Table::Todos, id, json!({ "tags": tags }))?;
            Ok(())
        })
    }

    fn each<F>(&self, ids: &[String], action: &str, apply: F) -> Result<usize, AppError>
    where
        F: Fn(&dyn Adapter, &str) -> Result<(), AppError>,
    {
        for (done, id) in ids.iter().enumerate() {
            if let Err(err) = apply(self.backend.as_ref(), id) {
                info!(action, done, failed = %id, error = %err, "Bulk operation stopped");
                return Err(err);
            }
        }
        info!(action, count = ids.len(), "Bulk operation finished");
        Ok(ids.len())
    }

    /// Stores the bytes and appends an attachment record to the todo.
    pub async fn upload_attachment(
        &self,
        todo_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Attachment, AppError> {
        let todo = self.require_todo(todo_id)?;
        let id = Uuid::new_v4().to_string();
        let storage_key = self.attachments.write(todo_id, &id, data).await?;

        let attachment = Attachment {
            id,
            file_name: sanitize_file_name(file_name),
            content_type: content_type.to_string(),
            size: data.len() as u64,
            storage_key,
            uploaded_at: now_millis(),
        };
        let mut attachments = todo.attachments;
        attachments.push(attachment.clone());

        if let Err(err) =
            self.backend
                .update_as::<Todo>(Table::Todos, todo_id, json!({ "attachments": attachments }))
        {
            self.attachments.delete(&attachment.storage_key).await?;
            return Err(err.into());
        }

        info!(todo_id, id = %attachment.id, size = attachment.size, "Uploaded attachment");
        Ok(attachment)
    }

    pub async fn delete_attachment(&self, todo_id: &str, attachment_id: &str) -> Result<(), AppError> {
        let todo = self.require_todo(todo_id)?;
        let (removed, kept): (Vec<Attachment>, Vec<Attachment>) = todo
            .attachments
            .into_iter()
            .partition(|a| a.id == attachment_id);
        let removed = removed
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("Attachment"))?;

        self.backend
            .update_as::<Todo>(Table::Todos, todo_id, json!({ "attachments": kept }))?;
        self.attachments.delete(&removed.storage_key).await?;

        info!(todo_id, id = attachment_id, "Deleted attachment");
        Ok(())
    }

    pub async fn read_attachment(&self, todo_id: &str, attachment_id: &str) -> Result<(Attachment, Vec<u8>), AppError> {
        let todo = self.require_todo(todo_id)?;
        let attachment = todo
            .attachments
            .into_iter()
            .find(|a| a.id == attachment_id)
            .ok_or_else(|| AppError::not_found("Attachment"))?;
        let data = self.attachments.read(&attachment.storage_key).await?;
        Ok((attachment, data))
    }

    /// Marks the occurrence on `date` done and moves the todo's due date to
    /// the next occurrence.
    pub async fn complete_recurring_instance(&self, todo_id: &str, date: &str) -> Result<Todo, AppError> {
        parse_date(date)?;
        let todo: Option<Todo> = self.backend.call(
            procedure::COMPLETE_RECURRING_INSTANCE,
            json!({ "p_todo_id": todo_id, "p_date": date }),
        )?;
        let todo = todo.ok_or_else(|| AppError::not_found("Todo"))?;
        info!(id = todo_id, date, next_due = ?todo.due_date, "Completed recurring instance");
        Ok(todo)
    }

    fn require_todo(&self, id: &str) -> Result<Todo, AppError> {
        self.backend
            .select_by_id(Table::Todos, id)?
            .ok_or_else(|| AppError::not_found("Todo"))
    }
}

fn fetch_todos(backend: &dyn Adapter, list_id: Option<&str>) -> Result<Vec<Todo>, AppError> {
    let mut query = Query::new();
    if let Some(list_id) = list_id {
        query = query.filter("list_id", list_id);
    }
    let query = query.asc("position").desc("created_at").asc("id");
    let todos: Vec<Todo> = backend.select(Table::Todos, &query)?;
    debug!(list_id, count = todos.len(), "Fetched todos");
    Ok(todos)
}

fn check_schedule(due_date: Option<&str>, rule: Option<&str>) -> Result<(), AppError> {
    if let Some(date) = due_date {
        parse_date(date)?;
    }
    if let Some(rule) = rule {
        rule.parse::<RecurrenceRule>()?;
    }
    Ok(())
}

fn check_location(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), AppError> {
    match (latitude, longitude) {
        (Some(lat), Some(lon)) if !Coordinates::new(lat, lon).is_valid() => {
            Err(AppError::validation("Coordinates are out of range"))
        }
        (Some(_), None) | (None, Some(_)) => {
            Err(AppError::validation("Latitude and longitude must be set together"))
        }
        _ => Ok(()),
    }
}
