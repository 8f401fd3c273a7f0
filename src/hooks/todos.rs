use std::sync::Arc;

use super::{HookState, Store, Toaster};
use crate::error::AppError;
use crate::models::{
    Attachment, CreateTodo, Priority, ShareTodo, Todo, TodoPermission, TodoShare, UpdateTodo,
};
use crate::realtime::Subscription;
use crate::services::TodoService;

/// Todos of one list, or of every visible list when mounted without a
/// list id. Only a list-scoped hook receives realtime pushes.
///
/// Single-todo mutations patch the local snapshot; batch, attachment and
/// recurring operations re-fetch instead.
pub struct TodosHook {
    service: TodoService,
    toaster: Arc<dyn Toaster>,
    list_id: Option<String>,
    store: Store<Vec<Todo>>,
    subscription: Option<Subscription>,
}

impl TodosHook {
    pub async fn mount(service: TodoService, toaster: Arc<dyn Toaster>, list_id: Option<&str>) -> Self {
        let store = Store::new(Vec::new());
        let subscription = list_id.map(|id| {
            let pushes = store.clone();
            service.subscribe_to_todos(id, move |todos| pushes.push(todos))
        });

        let hook = Self {
            service,
            toaster,
            list_id: list_id.map(str::to_string),
            store,
            subscription,
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Vec<Todo>> {
        self.store.snapshot()
    }

    pub fn todos(&self) -> Vec<Todo> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        self.store
            .load(
                Some(self.toaster.as_ref()),
                self.service.get_todos(self.list_id.as_deref()),
            )
            .await
    }

    pub async fn create_todo(&self, input: CreateTodo) -> Result<Todo, AppError> {
        let todo = self.report("creating todo", self.service.create_todo(input).await)?;
        self.store.patch(|todos| {
            if !todos.iter().any(|t| t.id == todo.id) {
                todos.push(todo.clone());
            }
        });
        self.toaster.success("Todo created");
        Ok(todo)
    }

    pub async fn update_todo(&self, id: &str, input: UpdateTodo) -> Result<Todo, AppError> {
        let todo = self.report("updating todo", self.service.update_todo(id, input).await)?;
        self.replace(&todo);
        Ok(todo)
    }

    pub async fn delete_todo(&self, id: &str) -> Result<(), AppError> {
        self.report("deleting todo", self.service.delete_todo(id).await)?;
        self.store.patch(|todos| todos.retain(|t| t.id != id));
        self.toaster.success("Todo deleted");
        Ok(())
    }

    pub async fn toggle_todo(&self, id: &str) -> Result<Todo, AppError> {
        let todo = self.report("updating todo", self.service.toggle_todo(id).await)?;
        self.replace(&todo);
        Ok(todo)
    }

    pub async fn toggle_public(&self, id: &str) -> Result<Todo, AppError> {
        let todo = self.report("updating visibility", self.service.toggle_public(id).await)?;
        self.replace(&todo);
        self.toaster.success(if todo.is_public {
            "Todo is now public"
        } else {
            "Todo is now private"
        });
        Ok(todo)
    }

    pub async fn get_shares(&self, todo_id: &str) -> Result<Vec<TodoShare>, AppError> {
        self.report("loading shares", self.service.get_shares(todo_id).await)
    }

    pub async fn share_todo(&self, input: ShareTodo) -> Result<TodoShare, AppError> {
        let share = self.report("sharing todo", self.service.share_todo(input).await)?;
        self.toaster
            .success(format!("Shared with {}", share.shared_with_email));
        Ok(share)
    }

    pub async fn remove_share(&self, share_id: &str) -> Result<(), AppError> {
        self.report("removing share", self.service.remove_share(share_id).await)?;
        self.toaster.success("Share removed");
        Ok(())
    }

    pub async fn update_share_permission(
        &self,
        share_id: &str,
        permission: TodoPermission,
    ) -> Result<TodoShare, AppError> {
        let share = self.report(
            "updating permission",
            self.service.update_share_permission(share_id, permission).await,
        )?;
        self.toaster.success("Permission updated");
        Ok(share)
    }

    pub async fn bulk_complete(&self, ids: &[String]) -> Result<usize, AppError> {
        let done = self.report("completing todos", self.service.bulk_complete(ids).await)?;
        self.toaster.success(format!("{done} todos completed"));
        self.refetch().await;
        Ok(done)
    }

    pub async fn bulk_delete(&self, ids: &[String]) -> Result<usize, AppError> {
        let done = self.report("deleting todos", self.service.bulk_delete(ids).await)?;
        self.toaster.success(format!("{done} todos deleted"));
        self.refetch().await;
        Ok(done)
    }

    pub async fn bulk_set_priority(&self, ids: &[String], priority: Priority) -> Result<usize, AppError> {
        let done = self.report(
            "updating priority",
            self.service.bulk_set_priority(ids, priority).await,
        )?;
        self.toaster.success("Priority updated");
        self.refetch().await;
        Ok(done)
    }

    pub async fn bulk_add_tag(&self, ids: &[String], tag: &str) -> Result<usize, AppError> {
        let done = self.report("adding tag", self.service.bulk_add_tag(ids, tag).await)?;
        self.toaster.success("Tag added");
        self.refetch().await;
        Ok(done)
    }

    pub async fn upload_attachment(
        &self,
        todo_id: &str,
        file_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<Attachment, AppError> {
        let attachment = self.report(
            "uploading attachment",
            self.service
                .upload_attachment(todo_id, file_name, content_type, data)
                .await,
        )?;
        self.toaster.success("Attachment uploaded");
        self.refetch().await;
        Ok(attachment)
    }

    pub async fn delete_attachment(&self, todo_id: &str, attachment_id: &str) -> Result<(), AppError> {
        self.report(
            "deleting attachment",
            self.service.delete_attachment(todo_id, attachment_id).await,
        )?;
        self.toaster.success("Attachment deleted");
        self.refetch().await;
        Ok(())
    }

    pub async fn complete_recurring_instance(&self, todo_id: &str, date: &str) -> Result<Todo, AppError> {
        let todo = self.report(
            "completing occurrence",
            self.service.complete_recurring_instance(todo_id, date).await,
        )?;
        self.toaster.success("Recurring todo completed");
        self.refetch().await;
        Ok(todo)
    }

    pub fn unmount(mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn replace(&self, todo: &Todo) {
        self.store.patch(|todos| {
            if let Some(slot) = todos.iter_mut().find(|t| t.id == todo.id) {
                *slot = todo.clone();
            }
        });
    }

    fn report<T>(&self, action: &str, result: Result<T, AppError>) -> Result<T, AppError> {
        result.inspect_err(|err| self.toaster.error(format!("Error {action}: {err}")))
    }
}

/// One todo by id, fetched once and on `refetch`.
pub struct TodoHook {
    service: TodoService,
    toaster: Arc<dyn Toaster>,
    id: Option<String>,
    store: Store<Option<Todo>>,
}

impl TodoHook {
    pub async fn mount(service: TodoService, toaster: Arc<dyn Toaster>, id: Option<&str>) -> Self {
        let hook = Self {
            service,
            toaster,
            id: id.map(str::to_string),
            store: Store::new(None),
        };
        hook.refetch().await;
        hook
    }

    pub fn state(&self) -> HookState<Option<Todo>> {
        self.store.snapshot()
    }

    pub fn todo(&self) -> Option<Todo> {
        self.store.data()
    }

    pub async fn refetch(&self) -> bool {
        let Some(id) = self.id.as_deref() else {
            return self.store.load(None, async { Ok(None) }).await;
        };
        self.store
            .load(Some(self.toaster.as_ref()), self.service.get_todo_by_id(id))
            .await
    }
}
