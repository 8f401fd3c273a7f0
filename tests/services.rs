use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use colist::backend::{AdapterExt, Backend, Table};
use colist::clock::now_millis;
use colist::db;
use colist::error::AppError;
use colist::geo::Coordinates;
use colist::models::{
    CreateList, CreateTodo, Identity, List, ListPermission, NewNotification, NotificationKind,
    ListPresence, PresenceStatus, ShareList, ShareTodo, Theme, TimeFormat, TodoPermission, UpdateList,
    UpdatePreferences, UpdatePresence, UpdateTodo,
};
use colist::services::{
    AttachmentStore, FixedLocation, GeolocationService, ListService, NotificationService,
    PermissionState, PreferencesService, TodoService,
};

struct Harness {
    backend: Backend,
    attachments: AttachmentStore,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Harness {
            backend: Backend::open_in_memory().unwrap(),
            attachments: AttachmentStore::new(dir.path()),
            _dir: dir,
        }
    }

    fn user(&self, email: &str) -> Identity {
        let profile = db::create_user(self.backend.db(), email, "secret", None).unwrap();
        Identity {
            id: profile.id,
            email: profile.email,
        }
    }

    fn lists(&self, user: &Identity) -> ListService {
        ListService::new(self.backend.as_user(user.clone()))
    }

    fn todos(&self, user: &Identity) -> TodoService {
        TodoService::new(self.backend.as_user(user.clone()), self.attachments.clone())
    }

    fn anonymous_lists(&self) -> ListService {
        ListService::new(self.backend.client(None))
    }
}

fn new_list(title: &str) -> CreateList {
    CreateList {
        title: title.to_string(),
        ..Default::default()
    }
}

fn new_todo(list_id: &str, title: &str) -> CreateTodo {
    CreateTodo {
        list_id: list_id.to_string(),
        title: title.to_string(),
        ..Default::default()
    }
}

/// Polls `check` until it holds or two seconds pass.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn default_list_comes_first() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);

    lists.create_list(new_list("Older")).await.unwrap();
    let default: List = h
        .backend
        .as_user(owner.clone())
        .insert_as(
            Table::Lists,
            json!({"title": "Inbox", "is_default": true, "position": i64::MAX}),
        )
        .unwrap();
    lists.create_list(new_list("Newer")).await.unwrap();

    let fetched = lists.get_lists().await.unwrap();
    assert_eq!(fetched.len(), 3);
    assert_eq!(fetched[0].id, default.id);
    assert_eq!(fetched[1].title, "Older");
    assert_eq!(fetched[2].title, "Newer");
}

#[tokio::test]
async fn equal_lists_are_ordered_by_id() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let adapter = h.backend.as_user(owner.clone());
    for id in ["list-b", "list-c", "list-a"] {
        let _: List = adapter
            .insert_as(
                Table::Lists,
                json!({"id": id, "title": id, "position": 1, "created_at": 1000}),
            )
            .unwrap();
    }

    let fetched = h.lists(&owner).get_lists().await.unwrap();
    let ids: Vec<_> = fetched.iter().map(|l| l.id.as_str()).collect();
    assert_eq!(ids, ["list-a", "list-b", "list-c"]);
}

#[tokio::test]
async fn get_lists_requires_a_session() {
    let h = Harness::new();
    let err = h.anonymous_lists().get_lists().await.unwrap_err();
    assert!(matches!(err, AppError::Auth));

    let err = h
        .anonymous_lists()
        .update_presence(UpdatePresence {
            list_id: "missing".into(),
            status: PresenceStatus::Viewing,
            editing_todo_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Auth));
}

#[tokio::test]
async fn created_list_keeps_its_position() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);

    let created = lists
        .create_list(CreateList {
            title: "Work".into(),
            color: Some("#6366f1".into()),
            ..Default::default()
        })
        .await
        .unwrap();

    let fetched = lists.get_lists().await.unwrap();
    let work = fetched.iter().find(|l| l.id == created.id).unwrap();
    assert!(!work.is_default);
    assert_eq!(work.color, "#6366f1");
    assert_eq!(work.position, created.position);

    // Later lists always get a larger key, even within the same millisecond
    let next = lists.create_list(new_list("Home")).await.unwrap();
    assert!(next.position > created.position);
}

#[tokio::test]
async fn toggle_twice_restores_completed() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Errands")).await.unwrap();
    let todos = h.todos(&owner);

    let todo = todos.create_todo(new_todo(&list.id, "Buy milk")).await.unwrap();
    assert!(!todo.completed);
    assert!(!todo.is_public);

    assert!(todos.toggle_todo(&todo.id).await.unwrap().completed);
    assert!(!todos.toggle_todo(&todo.id).await.unwrap().completed);
}

#[tokio::test]
async fn toggle_public_twice() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Errands")).await.unwrap();
    let todos = h.todos(&owner);
    let todo = todos.create_todo(new_todo(&list.id, "Buy milk")).await.unwrap();

    assert!(todos.toggle_public(&todo.id).await.unwrap().is_public);
    assert!(!todos.toggle_public(&todo.id).await.unwrap().is_public);
}

#[tokio::test]
async fn toggle_missing_todo_is_not_found() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let err = h.todos(&owner).toggle_todo("missing").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_toggles_both_apply() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Errands")).await.unwrap();
    let todo = h
        .todos(&owner)
        .create_todo(new_todo(&list.id, "Buy milk"))
        .await
        .unwrap();

    let first = {
        let todos = h.todos(&owner);
        let id = todo.id.clone();
        tokio::spawn(async move { todos.toggle_todo(&id).await })
    };
    let second = {
        let todos = h.todos(&owner);
        let id = todo.id.clone();
        tokio::spawn(async move { todos.toggle_todo(&id).await })
    };
    let a = first.await.unwrap().unwrap();
    let b = second.await.unwrap().unwrap();

    // Each call saw the other's write, so the flag flipped twice
    assert_ne!(a.completed, b.completed);
    let stored = h.todos(&owner).get_todo_by_id(&todo.id).await.unwrap().unwrap();
    assert!(!stored.completed);
}

#[tokio::test]
async fn share_is_pending_until_accepted() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let friend = h.user("friend@example.com");
    let list = h.lists(&owner).create_list(new_list("Trip")).await.unwrap();

    let share = h
        .lists(&owner)
        .share_list(ShareList {
            list_id: list.id.clone(),
            shared_with_email: " Friend@Example.com ".into(),
            permission: ListPermission::Editor,
        })
        .await
        .unwrap();
    assert!(share.accepted_at.is_none());
    assert_eq!(share.shared_with_email, "friend@example.com");
    assert_eq!(share.invited_by, owner.id);
    assert_eq!(share.shared_with_user_id.as_deref(), Some(friend.id.as_str()));

    let accepted = h.lists(&friend).accept_invite(&share.id).await.unwrap();
    assert!(accepted.accepted_at.is_some());
    assert_eq!(accepted.id, share.id);
    assert_eq!(accepted.list_id, share.list_id);
    assert_eq!(accepted.shared_with_user_id, share.shared_with_user_id);
    assert_eq!(accepted.shared_with_email, share.shared_with_email);
    assert_eq!(accepted.permission, share.permission);
    assert_eq!(accepted.invited_by, share.invited_by);
    assert_eq!(accepted.created_at, share.created_at);
}

#[tokio::test]
async fn invitees_cannot_raise_their_own_permission() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let viewer = h.user("viewer@example.com");
    let list = h.lists(&owner).create_list(new_list("Trip")).await.unwrap();
    let invite = |email: &str, permission| ShareList {
        list_id: list.id.clone(),
        shared_with_email: email.to_string(),
        permission,
    };
    let own = h
        .lists(&owner)
        .share_list(invite("viewer@example.com", ListPermission::Viewer))
        .await
        .unwrap();
    let other = h
        .lists(&owner)
        .share_list(invite("third@example.com", ListPermission::Editor))
        .await
        .unwrap();

    let err = h
        .lists(&viewer)
        .update_share_permission(&own.id, ListPermission::Owner)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let accepted = h.lists(&viewer).accept_invite(&own.id).await.unwrap();
    assert_eq!(accepted.permission, ListPermission::Viewer);

    let err = h.lists(&viewer).remove_share(&other.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = h
        .lists(&viewer)
        .update_list(
            &list.id,
            UpdateList {
                title: Some("hijacked".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    // The owner may still change it, and the invitee may still decline
    let promoted = h
        .lists(&owner)
        .update_share_permission(&own.id, ListPermission::Editor)
        .await
        .unwrap();
    assert_eq!(promoted.permission, ListPermission::Editor);
    h.lists(&viewer).remove_share(&own.id).await.unwrap();
    assert_eq!(h.lists(&owner).get_list_shares(&list.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn strangers_cannot_accept_an_invite() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let friend = h.user("friend@example.com");
    let stranger = h.user("stranger@example.com");
    let list = h.lists(&owner).create_list(new_list("Trip")).await.unwrap();
    let share = h
        .lists(&owner)
        .share_list(ShareList {
            list_id: list.id.clone(),
            shared_with_email: friend.email.clone(),
            permission: ListPermission::Editor,
        })
        .await
        .unwrap();

    let err = h.lists(&stranger).accept_invite(&share.id).await.unwrap_err();
    assert!(matches!(err, AppError::Backend(_)));

    // Visible to the owner, but not addressed to them
    let err = h.lists(&owner).accept_invite(&share.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let shares = h.lists(&owner).get_list_shares(&list.id).await.unwrap();
    assert!(shares[0].is_pending());
}

#[tokio::test]
async fn invite_before_signup_links_on_signup() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Trip")).await.unwrap();
    let share = h
        .lists(&owner)
        .share_list(ShareList {
            list_id: list.id.clone(),
            shared_with_email: "later@example.com".into(),
            permission: ListPermission::Viewer,
        })
        .await
        .unwrap();
    assert!(share.shared_with_user_id.is_none());

    let later = h.user("later@example.com");
    let shares = h.lists(&owner).get_list_shares(&list.id).await.unwrap();
    assert_eq!(shares[0].shared_with_user_id.as_deref(), Some(later.id.as_str()));
    assert_eq!(shares[0].user.as_ref().unwrap().email, "later@example.com");

    let visible = h.lists(&later).get_lists().await.unwrap();
    assert_eq!(visible.len(), 1);
}

#[tokio::test]
async fn remove_missing_share_leaves_shares_unchanged() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);
    let list = lists.create_list(new_list("Trip")).await.unwrap();
    lists
        .share_list(ShareList {
            list_id: list.id.clone(),
            shared_with_email: "friend@example.com".into(),
            permission: ListPermission::Viewer,
        })
        .await
        .unwrap();
    let before = lists.get_list_shares(&list.id).await.unwrap();

    let err = lists.remove_share("no-such-share").await.unwrap_err();
    assert!(matches!(err, AppError::Backend(_)));

    let after = lists.get_list_shares(&list.id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn viewers_cannot_edit_todos() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let viewer = h.user("viewer@example.com");
    let list = h.lists(&owner).create_list(new_list("Plans")).await.unwrap();
    let share = h
        .lists(&owner)
        .share_list(ShareList {
            list_id: list.id.clone(),
            shared_with_email: viewer.email.clone(),
            permission: ListPermission::Viewer,
        })
        .await
        .unwrap();
    h.lists(&viewer).accept_invite(&share.id).await.unwrap();
    let todo = h
        .todos(&owner)
        .create_todo(new_todo(&list.id, "Book hotel"))
        .await
        .unwrap();

    let seen = h.todos(&viewer).get_todos(Some(&list.id)).await.unwrap();
    assert_eq!(seen.len(), 1);

    let err = h
        .todos(&viewer)
        .create_todo(new_todo(&list.id, "Sneaky"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));

    let err = h.todos(&viewer).toggle_todo(&todo.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn deleting_a_list_removes_its_todos() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);
    let list = lists.create_list(new_list("Temp")).await.unwrap();
    let todo = h
        .todos(&owner)
        .create_todo(new_todo(&list.id, "Gone soon"))
        .await
        .unwrap();

    lists.delete_list(&list.id).await.unwrap();
    assert!(h.todos(&owner).get_todo_by_id(&todo.id).await.unwrap().is_none());
    assert!(lists.get_list_by_id(&list.id).await.unwrap().is_none());
}

#[tokio::test]
async fn no_callbacks_after_unsubscribe() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);

    let calls = Arc::new(AtomicUsize::new(0));
    let subscription = {
        let calls = calls.clone();
        lists.subscribe_to_lists(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
        })
    };

    lists.create_list(new_list("First")).await.unwrap();
    assert!(eventually(|| calls.load(Ordering::SeqCst) >= 1).await);

    subscription.unsubscribe();
    let seen = calls.load(Ordering::SeqCst);

    lists.create_list(new_list("Second")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), seen);
}

#[tokio::test]
async fn subscription_pushes_fresh_snapshot() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Groceries")).await.unwrap();
    let todos = h.todos(&owner);

    let latest = Arc::new(Mutex::new(Vec::new()));
    let _subscription = {
        let latest = latest.clone();
        todos.subscribe_to_todos(&list.id, move |snapshot| {
            *latest.lock().unwrap() = snapshot;
        })
    };

    todos.create_todo(new_todo(&list.id, "Eggs")).await.unwrap();
    todos.create_todo(new_todo(&list.id, "Bread")).await.unwrap();
    assert!(eventually(|| latest.lock().unwrap().len() == 2).await);
}

#[tokio::test]
async fn presence_upsert_is_one_row_per_user() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);
    let list = lists.create_list(new_list("Team")).await.unwrap();

    for status in [PresenceStatus::Viewing, PresenceStatus::Editing] {
        lists
            .update_presence(UpdatePresence {
                list_id: list.id.clone(),
                status,
                editing_todo_id: None,
            })
            .await
            .unwrap();
    }

    let rows = lists.get_list_presence(&list.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, PresenceStatus::Editing);

    lists.leave_list(&list.id).await.unwrap();
    assert!(lists.get_list_presence(&list.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn pruning_removes_stale_presence_and_notifies() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let lists = h.lists(&owner);
    let list = lists.create_list(new_list("Team")).await.unwrap();
    let other = lists.create_list(new_list("Solo")).await.unwrap();

    let latest: Arc<Mutex<Option<Vec<ListPresence>>>> = Arc::new(Mutex::new(None));
    let _subscription = {
        let latest = latest.clone();
        lists.subscribe_to_list_presence(&list.id, move |rows| {
            *latest.lock().unwrap() = Some(rows);
        })
    };

    lists
        .update_presence(UpdatePresence {
            list_id: list.id.clone(),
            status: PresenceStatus::Viewing,
            editing_todo_id: None,
        })
        .await
        .unwrap();
    assert!(eventually(|| latest.lock().unwrap().as_ref().is_some_and(|rows| rows.len() == 1)).await);

    // Nothing is older than a cutoff in the past
    assert_eq!(h.backend.prune_stale_presence(0).unwrap(), 0);

    lists
        .update_presence(UpdatePresence {
            list_id: other.id.clone(),
            status: PresenceStatus::Viewing,
            editing_todo_id: None,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(h.backend.prune_stale_presence(now_millis() + 1).unwrap(), 2);

    assert!(eventually(|| latest.lock().unwrap().as_ref().is_some_and(Vec::is_empty)).await);
    assert!(lists.get_list_presence(&list.id).await.unwrap().is_empty());
    assert!(lists.get_list_presence(&other.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn strangers_cannot_announce_presence() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let stranger = h.user("stranger@example.com");
    let list = h.lists(&owner).create_list(new_list("Private")).await.unwrap();

    let err = h
        .lists(&stranger)
        .update_presence(UpdatePresence {
            list_id: list.id.clone(),
            status: PresenceStatus::Viewing,
            editing_todo_id: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden));
}

#[tokio::test]
async fn bulk_operations_stop_at_first_failure() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Chores")).await.unwrap();
    let todos = h.todos(&owner);
    let a = todos.create_todo(new_todo(&list.id, "A")).await.unwrap();
    let b = todos.create_todo(new_todo(&list.id, "B")).await.unwrap();

    let ids = vec![a.id.clone(), "missing".to_string(), b.id.clone()];
    assert!(todos.bulk_complete(&ids).await.is_err());

    assert!(todos.get_todo_by_id(&a.id).await.unwrap().unwrap().completed);
    assert!(!todos.get_todo_by_id(&b.id).await.unwrap().unwrap().completed);

    let done = todos
        .bulk_add_tag(&[a.id.clone(), b.id.clone()], "  urgent ")
        .await
        .unwrap();
    assert_eq!(done, 2);
    let tagged = todos.get_todo_by_id(&b.id).await.unwrap().unwrap();
    assert_eq!(tagged.tags, vec!["urgent".to_string()]);
}

#[tokio::test]
async fn recurring_completion_advances_due_date() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Routines")).await.unwrap();
    let todos = h.todos(&owner);

    let todo = todos
        .create_todo(CreateTodo {
            due_date: Some("2024-01-31".into()),
            recurrence_rule: Some("monthly".into()),
            ..new_todo(&list.id, "Pay rent")
        })
        .await
        .unwrap();

    let next = todos
        .complete_recurring_instance(&todo.id, "2024-01-31")
        .await
        .unwrap();
    assert_eq!(next.due_date.as_deref(), Some("2024-02-29"));

    // Completing the same occurrence again keeps the later due date
    let again = todos
        .complete_recurring_instance(&todo.id, "2024-01-31")
        .await
        .unwrap();
    assert_eq!(again.due_date.as_deref(), Some("2024-02-29"));

    let plain = todos.create_todo(new_todo(&list.id, "Once")).await.unwrap();
    let err = todos
        .complete_recurring_instance(&plain.id, "2024-01-31")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Backend(_)));
}

#[tokio::test]
async fn invalid_schedule_is_rejected() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Routines")).await.unwrap();
    let todos = h.todos(&owner);

    let err = todos
        .create_todo(CreateTodo {
            due_date: Some("31/01/2024".into()),
            ..new_todo(&list.id, "Bad date")
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let todo = todos.create_todo(new_todo(&list.id, "Fine")).await.unwrap();
    let err = todos
        .update_todo(
            &todo.id,
            UpdateTodo {
                recurrence_rule: Some(Some("hourly".into())),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn todo_shares_grant_edit_access() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let helper = h.user("helper@example.com");
    let list = h.lists(&owner).create_list(new_list("Private")).await.unwrap();
    let todo = h
        .todos(&owner)
        .create_todo(new_todo(&list.id, "Fix sink"))
        .await
        .unwrap();

    assert!(h.todos(&helper).get_todo_by_id(&todo.id).await.unwrap().is_none());

    let share = h
        .todos(&owner)
        .share_todo(ShareTodo {
            todo_id: todo.id.clone(),
            shared_with_email: "helper@example.com".into(),
            permission: TodoPermission::View,
        })
        .await
        .unwrap();
    assert!(h.todos(&helper).get_todo_by_id(&todo.id).await.unwrap().is_some());
    assert!(h.todos(&helper).toggle_todo(&todo.id).await.is_err());

    h.todos(&owner)
        .update_share_permission(&share.id, TodoPermission::Edit)
        .await
        .unwrap();
    assert!(h.todos(&helper).toggle_todo(&todo.id).await.unwrap().completed);

    h.todos(&owner).remove_share(&share.id).await.unwrap();
    assert!(h.todos(&owner).get_shares(&todo.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn attachments_round_trip() {
    let h = Harness::new();
    h.attachments.initialize().await.unwrap();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Docs")).await.unwrap();
    let todos = h.todos(&owner);
    let todo = todos.create_todo(new_todo(&list.id, "Taxes")).await.unwrap();

    let attachment = todos
        .upload_attachment(&todo.id, "../receipt.pdf", "application/pdf", b"%PDF")
        .await
        .unwrap();
    assert_eq!(attachment.size, 4);
    assert!(!attachment.file_name.contains('/'));

    let (meta, data) = todos.read_attachment(&todo.id, &attachment.id).await.unwrap();
    assert_eq!(meta, attachment);
    assert_eq!(data, b"%PDF");

    todos.delete_attachment(&todo.id, &attachment.id).await.unwrap();
    let todo = todos.get_todo_by_id(&todo.id).await.unwrap().unwrap();
    assert!(todo.attachments.is_empty());
    assert!(matches!(
        todos.read_attachment(&todo.id, &attachment.id).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn notifications_are_private_and_countable() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let other = h.user("other@example.com");
    let inbox = NotificationService::new(h.backend.as_user(owner.clone()));

    for title in ["One", "Two"] {
        inbox
            .create_notification(NewNotification {
                kind: NotificationKind::ListUpdate,
                title: title.into(),
                body: String::new(),
                action_url: None,
            })
            .await
            .unwrap();
    }
    assert_eq!(inbox.get_unread_count().await.unwrap(), 2);

    let others = NotificationService::new(h.backend.as_user(other));
    assert!(others.get_notifications().await.unwrap().is_empty());

    let newest = inbox.get_notifications().await.unwrap();
    assert_eq!(newest.len(), 2);
    inbox.mark_as_read(&newest[0].id).await.unwrap();
    assert_eq!(inbox.get_unread_count().await.unwrap(), 1);

    assert_eq!(inbox.mark_all_as_read().await.unwrap(), 1);
    assert_eq!(inbox.get_unread_count().await.unwrap(), 0);

    inbox.delete_notification(&newest[1].id).await.unwrap();
    assert_eq!(inbox.get_notifications().await.unwrap().len(), 1);
}

#[tokio::test]
async fn preferences_default_then_persist() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let prefs = PreferencesService::new(h.backend.as_user(owner.clone()));

    let defaults = prefs.get_preferences().await.unwrap();
    assert_eq!(defaults.theme_preference, Theme::System);
    assert!(!defaults.auto_hide_completed);

    let saved = prefs
        .update_preferences(UpdatePreferences {
            theme_preference: Some(Theme::Dark),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(saved.theme_preference, Theme::Dark);

    let saved = prefs
        .update_preferences(UpdatePreferences {
            auto_hide_completed: Some(true),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(saved.theme_preference, Theme::Dark);
    assert!(saved.auto_hide_completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_first_saves_both_apply() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let save = |input: UpdatePreferences| {
        let prefs = PreferencesService::new(h.backend.as_user(owner.clone()));
        tokio::spawn(async move { prefs.update_preferences(input).await })
    };

    let first = save(UpdatePreferences {
        theme_preference: Some(Theme::Dark),
        ..Default::default()
    });
    let second = save(UpdatePreferences {
        time_format: Some(TimeFormat::TwentyFourHour),
        ..Default::default()
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let stored = PreferencesService::new(h.backend.as_user(owner.clone()))
        .get_preferences()
        .await
        .unwrap();
    assert_eq!(stored.theme_preference, Theme::Dark);
    assert_eq!(stored.time_format, TimeFormat::TwentyFourHour);
    assert!(!stored.auto_hide_completed);
}

#[tokio::test]
async fn proximity_finds_open_todos_in_range() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Errands")).await.unwrap();
    let todos = h.todos(&owner);

    let near = todos
        .create_todo(CreateTodo {
            latitude: Some(52.5200),
            longitude: Some(13.4050),
            location_name: Some("Post office".into()),
            ..new_todo(&list.id, "Send parcel")
        })
        .await
        .unwrap();
    let done = todos
        .create_todo(CreateTodo {
            latitude: Some(52.5201),
            longitude: Some(13.4050),
            ..new_todo(&list.id, "Already done")
        })
        .await
        .unwrap();
    todos.toggle_todo(&done.id).await.unwrap();

    let geo = GeolocationService::new(
        h.backend.as_user(owner),
        Arc::new(FixedLocation::new(None, PermissionState::Prompt)),
        200.0,
        Duration::from_secs(60),
    );
    let here = Coordinates::new(52.5205, 13.4052);
    let found = geo.check_proximity_to_todos(here).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, near.id);

    let lists = geo.check_proximity_to_lists(here).await.unwrap();
    assert_eq!(lists.len(), 1);

    let far = geo
        .check_proximity_to_todos(Coordinates::new(48.8566, 2.3522))
        .await
        .unwrap();
    assert!(far.is_empty());
}

#[tokio::test]
async fn monitoring_requires_permission_and_notifies_once() {
    let h = Harness::new();
    let owner = h.user("owner@example.com");
    let list = h.lists(&owner).create_list(new_list("Errands")).await.unwrap();
    h.todos(&owner)
        .create_todo(CreateTodo {
            latitude: Some(52.5200),
            longitude: Some(13.4050),
            ..new_todo(&list.id, "Send parcel")
        })
        .await
        .unwrap();

    let nowhere = GeolocationService::new(
        h.backend.as_user(owner.clone()),
        Arc::new(FixedLocation::new(None, PermissionState::Prompt)),
        200.0,
        Duration::from_millis(20),
    );
    assert!(nowhere.start_monitoring().is_err());
    assert!(!nowhere.request_permission().await);

    // Start far away, then walk up to the todo
    let location = Arc::new(FixedLocation::new(
        Some(Coordinates::new(48.8566, 2.3522)),
        PermissionState::Prompt,
    ));
    let geo = GeolocationService::new(
        h.backend.as_user(owner.clone()),
        location.clone(),
        200.0,
        Duration::from_millis(20),
    );
    assert!(geo.request_permission().await);
    geo.start_monitoring().unwrap();
    assert!(geo.is_monitoring());

    let inbox = NotificationService::new(h.backend.as_user(owner.clone()));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(inbox.get_notifications().await.unwrap().is_empty());

    location.set_position(Some(Coordinates::new(52.5201, 13.4051)));
    let mut notified = false;
    for _ in 0..100 {
        if !inbox.get_notifications().await.unwrap().is_empty() {
            notified = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(notified);

    // Staying in range does not repeat the reminder
    tokio::time::sleep(Duration::from_millis(100)).await;
    let reminders = inbox.get_notifications().await.unwrap();
    assert_eq!(reminders.len(), 1);
    assert_eq!(reminders[0].kind, NotificationKind::LocationReminder);

    geo.stop_monitoring();
    assert!(!geo.is_monitoring());
}
