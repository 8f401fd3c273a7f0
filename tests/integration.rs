use std::sync::Arc;

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use colist::backend::Backend;
use colist::services::AttachmentStore;
use colist::{create_app, AppState};

struct TestServer {
    addr: String,
    client: Client,
    _attachments: TempDir,
}

impl TestServer {
    async fn new() -> Self {
        Self::with_base_path("").await
    }

    async fn with_base_path(base_path: &str) -> Self {
        let backend = Backend::open_in_memory().expect("Failed to create in-memory database");
        let dir = TempDir::new().expect("Failed to create attachments dir");
        let attachments = AttachmentStore::new(dir.path());
        attachments.initialize().await.unwrap();

        let state = AppState {
            backend,
            attachments,
            base_path: Arc::new(base_path.to_string()),
            proximity_radius_m: 200.0,
        };
        let app = create_app(state);

        // Bind to random available port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = format!("http://{}", listener.local_addr().unwrap());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            client: new_client(),
            _attachments: dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Signs up `email` on `client`, leaving it logged in.
    async fn signup(&self, client: &Client, email: &str) -> Value {
        let resp = client
            .post(self.url("/api/signup"))
            .json(&json!({"email": email, "password": "secret", "display_name": "Tester"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }

    async fn create_list(&self, client: &Client, title: &str) -> Value {
        let resp = client
            .post(self.url("/api/lists"))
            .json(&json!({"title": title}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }

    async fn create_todo(&self, client: &Client, list_id: &str, body: Value) -> Value {
        let resp = client
            .post(self.url(&format!("/api/lists/{list_id}/todos")))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        resp.json().await.unwrap()
    }
}

// Create client with cookie store
fn new_client() -> Client {
    Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("Failed to create client")
}

#[tokio::test]
async fn test_lists_unauthenticated() {
    let server = TestServer::new().await;

    let resp = server
        .client
        .get(server.url("/api/lists"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "User not authenticated");
}

#[tokio::test]
async fn test_signup_and_login() {
    let server = TestServer::new().await;

    let user = server.signup(&server.client, "Alice@Example.com").await;
    assert_eq!(user["email"], "alice@example.com");

    // Duplicate signup is rejected
    let resp = new_client()
        .post(server.url("/api/signup"))
        .json(&json!({"email": "alice@example.com", "password": "other"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let client = new_client();
    let resp = client
        .post(server.url("/api/login"))
        .json(&json!({"email": "alice@example.com", "password": "wrong"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(server.url("/api/login"))
        .json(&json!({"email": "alice@example.com", "password": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);

    let resp = client.get(server.url("/api/lists")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = client.post(server.url("/api/logout")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let resp = client.get(server.url("/api/lists")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_crud() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;

    let resp = server
        .client
        .get(server.url("/api/lists"))
        .send()
        .await
        .unwrap();
    let lists: Vec<Value> = resp.json().await.unwrap();
    assert!(lists.is_empty());

    let list = server.create_list(&server.client, "Groceries").await;
    assert_eq!(list["title"], "Groceries");
    assert_eq!(list["is_default"], false);
    assert_eq!(list["color"], "#6366f1");
    let list_id = list["id"].as_str().unwrap();

    let resp = server
        .client
        .put(server.url(&format!("/api/lists/{list_id}")))
        .json(&json!({"title": "Weekly groceries", "color": "#22c55e"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let list: Value = resp.json().await.unwrap();
    assert_eq!(list["title"], "Weekly groceries");
    assert_eq!(list["color"], "#22c55e");

    let resp = server
        .client
        .delete(server.url(&format!("/api/lists/{list_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server
        .client
        .get(server.url(&format!("/api/lists/{list_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_empty_title_and_email_rejected() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;

    let resp = server
        .client
        .post(server.url("/api/lists"))
        .json(&json!({"title": "   "}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let list = server.create_list(&server.client, "Work").await;
    let list_id = list["id"].as_str().unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/api/lists/{list_id}/todos")))
        .json(&json!({"title": ""}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = server
        .client
        .post(server.url(&format!("/api/lists/{list_id}/shares")))
        .json(&json!({"shared_with_email": " ", "permission": "viewer"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_todo_crud_and_toggle() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Errands").await;
    let list_id = list["id"].as_str().unwrap();

    let todo = server
        .create_todo(&server.client, list_id, json!({"title": "Buy groceries", "tags": ["home", "home"]}))
        .await;
    assert_eq!(todo["title"], "Buy groceries");
    assert_eq!(todo["completed"], false);
    assert_eq!(todo["list_id"], list_id);
    assert_eq!(todo["tags"], json!(["home"]));
    let todo_id = todo["id"].as_str().unwrap();

    let resp = server
        .client
        .put(server.url(&format!("/api/todos/{todo_id}")))
        .json(&json!({"title": "Buy groceries today", "priority": "high"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["title"], "Buy groceries today");
    assert_eq!(updated["priority"], "high");

    // Toggling twice restores the original value
    for expected in [true, false] {
        let resp = server
            .client
            .post(server.url(&format!("/api/todos/{todo_id}/toggle")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let toggled: Value = resp.json().await.unwrap();
        assert_eq!(toggled["completed"], expected);
    }

    let resp = server
        .client
        .post(server.url(&format!("/api/todos/{todo_id}/toggle-public")))
        .send()
        .await
        .unwrap();
    let toggled: Value = resp.json().await.unwrap();
    assert_eq!(toggled["is_public"], true);

    let resp = server
        .client
        .get(server.url(&format!("/api/lists/{list_id}/todos")))
        .send()
        .await
        .unwrap();
    let todos: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(todos.len(), 1);

    let resp = server
        .client
        .delete(server.url(&format!("/api/todos/{todo_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server
        .client
        .get(server.url(&format!("/api/todos/{todo_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_bulk_operations() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Chores").await;
    let list_id = list["id"].as_str().unwrap();

    let mut ids = Vec::new();
    for title in ["Dishes", "Laundry", "Vacuum"] {
        let todo = server
            .create_todo(&server.client, list_id, json!({"title": title}))
            .await;
        ids.push(todo["id"].as_str().unwrap().to_string());
    }

    let resp = server
        .client
        .post(server.url("/api/todos/bulk"))
        .json(&json!({"ids": ids[..2], "action": "complete"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 2);

    let resp = server
        .client
        .post(server.url("/api/todos/bulk"))
        .json(&json!({"ids": ids, "action": "add_tag", "tag": "weekend"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url(&format!("/api/lists/{list_id}/todos")))
        .send()
        .await
        .unwrap();
    let todos: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(todos.iter().filter(|t| t["completed"] == true).count(), 2);
    assert!(todos.iter().all(|t| t["tags"] == json!(["weekend"])));

    let resp = server
        .client
        .post(server.url("/api/todos/bulk"))
        .json(&json!({"ids": ids, "action": "delete"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 3);
}

#[tokio::test]
async fn test_recurring_completion() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Routines").await;
    let list_id = list["id"].as_str().unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/api/lists/{list_id}/todos")))
        .json(&json!({"title": "Water plants", "recurrence_rule": "fortnightly"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let todo = server
        .create_todo(
            &server.client,
            list_id,
            json!({"title": "Water plants", "due_date": "2024-03-01", "recurrence_rule": "weekly"}),
        )
        .await;
    let todo_id = todo["id"].as_str().unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/api/todos/{todo_id}/complete-instance")))
        .json(&json!({"date": "2024-03-01"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let todo: Value = resp.json().await.unwrap();
    assert_eq!(todo["due_date"], "2024-03-08");
}

#[tokio::test]
async fn test_list_sharing_flow() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Shared").await;
    let list_id = list["id"].as_str().unwrap();

    // Invite before the invitee has an account
    let resp = server
        .client
        .post(server.url(&format!("/api/lists/{list_id}/shares")))
        .json(&json!({"shared_with_email": "Friend@Example.com", "permission": "editor"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let share: Value = resp.json().await.unwrap();
    assert_eq!(share["shared_with_email"], "friend@example.com");
    assert!(share["accepted_at"].is_null());
    let share_id = share["id"].as_str().unwrap();

    let friend = new_client();
    server.signup(&friend, "friend@example.com").await;

    let resp = friend.get(server.url("/api/lists")).send().await.unwrap();
    let lists: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0]["id"], list_id);

    let resp = friend
        .post(server.url(&format!("/api/shares/{share_id}/accept")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let accepted: Value = resp.json().await.unwrap();
    assert!(accepted["accepted_at"].is_i64());
    assert_eq!(accepted["permission"], "editor");

    // Only the owner decides the permission
    let resp = friend
        .put(server.url(&format!("/api/shares/{share_id}")))
        .json(&json!({"permission": "owner"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Editors can add todos to the shared list
    server
        .create_todo(&friend, list_id, json!({"title": "Bring snacks"}))
        .await;

    let resp = server
        .client
        .get(server.url(&format!("/api/lists/{list_id}/shares")))
        .send()
        .await
        .unwrap();
    let shares: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(shares.len(), 1);
    assert_eq!(shares[0]["user"]["email"], "friend@example.com");

    let resp = server
        .client
        .delete(server.url(&format!("/api/shares/{share_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = friend.get(server.url("/api/lists")).send().await.unwrap();
    let lists: Vec<Value> = resp.json().await.unwrap();
    assert!(lists.is_empty());
}

#[tokio::test]
async fn test_strangers_cannot_modify_lists() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Private").await;
    let list_id = list["id"].as_str().unwrap();

    let stranger = new_client();
    server.signup(&stranger, "stranger@example.com").await;

    let resp = stranger
        .get(server.url(&format!("/api/lists/{list_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = stranger
        .post(server.url(&format!("/api/lists/{list_id}/todos")))
        .json(&json!({"title": "Sneaky"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_presence_round_trip() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Team").await;
    let list_id = list["id"].as_str().unwrap();
    let presence_url = server.url(&format!("/api/lists/{list_id}/presence"));

    let resp = server
        .client
        .put(&presence_url)
        .json(&json!({"status": "viewing"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server.client.get(&presence_url).send().await.unwrap();
    let rows: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["status"], "viewing");
    assert_eq!(rows[0]["user"]["email"], "owner@example.com");

    let resp = server.client.delete(&presence_url).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server.client.get(&presence_url).send().await.unwrap();
    let rows: Vec<Value> = resp.json().await.unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_attachments() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Docs").await;
    let todo = server
        .create_todo(&server.client, list["id"].as_str().unwrap(), json!({"title": "File taxes"}))
        .await;
    let todo_id = todo["id"].as_str().unwrap();

    let resp = server
        .client
        .post(server.url(&format!("/api/todos/{todo_id}/attachments")))
        .header("x-file-name", "receipt.txt")
        .header("content-type", "text/plain")
        .body("total: 42")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let attachment: Value = resp.json().await.unwrap();
    assert_eq!(attachment["file_name"], "receipt.txt");
    assert_eq!(attachment["size"], 9);
    let attachment_id = attachment["id"].as_str().unwrap();

    let resp = server
        .client
        .get(server.url(&format!("/api/todos/{todo_id}/attachments/{attachment_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "total: 42");

    let resp = server
        .client
        .delete(server.url(&format!("/api/todos/{todo_id}/attachments/{attachment_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = server
        .client
        .get(server.url(&format!("/api/todos/{todo_id}")))
        .send()
        .await
        .unwrap();
    let todo: Value = resp.json().await.unwrap();
    assert_eq!(todo["attachments"], json!([]));

    // Missing file name
    let resp = server
        .client
        .post(server.url(&format!("/api/todos/{todo_id}/attachments")))
        .body("data")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notifications_and_preferences() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;

    let resp = server
        .client
        .get(server.url("/api/notifications"))
        .send()
        .await
        .unwrap();
    let notifications: Vec<Value> = resp.json().await.unwrap();
    assert!(notifications.is_empty());

    let resp = server
        .client
        .post(server.url("/api/notifications/read-all"))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["count"], 0);

    let resp = server
        .client
        .get(server.url("/api/preferences"))
        .send()
        .await
        .unwrap();
    let prefs: Value = resp.json().await.unwrap();
    assert_eq!(prefs["time_format"], "12h");
    assert_eq!(prefs["theme_preference"], "system");

    let resp = server
        .client
        .put(server.url("/api/preferences"))
        .json(&json!({"time_format": "24h", "auto_hide_completed": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/api/preferences"))
        .send()
        .await
        .unwrap();
    let prefs: Value = resp.json().await.unwrap();
    assert_eq!(prefs["time_format"], "24h");
    assert_eq!(prefs["auto_hide_completed"], true);
    assert_eq!(prefs["theme_preference"], "system");
}

#[tokio::test]
async fn test_nearby() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    let list = server.create_list(&server.client, "Errands").await;
    let list_id = list["id"].as_str().unwrap();

    server
        .create_todo(
            &server.client,
            list_id,
            json!({"title": "Pick up parcel", "latitude": 52.5200, "longitude": 13.4050}),
        )
        .await;
    server
        .create_todo(
            &server.client,
            list_id,
            json!({"title": "Far away", "latitude": 48.8566, "longitude": 2.3522}),
        )
        .await;

    let resp = server
        .client
        .get(server.url("/api/nearby?lat=52.5201&lon=13.4051"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["todos"].as_array().unwrap().len(), 1);
    assert_eq!(body["todos"][0]["title"], "Pick up parcel");
    assert_eq!(body["lists"][0]["id"], list_id);

    let resp = server
        .client
        .get(server.url("/api/nearby?lat=95&lon=0"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_tokens() {
    let server = TestServer::new().await;
    server.signup(&server.client, "owner@example.com").await;
    server.create_list(&server.client, "Inbox").await;

    let resp = server
        .client
        .post(server.url("/api/tokens"))
        .json(&json!({"name": "cli"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let token: Value = resp.json().await.unwrap();
    let value = token["token"].as_str().unwrap().to_string();
    let id = token["id"].as_i64().unwrap();

    // Bearer tokens reach the API but not token management
    let bare = Client::new();
    let resp = bare
        .get(server.url("/api/lists"))
        .bearer_auth(&value)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let lists: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(lists.len(), 1);

    let resp = bare
        .get(server.url("/api/tokens"))
        .bearer_auth(&value)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = server
        .client
        .delete(server.url(&format!("/api/tokens/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = bare
        .get(server.url("/api/lists"))
        .bearer_auth(&value)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_base_path() {
    let server = TestServer::with_base_path("/todo").await;

    let resp = server
        .client
        .post(server.url("/todo/api/signup"))
        .json(&json!({"email": "owner@example.com", "password": "secret"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = server
        .client
        .get(server.url("/todo/api/lists"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = server
        .client
        .get(server.url("/api/lists"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
