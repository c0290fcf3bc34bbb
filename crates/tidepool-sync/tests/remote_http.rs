use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tidepool_core::{ClientIdentity, RoomId, TaskPatch};
use tidepool_sync::remote::{RemoteClient, RemoteError};
use tidepool_sync::tasks::{LoadStatus, TaskEngine, TaskStore};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredTask {
    owner: String,
    id: u64,
    value: String,
    completed: bool,
}

impl StoredTask {
    fn to_json(&self) -> Value {
        json!({ "id": self.id, "value": self.value, "completed": self.completed })
    }
}

#[derive(Default)]
struct Backend {
    tasks: Mutex<Vec<StoredTask>>,
    next_id: Mutex<u64>,
}

type Shared = Arc<Backend>;

async fn list_tasks(
    State(backend): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let owner = query.get("userId").cloned().unwrap_or_default();
    let tasks = backend.tasks.lock().await;
    Json(
        tasks
            .iter()
            .filter(|task| task.owner == owner)
            .map(StoredTask::to_json)
            .collect(),
    )
}

async fn create_task(State(backend): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let mut next_id = backend.next_id.lock().await;
    *next_id += 1;
    let task = StoredTask {
        owner: body["userId"].as_str().unwrap_or_default().to_string(),
        id: *next_id,
        value: body["value"].as_str().unwrap_or_default().to_string(),
        completed: false,
    };
    let out = task.to_json();
    backend.tasks.lock().await.push(task);
    Json(out)
}

async fn update_task(
    State(backend): State<Shared>,
    Path(id): Path<u64>,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let mut tasks = backend.tasks.lock().await;
    let task = tasks
        .iter_mut()
        .find(|task| task.id == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    if let Some(value) = patch["value"].as_str() {
        // the server trims, so the client must adopt what it returns
        task.value = value.trim().to_string();
    }
    if let Some(completed) = patch["completed"].as_bool() {
        task.completed = completed;
    }
    Ok(Json(task.to_json()))
}

async fn delete_task(State(backend): State<Shared>, Path(id): Path<u64>) -> StatusCode {
    backend.tasks.lock().await.retain(|task| task.id != id);
    StatusCode::NO_CONTENT
}

async fn clear_tasks(
    State(backend): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> StatusCode {
    let owner = query.get("userId").cloned().unwrap_or_default();
    backend.tasks.lock().await.retain(|task| task.owner != owner);
    StatusCode::NO_CONTENT
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{addr}")
}

async fn task_backend() -> (Shared, RemoteClient) {
    let backend: Shared = Arc::new(Backend::default());
    let router = Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task).delete(clear_tasks))
        .route("/api/tasks/:id", patch(update_task).delete(delete_task))
        .with_state(backend.clone());
    let base = serve(router).await;
    let client = RemoteClient::new(&format!("{base}/api"), Some(Duration::from_secs(5)))
        .expect("client");
    (backend, client)
}

fn owner(id: &str) -> ClientIdentity {
    ClientIdentity::new(id).expect("identity")
}

#[tokio::test]
async fn task_engine_round_trips_through_http_store() {
    let (backend, client) = task_backend().await;
    let engine = TaskEngine::new(owner("u-1"), client);

    engine.refresh().await.expect("refresh");
    assert_eq!(engine.snapshot().status, LoadStatus::Ready);
    assert!(engine.tasks().is_empty());

    let milk = engine
        .create("buy milk")
        .await
        .expect("create")
        .expect("non-blank");
    let bread = engine
        .create("buy bread")
        .await
        .expect("create")
        .expect("non-blank");
    assert_eq!(milk.id, "1");
    assert_eq!(bread.id, "2");

    let edited = engine.commit(&milk.id, "  oat milk  ").await.expect("commit");
    assert_eq!(edited.value, "oat milk");
    assert_eq!(engine.tasks()[0].value, "oat milk");

    let done = engine.complete(&bread.id).await.expect("complete");
    assert!(done.completed);
    assert_eq!(engine.snapshot().completed().len(), 1);

    assert!(engine.delete(&milk.id).await.expect("delete"));
    assert_eq!(engine.tasks().len(), 1);
    assert_eq!(backend.tasks.lock().await.len(), 1);

    engine.clear_all().await.expect("clear");
    assert!(engine.tasks().is_empty());
    assert!(backend.tasks.lock().await.is_empty());
}

#[tokio::test]
async fn list_is_scoped_to_owner() {
    let (_backend, client) = task_backend().await;
    client.create(&owner("a"), "mine").await.expect("create");
    client.create(&owner("b"), "theirs").await.expect("create");

    let engine = TaskEngine::new(owner("a"), client.clone());
    engine.refresh().await.expect("refresh");
    let values: Vec<_> = engine.tasks().into_iter().map(|task| task.value).collect();
    assert_eq!(values, vec!["mine".to_string()]);

    client.clear(&owner("a")).await.expect("clear");
    assert_eq!(client.list(&owner("b")).await.expect("list").len(), 1);
}

#[tokio::test]
async fn error_status_surfaces_as_unexpected_status() {
    let (_backend, client) = task_backend().await;
    let err = client
        .update(&owner("a"), "999", &TaskPatch::complete())
        .await
        .unwrap_err();
    match err {
        RemoteError::UnexpectedStatus { status, .. } => assert_eq!(status.as_u16(), 404),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn failed_refresh_marks_status_failed() {
    let router = Router::new().route(
        "/tasks",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let base = serve(router).await;
    let client = RemoteClient::new(&base, None).expect("client");
    let engine = TaskEngine::new(owner("a"), client);

    assert!(engine.refresh().await.is_err());
    assert!(matches!(engine.snapshot().status, LoadStatus::Failed(_)));
}

#[tokio::test]
async fn user_profile_and_rooms() {
    let router = Router::new()
        .route(
            "/user/:id",
            get(|Path(id): Path<String>| async move { Json(json!({ "id": id, "name": "Ada" })) }),
        )
        .route("/room", get(|| async { Json(json!([{ "id": 1 }, { "id": 4 }])) }))
        .route("/room/new", get(|| async { Json(json!({ "id": 5 })) }));
    let client = RemoteClient::new(&serve(router).await, None).expect("client");

    let profile = client.fetch_user(&owner("u-7")).await.expect("profile");
    assert_eq!(profile.id, "u-7");
    assert_eq!(profile.name.as_deref(), Some("Ada"));

    let rooms = client.list_rooms().await.expect("rooms");
    let ids: Vec<_> = rooms.iter().map(|room| room.id).collect();
    assert_eq!(ids, vec![RoomId(1), RoomId(4)]);

    assert_eq!(client.create_room().await.expect("room").id, RoomId(5));
}

#[tokio::test]
async fn rename_posts_id_and_name() {
    let router = Router::new().route(
        "/user/name",
        post(|Json(body): Json<Value>| async move { Json(body) }),
    );
    let client = RemoteClient::new(&serve(router).await, None).expect("client");

    let profile = client
        .rename_user(&owner("u-7"), "Grace")
        .await
        .expect("rename");
    assert_eq!(profile.id, "u-7");
    assert_eq!(profile.name.as_deref(), Some("Grace"));
}
