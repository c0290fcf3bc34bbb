use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tidepool_core::{ClientIdentity, NewTask, Task, TaskPatch};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::remote::{RemoteClient, RemoteError, RemoteRequest, Resource, Verb};

/// Persistence seam behind the task engine. Every write returns the
/// canonical stored entity, except deletes which return nothing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list(&self, owner: &ClientIdentity) -> Result<Vec<Task>, RemoteError>;

    async fn create(&self, owner: &ClientIdentity, value: &str) -> Result<Task, RemoteError>;

    async fn update(
        &self,
        owner: &ClientIdentity,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError>;

    async fn delete(&self, owner: &ClientIdentity, id: &str) -> Result<(), RemoteError>;

    async fn clear(&self, owner: &ClientIdentity) -> Result<(), RemoteError>;
}

#[async_trait]
impl<T: TaskStore + ?Sized> TaskStore for Arc<T> {
    async fn list(&self, owner: &ClientIdentity) -> Result<Vec<Task>, RemoteError> {
        (**self).list(owner).await
    }

    async fn create(&self, owner: &ClientIdentity, value: &str) -> Result<Task, RemoteError> {
        (**self).create(owner, value).await
    }

    async fn update(
        &self,
        owner: &ClientIdentity,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        (**self).update(owner, id, patch).await
    }

    async fn delete(&self, owner: &ClientIdentity, id: &str) -> Result<(), RemoteError> {
        (**self).delete(owner, id).await
    }

    async fn clear(&self, owner: &ClientIdentity) -> Result<(), RemoteError> {
        (**self).clear(owner).await
    }
}

#[async_trait]
impl TaskStore for RemoteClient {
    async fn list(&self, owner: &ClientIdentity) -> Result<Vec<Task>, RemoteError> {
        self.request(
            RemoteRequest::new(Resource::Tasks, Verb::List).with_query("userId", owner.as_str()),
        )
        .await
    }

    async fn create(&self, owner: &ClientIdentity, value: &str) -> Result<Task, RemoteError> {
        let body = NewTask {
            user_id: owner.as_str().to_string(),
            value: value.to_string(),
        };
        self.request(RemoteRequest::new(Resource::Tasks, Verb::Create).with_body(&body)?)
            .await
    }

    async fn update(
        &self,
        _owner: &ClientIdentity,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        self.request(
            RemoteRequest::new(Resource::Tasks, Verb::Update)
                .with_id(id)
                .with_body(patch)?,
        )
        .await
    }

    async fn delete(&self, _owner: &ClientIdentity, id: &str) -> Result<(), RemoteError> {
        self.execute(RemoteRequest::new(Resource::Tasks, Verb::Delete).with_id(id))
            .await
    }

    async fn clear(&self, owner: &ClientIdentity) -> Result<(), RemoteError> {
        self.execute(
            RemoteRequest::new(Resource::Tasks, Verb::Delete).with_query("userId", owner.as_str()),
        )
        .await
    }
}

/// In-memory store keyed by owner; used by tests and as the mock remote.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<(String, Task)>>,
    calls: Mutex<usize>,
}

impl InMemoryTaskStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of store calls served so far.
    pub async fn calls(&self) -> usize {
        *self.calls.lock().await
    }

    async fn record_call(&self) {
        *self.calls.lock().await += 1;
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn list(&self, owner: &ClientIdentity) -> Result<Vec<Task>, RemoteError> {
        self.record_call().await;
        Ok(self
            .tasks
            .lock()
            .await
            .iter()
            .filter(|(task_owner, _)| task_owner == owner.as_str())
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn create(&self, owner: &ClientIdentity, value: &str) -> Result<Task, RemoteError> {
        self.record_call().await;
        let task = Task {
            id: Uuid::new_v4().to_string(),
            value: value.to_string(),
            completed: false,
        };
        self.tasks
            .lock()
            .await
            .push((owner.as_str().to_string(), task.clone()));
        Ok(task)
    }

    async fn update(
        &self,
        owner: &ClientIdentity,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        self.record_call().await;
        let mut guard = self.tasks.lock().await;
        let (_, task) = guard
            .iter_mut()
            .find(|(task_owner, task)| task_owner == owner.as_str() && task.id == id)
            .ok_or_else(|| RemoteError::Store(format!("task {id} not found")))?;
        patch.apply_to(task);
        Ok(task.clone())
    }

    async fn delete(&self, owner: &ClientIdentity, id: &str) -> Result<(), RemoteError> {
        self.record_call().await;
        self.tasks
            .lock()
            .await
            .retain(|(task_owner, task)| !(task_owner == owner.as_str() && task.id == id));
        Ok(())
    }

    async fn clear(&self, owner: &ClientIdentity) -> Result<(), RemoteError> {
        self.record_call().await;
        self.tasks
            .lock()
            .await
            .retain(|(task_owner, _)| task_owner != owner.as_str());
        Ok(())
    }
}

/// Local-only store: the task list as a JSON array on disk.
///
/// Used when no remote API is configured. One file per installation, so the
/// owner argument is not part of the file format.
pub struct JsonFileTaskStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileTaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join("tasks.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<Task>, RemoteError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                RemoteError::Store(format!("corrupt task file {}: {err}", self.path.display()))
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(RemoteError::Store(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn write(&self, tasks: &[Task]) -> Result<(), RemoteError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| RemoteError::Store(err.to_string()))?;
        }
        let encoded = serde_json::to_vec_pretty(tasks)?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(|err| {
                RemoteError::Store(format!("failed to write {}: {err}", self.path.display()))
            })?;
        debug!(target = "tidepool::tasks", path = %self.path.display(), count = tasks.len(), "saved local tasks");
        Ok(())
    }
}

#[async_trait]
impl TaskStore for JsonFileTaskStore {
    async fn list(&self, _owner: &ClientIdentity) -> Result<Vec<Task>, RemoteError> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    async fn create(&self, _owner: &ClientIdentity, value: &str) -> Result<Task, RemoteError> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;
        let task = Task {
            id: Uuid::new_v4().to_string(),
            value: value.to_string(),
            completed: false,
        };
        tasks.push(task.clone());
        self.write(&tasks).await?;
        Ok(task)
    }

    async fn update(
        &self,
        _owner: &ClientIdentity,
        id: &str,
        patch: &TaskPatch,
    ) -> Result<Task, RemoteError> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| RemoteError::Store(format!("task {id} not found")))?;
        patch.apply_to(task);
        let updated = task.clone();
        self.write(&tasks).await?;
        Ok(updated)
    }

    async fn delete(&self, _owner: &ClientIdentity, id: &str) -> Result<(), RemoteError> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.read().await?;
        tasks.retain(|task| task.id != id);
        self.write(&tasks).await
    }

    async fn clear(&self, _owner: &ClientIdentity) -> Result<(), RemoteError> {
        let _guard = self.lock.lock().await;
        self.write(&[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(id: &str) -> ClientIdentity {
        ClientIdentity::new(id).expect("identity")
    }

    #[tokio::test]
    async fn in_memory_store_scopes_tasks_by_owner() {
        let store = InMemoryTaskStore::new();
        store.create(&owner("ada"), "write notes").await.unwrap();
        store.create(&owner("bob"), "fix bike").await.unwrap();

        let tasks = store.list(&owner("ada")).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].value, "write notes");

        store.clear(&owner("ada")).await.unwrap();
        assert!(store.list(&owner("ada")).await.unwrap().is_empty());
        assert_eq!(store.list(&owner("bob")).await.unwrap().len(), 1);
        assert_eq!(store.calls().await, 6);
    }

    #[tokio::test]
    async fn json_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileTaskStore::in_dir(dir.path());
        let me = owner("me");

        let first = store.create(&me, "buy milk").await.unwrap();
        store.create(&me, "call mom").await.unwrap();
        let done = store
            .update(&me, &first.id, &TaskPatch::complete())
            .await
            .unwrap();
        assert!(done.completed);

        let reopened = JsonFileTaskStore::in_dir(dir.path());
        let tasks = reopened.list(&me).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].completed);
        assert_eq!(tasks[1].value, "call mom");

        reopened.clear(&me).await.unwrap();
        assert!(store.list(&me).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn json_store_reports_missing_tasks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileTaskStore::in_dir(dir.path());
        let err = store
            .update(&owner("me"), "nope", &TaskPatch::complete())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Store(_)));
    }

    #[tokio::test]
    async fn json_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileTaskStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not a list").expect("write");

        let err = store.list(&owner("me")).await.unwrap_err();
        match err {
            RemoteError::Store(message) => {
                assert!(message.starts_with("corrupt task file"));
                assert!(message.contains("tasks.json"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
