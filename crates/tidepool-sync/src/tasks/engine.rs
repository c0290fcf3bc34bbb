//! Task reconciliation engine.
//!
//! Local collection kept in step with a [`TaskStore`]. Mutations other than
//! [`TaskEngine::edit`] wait for the store and then apply the store's returned
//! value, so after each successful call the local view matches the store.
//! Each task carries a tiny state machine (`Idle -> Pending(op) -> Idle`);
//! a second operation on a task that is already pending is rejected.

use parking_lot::Mutex;
use thiserror::Error;
use tidepool_core::{ClientIdentity, Task, TaskPatch};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::store::TaskStore;
use crate::remote::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOp {
    Commit,
    Complete,
    Delete,
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(String),
    #[error("task {id} already has a pending {op:?}")]
    Busy { id: String, op: TaskOp },
    #[error("task {0} is already completed")]
    Completed(String),
    #[error("a clear is in flight")]
    ClearInFlight,
    #[error("a refresh is in flight")]
    RefreshInFlight,
    #[error("{0} task operation(s) still in flight")]
    PendingOperations(usize),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Nothing received from the store yet.
    Loading,
    Ready,
    Failed(String),
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSnapshot {
    pub status: LoadStatus,
    /// Insertion order.
    pub tasks: Vec<Task>,
}

impl TaskSnapshot {
    /// Open tasks, newest first.
    pub fn active(&self) -> Vec<&Task> {
        self.tasks.iter().rev().filter(|task| !task.completed).collect()
    }

    /// Finished tasks, newest first.
    pub fn completed(&self) -> Vec<&Task> {
        self.tasks.iter().rev().filter(|task| task.completed).collect()
    }
}

#[derive(Debug)]
struct Entry {
    task: Task,
    pending: Option<TaskOp>,
}

#[derive(Debug)]
struct TaskBook {
    entries: Vec<Entry>,
    status: LoadStatus,
    creating: usize,
    clearing: bool,
    refreshing: bool,
}

impl TaskBook {
    fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|entry| entry.task.id == id)
    }

    fn entry_mut(&mut self, id: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|entry| entry.task.id == id)
    }

    /// Whole-collection operations exclude everything else.
    fn ensure_quiet(&self) -> Result<(), TaskError> {
        if self.clearing {
            return Err(TaskError::ClearInFlight);
        }
        if self.refreshing {
            return Err(TaskError::RefreshInFlight);
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.creating + self.entries.iter().filter(|e| e.pending.is_some()).count()
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            status: self.status.clone(),
            tasks: self.entries.iter().map(|entry| entry.task.clone()).collect(),
        }
    }
}

pub struct TaskEngine<S: TaskStore> {
    owner: ClientIdentity,
    store: S,
    book: Mutex<TaskBook>,
    updates: watch::Sender<TaskSnapshot>,
}

impl<S: TaskStore> TaskEngine<S> {
    pub fn new(owner: ClientIdentity, store: S) -> Self {
        let book = TaskBook {
            entries: Vec::new(),
            status: LoadStatus::Loading,
            creating: 0,
            clearing: false,
            refreshing: false,
        };
        let (updates, _) = watch::channel(book.snapshot());
        Self {
            owner,
            store,
            book: Mutex::new(book),
            updates,
        }
    }

    pub fn owner(&self) -> &ClientIdentity {
        &self.owner
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        self.book.lock().snapshot()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.snapshot().tasks
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskSnapshot> {
        self.updates.subscribe()
    }

    pub fn pending(&self, id: &str) -> Option<TaskOp> {
        self.book.lock().entry(id).and_then(|entry| entry.pending)
    }

    /// Replaces the local collection with the store's list.
    /// Writes are rejected until the list arrives.
    pub async fn refresh(&self) -> Result<(), TaskError> {
        {
            let mut book = self.book.lock();
            book.ensure_quiet()?;
            let in_flight = book.in_flight();
            if in_flight > 0 {
                return Err(TaskError::PendingOperations(in_flight));
            }
            book.refreshing = true;
        }
        let _refreshing = RefreshGuard { book: &self.book };

        match self.store.list(&self.owner).await {
            Ok(tasks) => {
                let mut book = self.book.lock();
                book.entries = tasks
                    .into_iter()
                    .map(|task| Entry {
                        task,
                        pending: None,
                    })
                    .collect();
                book.status = LoadStatus::Ready;
                debug!(target = "tidepool::tasks", count = book.entries.len(), "task list refreshed");
                self.publish(&book);
                Ok(())
            }
            Err(err) => {
                warn!(target = "tidepool::tasks", error = %err, "failed to load tasks");
                let mut book = self.book.lock();
                book.status = LoadStatus::Failed(err.to_string());
                self.publish(&book);
                Err(err.into())
            }
        }
    }

    /// Creates a task from `body`; blank bodies are ignored without a store call.
    pub async fn create(&self, body: &str) -> Result<Option<Task>, TaskError> {
        let value = body.trim();
        if value.is_empty() {
            return Ok(None);
        }

        {
            let mut book = self.book.lock();
            book.ensure_quiet()?;
            book.creating += 1;
        }
        let _creating = CreateGuard { book: &self.book };

        let task = self.store.create(&self.owner, value).await?;
        let mut book = self.book.lock();
        book.entries.push(Entry {
            task: task.clone(),
            pending: None,
        });
        debug!(target = "tidepool::tasks", task_id = %task.id, "task created");
        self.publish(&book);
        Ok(Some(task))
    }

    /// Local-only edit buffer; the store is not touched until [`Self::commit`].
    pub fn edit(&self, id: &str, value: &str) -> Result<(), TaskError> {
        let mut book = self.book.lock();
        book.ensure_quiet()?;
        let entry = book
            .entry_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if let Some(op) = entry.pending {
            return Err(TaskError::Busy {
                id: id.to_string(),
                op,
            });
        }
        if entry.task.completed {
            return Err(TaskError::Completed(id.to_string()));
        }
        entry.task.value = value.to_string();
        self.publish(&book);
        Ok(())
    }

    /// Sends the edited value to the store and adopts the stored task.
    pub async fn commit(&self, id: &str, value: &str) -> Result<Task, TaskError> {
        let _pending = self.begin(id, TaskOp::Commit, |entry| {
            if entry.task.completed {
                return Err(TaskError::Completed(entry.task.id.clone()));
            }
            entry.task.value = value.to_string();
            Ok(())
        })?;

        // On failure the edited value stays in the local buffer.
        let task = self
            .store
            .update(&self.owner, id, &TaskPatch::value(value))
            .await?;
        Ok(self.replace(id, task))
    }

    pub async fn complete(&self, id: &str) -> Result<Task, TaskError> {
        let _pending = self.begin(id, TaskOp::Complete, |entry| {
            if entry.task.completed {
                return Err(TaskError::Completed(entry.task.id.clone()));
            }
            Ok(())
        })?;

        let task = self
            .store
            .update(&self.owner, id, &TaskPatch::complete())
            .await?;
        Ok(self.replace(id, task))
    }

    /// Returns `false` when the task is not (or no longer) in the collection.
    pub async fn delete(&self, id: &str) -> Result<bool, TaskError> {
        let _pending = match self.begin(id, TaskOp::Delete, |_| Ok(())) {
            Ok(pending) => pending,
            Err(TaskError::NotFound(_)) => return Ok(false),
            Err(err) => return Err(err),
        };

        self.store.delete(&self.owner, id).await?;
        let mut book = self.book.lock();
        book.entries.retain(|entry| entry.task.id != id);
        debug!(target = "tidepool::tasks", task_id = %id, "task deleted");
        self.publish(&book);
        Ok(true)
    }

    /// Clears every task once the store confirms.
    pub async fn clear_all(&self) -> Result<(), TaskError> {
        {
            let mut book = self.book.lock();
            book.ensure_quiet()?;
            let in_flight = book.in_flight();
            if in_flight > 0 {
                return Err(TaskError::PendingOperations(in_flight));
            }
            book.clearing = true;
        }
        let _clearing = ClearGuard { book: &self.book };

        self.store.clear(&self.owner).await?;
        let mut book = self.book.lock();
        book.entries.clear();
        debug!(target = "tidepool::tasks", "task list cleared");
        self.publish(&book);
        Ok(())
    }

    fn begin<F>(&self, id: &str, op: TaskOp, check: F) -> Result<PendingGuard<'_>, TaskError>
    where
        F: FnOnce(&mut Entry) -> Result<(), TaskError>,
    {
        let mut book = self.book.lock();
        book.ensure_quiet()?;
        let entry = book
            .entry_mut(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if let Some(current) = entry.pending {
            return Err(TaskError::Busy {
                id: id.to_string(),
                op: current,
            });
        }
        check(entry)?;
        entry.pending = Some(op);
        self.publish(&book);
        Ok(PendingGuard {
            book: &self.book,
            id: id.to_string(),
        })
    }

    fn replace(&self, id: &str, task: Task) -> Task {
        let mut book = self.book.lock();
        match book.entry_mut(id) {
            Some(entry) => entry.task = task.clone(),
            None => {
                warn!(target = "tidepool::tasks", task_id = %id, "store answered for a task no longer held locally");
            }
        }
        self.publish(&book);
        task
    }

    fn publish(&self, book: &TaskBook) {
        self.updates.send_replace(book.snapshot());
    }
}

// Guards release the in-flight markers on every exit path, including
// errors and dropped futures.
struct PendingGuard<'a> {
    book: &'a Mutex<TaskBook>,
    id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(entry) = self.book.lock().entry_mut(&self.id) {
            entry.pending = None;
        }
    }
}

struct CreateGuard<'a> {
    book: &'a Mutex<TaskBook>,
}

impl Drop for CreateGuard<'_> {
    fn drop(&mut self) {
        let mut book = self.book.lock();
        book.creating = book.creating.saturating_sub(1);
    }
}

struct ClearGuard<'a> {
    book: &'a Mutex<TaskBook>,
}

impl Drop for ClearGuard<'_> {
    fn drop(&mut self) {
        self.book.lock().clearing = false;
    }
}

struct RefreshGuard<'a> {
    book: &'a Mutex<TaskBook>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.book.lock().refreshing = false;
    }
}
