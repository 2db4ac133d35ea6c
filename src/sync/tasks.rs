use chrono::NaiveDate;
use serde::Serialize;

use super::{matches_search, owned_by, Mirror, Phase, SyncContext};
use crate::models::{from_row, from_rows, Task, TaskPriority, TaskStatus};
use crate::store::{encode_row, timestamp_now, Collection, Filter, OrderBy, StoreError};

#[derive(Serialize)]
struct NewTask<'a> {
    user_id: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    due_date: Option<NaiveDate>,
}

#[derive(Serialize)]
struct StatusPatch {
    status: TaskStatus,
    updated_at: String,
}

/// Search term plus optional status restriction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub search: String,
    pub status: Option<TaskStatus>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        let status_ok = self.status.is_none_or(|status| task.status == status);
        status_ok
            && matches_search(
                &self.search,
                [task.title.as_str(), task.description.as_deref().unwrap_or("")],
            )
    }
}

/// The signed-in user's tasks, newest first
pub struct TasksSync {
    ctx: SyncContext,
    mirror: Mirror<Task>,
}

impl TasksSync {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            mirror: Mirror::new("tasks"),
        }
    }

    pub fn mirror(&self) -> &Mirror<Task> {
        &self.mirror
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.mirror.items()
    }

    pub fn is_loading(&self) -> bool {
        self.mirror.is_loading()
    }

    pub fn dispose(&self) {
        self.mirror.dispose();
    }

    pub fn filtered(&self, filter: &TaskFilter) -> Vec<Task> {
        self.tasks()
            .into_iter()
            .filter(|task| filter.matches(task))
            .collect()
    }

    pub async fn list(&self) {
        let Some(identity) = self.ctx.identity() else {
            self.mirror.clear();
            return;
        };
        if self.mirror.fetched_for().is_some_and(|held| held != identity) {
            self.mirror.clear();
        }
        if !self.mirror.begin_load() {
            return;
        }

        let result: Result<Vec<Task>, StoreError> = async {
            let rows = self
                .ctx
                .store()
                .select(
                    Collection::Tasks,
                    &[Filter::eq("user_id", identity.as_str())],
                    Some(OrderBy::desc("created_at")),
                )
                .await?;
            from_rows(rows)
        }
        .await;

        match result {
            Ok(tasks) if self.ctx.identity().as_ref() == Some(&identity) => {
                tracing::debug!(count = tasks.len(), "loaded tasks");
                self.mirror.finish_load(Some((Some(identity), tasks)));
            }
            Ok(_) => {
                tracing::debug!("identity changed during task fetch, discarding");
                self.mirror.finish_load(None);
            }
            Err(err) => {
                if self.mirror.finish_load(None) {
                    self.ctx.fail(&self.mirror, "Tasks could not be loaded.", &err);
                }
            }
        }
    }

    pub async fn refresh_on_identity_change(&self) -> bool {
        if self.mirror.phase() != Phase::Idle
            && self.ctx.identity() == self.mirror.fetched_for()
        {
            return false;
        }
        self.list().await;
        true
    }

    /// New tasks always start as `todo`; the store assigns the status.
    /// A blank description is stored as absent.
    pub async fn create(
        &self,
        title: &str,
        description: &str,
        priority: TaskPriority,
        due_date: Option<NaiveDate>,
    ) -> Option<Task> {
        let identity = self.ctx.require_identity("create task")?;
        if priority == TaskPriority::Unknown {
            tracing::warn!(title, "refusing to store an unknown task priority");
            return None;
        }

        let result: Result<Task, StoreError> = async {
            let row = encode_row(&NewTask {
                user_id: identity.as_str(),
                title,
                description: Some(description).filter(|d| !d.trim().is_empty()),
                priority,
                due_date,
            })?;
            from_row(self.ctx.store().insert(Collection::Tasks, row).await?)
        }
        .await;

        match result {
            Ok(task) => {
                self.mirror.apply(|tasks| tasks.insert(0, task.clone()))?;
                self.ctx.succeed("Task created.");
                Some(task)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Task could not be created.", &err);
                None
            }
        }
    }

    /// Move a task to another status. Success is silent; only failures notify.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Option<Task> {
        let identity = self.ctx.require_identity("update task status")?;
        if status == TaskStatus::Unknown {
            tracing::warn!(id, "refusing to store an unknown task status");
            return None;
        }

        let result: Result<Task, StoreError> = async {
            let patch = encode_row(&StatusPatch {
                status,
                updated_at: timestamp_now(),
            })?;
            from_row(
                self.ctx
                    .store()
                    .update(Collection::Tasks, id, &owned_by(&identity), patch)
                    .await?,
            )
        }
        .await;

        match result {
            Ok(task) => {
                self.mirror.apply(|tasks| {
                    if let Some(slot) = tasks.iter_mut().find(|t| t.id == id) {
                        *slot = task.clone();
                    }
                })?;
                tracing::debug!(id, status = %task.status, "task status updated");
                Some(task)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Task status could not be updated.", &err);
                None
            }
        }
    }

    pub async fn delete(&self, id: &str) -> bool {
        let Some(identity) = self.ctx.require_identity("delete task") else {
            return false;
        };

        match self
            .ctx
            .store()
            .delete(Collection::Tasks, id, &owned_by(&identity))
            .await
        {
            Ok(()) => {
                if self.mirror.apply(|tasks| tasks.retain(|t| t.id != id)).is_none() {
                    return false;
                }
                self.ctx.succeed("Task deleted.");
                true
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Task could not be deleted.", &err);
                false
            }
        }
    }
}
