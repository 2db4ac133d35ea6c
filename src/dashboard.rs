//! Overview page: counters and a recent-activity feed computed from the three mirrors.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::TaskStatus;
use crate::session::Identity;
use crate::sync::{ForumStats, ForumSync, NotesSync, SyncContext, TasksSync};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashboardStats {
    pub notes: usize,
    pub open_tasks: usize,
    /// Open tasks whose due date is before today
    pub overdue_tasks: usize,
    pub completed_tasks: usize,
    pub forum_posts: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityKind {
    NoteCreated,
    NoteUpdated,
    TaskCreated,
    TaskCompleted,
    PostCreated,
}

impl ActivityKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActivityKind::NoteCreated => "Note created",
            ActivityKind::NoteUpdated => "Note updated",
            ActivityKind::TaskCreated => "Task created",
            ActivityKind::TaskCompleted => "Task completed",
            ActivityKind::PostCreated => "Forum post created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub kind: ActivityKind,
    pub title: String,
    pub at: DateTime<Utc>,
}

/// All three hooks, sharing one set of collaborators
pub struct Dashboard {
    pub notes: NotesSync,
    pub tasks: TasksSync,
    pub forum: ForumSync,
    ctx: SyncContext,
}

impl Dashboard {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            notes: NotesSync::new(ctx.clone()),
            tasks: TasksSync::new(ctx.clone()),
            forum: ForumSync::new(ctx.clone()),
            ctx,
        }
    }

    pub fn identity(&self) -> Option<Identity> {
        self.ctx.identity()
    }

    /// Initial load of every mirror, one after the other
    pub async fn mount(&self) {
        self.notes.list().await;
        self.tasks.list().await;
        self.forum.list().await;
    }

    /// Personal collections follow the session; the forum does not depend on it
    pub async fn refresh_on_identity_change(&self) {
        self.notes.refresh_on_identity_change().await;
        self.tasks.refresh_on_identity_change().await;
    }

    pub fn dispose(&self) {
        self.notes.dispose();
        self.tasks.dispose();
        self.forum.dispose();
    }

    pub fn stats(&self, today: NaiveDate) -> DashboardStats {
        let tasks = self.tasks.tasks();
        DashboardStats {
            notes: self.notes.mirror().len(),
            open_tasks: tasks.iter().filter(|t| t.status.is_open()).count(),
            overdue_tasks: tasks
                .iter()
                .filter(|t| t.status.is_open() && t.due_date.is_some_and(|due| due < today))
                .count(),
            completed_tasks: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Completed)
                .count(),
            forum_posts: self.forum.mirror().len(),
        }
    }

    pub fn forum_stats(&self) -> ForumStats {
        self.forum.stats()
    }

    /// Latest event per record across notes, tasks and posts, newest first
    pub fn recent_activity(&self, limit: usize) -> Vec<Activity> {
        let notes = self.notes.notes().into_iter().map(|note| {
            if note.updated_at > note.created_at {
                Activity {
                    kind: ActivityKind::NoteUpdated,
                    title: note.title,
                    at: note.updated_at,
                }
            } else {
                Activity {
                    kind: ActivityKind::NoteCreated,
                    title: note.title,
                    at: note.created_at,
                }
            }
        });

        let tasks = self.tasks.tasks().into_iter().map(|task| {
            if task.status == TaskStatus::Completed {
                Activity {
                    kind: ActivityKind::TaskCompleted,
                    title: task.title,
                    at: task.updated_at,
                }
            } else {
                Activity {
                    kind: ActivityKind::TaskCreated,
                    title: task.title,
                    at: task.created_at,
                }
            }
        });

        let posts = self.forum.posts().into_iter().map(|post| Activity {
            kind: ActivityKind::PostCreated,
            title: post.title,
            at: post.created_at,
        });

        let mut feed: Vec<Activity> = notes.chain(tasks).chain(posts).collect();
        feed.sort_by(|a, b| b.at.cmp(&a.at));
        feed.truncate(limit);
        feed
    }
}
