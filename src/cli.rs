use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::config::{Config, ConfigError};
use crate::dashboard::Dashboard;
use crate::models::{ForumPost, Note, Task, TaskPriority, TaskStatus};
use crate::store::StoreError;
use crate::sync::{ForumSort, TaskFilter};
use crate::utils::{parse_optional_date, today};

#[derive(Parser)]
#[command(name = "deskboard")]
#[command(about = "Notes, tasks and a discussion forum")]
#[command(version)]
pub struct Cli {
    /// Custom config file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Use development mode (uses separate dev config/database)
    #[arg(long)]
    pub dev: bool,

    /// Act as this user id instead of the configured identity
    #[arg(short, long)]
    pub user: Option<String>,

    /// Send outcome notifications to the log instead of the terminal
    #[arg(short, long)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Counters and recent activity (default if no subcommand)
    Dashboard {
        /// Number of recent events to show
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Personal notes
    #[command(subcommand)]
    Notes(NoteCommand),
    /// Personal tasks
    #[command(subcommand)]
    Tasks(TaskCommand),
    /// Discussion forum
    #[command(subcommand)]
    Forum(ForumCommand),
}

#[derive(Subcommand)]
pub enum NoteCommand {
    /// List notes, most recently updated first
    List {
        /// Only notes whose title or content contains this text
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a note
    Add {
        title: String,
        #[arg(long, default_value = "")]
        content: String,
    },
    /// Change a note's title and/or content
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        content: Option<String>,
    },
    /// Delete a note
    Rm { id: String },
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List tasks, newest first
    List {
        #[arg(long)]
        search: Option<String>,
        /// todo, in-progress or completed
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    /// Create a task
    Add {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// low, medium or high
        #[arg(long, default_value = "medium")]
        priority: TaskPriority,
        /// Due date (YYYY-MM-DD)
        #[arg(long, default_value = "")]
        due: String,
    },
    /// Move a task to another status
    Status { id: String, status: TaskStatus },
    /// Delete a task
    Rm { id: String },
}

#[derive(Subcommand)]
pub enum ForumCommand {
    /// List posts
    List {
        /// newest, popular or commented
        #[arg(long)]
        sort: Option<ForumSort>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Show a post with its comments
    Show { id: String },
    /// Start a discussion
    Post {
        title: String,
        #[arg(long)]
        content: String,
        /// Defaults to the configured author name
        #[arg(long)]
        author: Option<String>,
    },
    /// Like a post
    Like { id: String },
    /// Reply to a post
    Comment {
        post_id: String,
        content: String,
        #[arg(long)]
        author: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Failed to parse date: {0}")]
    DateParseError(String),
    #[error("Not signed in; pass --user or set `identity` in the config file")]
    NotSignedIn,
    #[error("No author name; pass --author or set `author_name` in the config file")]
    MissingAuthor,
    #[error("{0} not found")]
    NotFound(String),
    #[error("Could not {0}")]
    Unchanged(&'static str),
}

/// Dispatch one command against the dashboard
pub async fn run(command: Commands, dashboard: &Dashboard, config: &Config) -> Result<(), CliError> {
    match command {
        Commands::Dashboard { limit } => {
            handle_dashboard(limit.unwrap_or(config.recent_activity_limit), dashboard).await
        }
        Commands::Notes(command) => handle_notes(command, dashboard).await,
        Commands::Tasks(command) => handle_tasks(command, dashboard).await,
        Commands::Forum(command) => handle_forum(command, dashboard, config).await,
    }
}

fn require_signed_in(dashboard: &Dashboard) -> Result<(), CliError> {
    dashboard.identity().map(|_| ()).ok_or(CliError::NotSignedIn)
}

/// Handle the dashboard command
pub async fn handle_dashboard(limit: usize, dashboard: &Dashboard) -> Result<(), CliError> {
    dashboard.mount().await;

    let stats = dashboard.stats(today());
    println!("Notes:           {}", stats.notes);
    println!("Open tasks:      {} ({} overdue)", stats.open_tasks, stats.overdue_tasks);
    println!("Completed tasks: {}", stats.completed_tasks);
    println!("Forum posts:     {}", stats.forum_posts);

    let activity = dashboard.recent_activity(limit);
    if !activity.is_empty() {
        println!();
        println!("Recent activity:");
        for event in activity {
            println!(
                "  {}  {}: {}",
                event.at.format("%Y-%m-%d %H:%M"),
                event.kind.label(),
                event.title
            );
        }
    }
    Ok(())
}

fn print_note(note: &Note) {
    println!(
        "{}  {}  (updated {})",
        note.id,
        note.title,
        note.updated_at.format("%Y-%m-%d %H:%M")
    );
}

/// Handle the notes subcommands
pub async fn handle_notes(command: NoteCommand, dashboard: &Dashboard) -> Result<(), CliError> {
    let notes = &dashboard.notes;
    notes.list().await;

    match command {
        NoteCommand::List { search } => {
            for note in notes.search(search.as_deref().unwrap_or("")) {
                print_note(&note);
            }
        }
        NoteCommand::Add { title, content } => {
            require_signed_in(dashboard)?;
            let note = notes
                .create(&title, &content)
                .await
                .ok_or(CliError::Unchanged("create note"))?;
            println!("Note created successfully (ID: {})", note.id);
        }
        NoteCommand::Edit { id, title, content } => {
            require_signed_in(dashboard)?;
            let current = notes
                .mirror()
                .find(|n| n.id == id)
                .ok_or_else(|| CliError::NotFound(format!("Note {}", id)))?;
            let title = title.unwrap_or(current.title);
            let content = content.unwrap_or(current.content);
            notes
                .update(&id, &title, &content)
                .await
                .ok_or(CliError::Unchanged("update note"))?;
        }
        NoteCommand::Rm { id } => {
            require_signed_in(dashboard)?;
            if notes.mirror().find(|n| n.id == id).is_none() {
                return Err(CliError::NotFound(format!("Note {}", id)));
            }
            if !notes.delete(&id).await {
                return Err(CliError::Unchanged("delete note"));
            }
        }
    }
    Ok(())
}

fn print_task(task: &Task) {
    let due = task
        .due_date
        .map(|d| format!("  due {}", d))
        .unwrap_or_default();
    println!(
        "{}  [{}] {} ({}){}",
        task.id, task.status, task.title, task.priority, due
    );
}

fn find_task(dashboard: &Dashboard, id: &str) -> Result<Task, CliError> {
    dashboard
        .tasks
        .mirror()
        .find(|t| t.id == id)
        .ok_or_else(|| CliError::NotFound(format!("Task {}", id)))
}

/// Handle the tasks subcommands
pub async fn handle_tasks(command: TaskCommand, dashboard: &Dashboard) -> Result<(), CliError> {
    let tasks = &dashboard.tasks;
    tasks.list().await;

    match command {
        TaskCommand::List { search, status } => {
            let filter = TaskFilter {
                search: search.unwrap_or_default(),
                status,
            };
            for task in tasks.filtered(&filter) {
                print_task(&task);
            }
        }
        TaskCommand::Add {
            title,
            description,
            priority,
            due,
        } => {
            require_signed_in(dashboard)?;
            let due_date = parse_optional_date(&due).map_err(|e| {
                CliError::DateParseError(format!("Invalid date format '{}': {}", due, e))
            })?;
            let task = tasks
                .create(&title, &description, priority, due_date)
                .await
                .ok_or(CliError::Unchanged("create task"))?;
            println!("Task created successfully (ID: {})", task.id);
        }
        TaskCommand::Status { id, status } => {
            require_signed_in(dashboard)?;
            find_task(dashboard, &id)?;
            let task = tasks
                .update_status(&id, status)
                .await
                .ok_or(CliError::Unchanged("update task status"))?;
            print_task(&task);
        }
        TaskCommand::Rm { id } => {
            require_signed_in(dashboard)?;
            find_task(dashboard, &id)?;
            if !tasks.delete(&id).await {
                return Err(CliError::Unchanged("delete task"));
            }
        }
    }
    Ok(())
}

fn print_post(post: &ForumPost) {
    println!(
        "{}  {}  by {}  ({} likes, {} comments)",
        post.id,
        post.title,
        post.author_name,
        post.likes,
        post.comments.len()
    );
}

fn author_or_default(author: Option<String>, config: &Config) -> Result<String, CliError> {
    author
        .filter(|a| !a.trim().is_empty())
        .or_else(|| config.display_name().map(str::to_string))
        .ok_or(CliError::MissingAuthor)
}

/// Handle the forum subcommands
pub async fn handle_forum(
    command: ForumCommand,
    dashboard: &Dashboard,
    config: &Config,
) -> Result<(), CliError> {
    let forum = &dashboard.forum;
    forum.list().await;

    match command {
        ForumCommand::List { sort, search } => {
            let sort = sort.unwrap_or(config.forum_sort);
            for post in forum.browse(search.as_deref().unwrap_or(""), sort) {
                print_post(&post);
            }
            let stats = forum.stats();
            println!(
                "{} posts, {} likes, {} comments, {} active authors",
                stats.posts, stats.likes, stats.comments, stats.active_authors
            );
        }
        ForumCommand::Show { id } => {
            let post = forum
                .mirror()
                .find(|p| p.id == id)
                .ok_or_else(|| CliError::NotFound(format!("Post {}", id)))?;
            print_post(&post);
            println!();
            println!("{}", post.content);
            for comment in &post.comments {
                println!();
                println!(
                    "  {} ({}):",
                    comment.author_name,
                    comment.created_at.format("%Y-%m-%d %H:%M")
                );
                println!("  {}", comment.content);
            }
        }
        ForumCommand::Post {
            title,
            content,
            author,
        } => {
            require_signed_in(dashboard)?;
            let author = author_or_default(author, config)?;
            let post = forum
                .create(&title, &content, &author)
                .await
                .ok_or(CliError::Unchanged("create post"))?;
            println!("Post created successfully (ID: {})", post.id);
        }
        ForumCommand::Like { id } => {
            require_signed_in(dashboard)?;
            if forum.mirror().find(|p| p.id == id).is_none() {
                return Err(CliError::NotFound(format!("Post {}", id)));
            }
            let likes = forum
                .like(&id)
                .await
                .ok_or(CliError::Unchanged("like post"))?;
            println!("Post {} now has {} likes", id, likes);
        }
        ForumCommand::Comment {
            post_id,
            content,
            author,
        } => {
            require_signed_in(dashboard)?;
            let author = author_or_default(author, config)?;
            forum
                .comment(&post_id, &content, &author)
                .await
                .ok_or(CliError::Unchanged("add comment"))?;
        }
    }
    Ok(())
}
