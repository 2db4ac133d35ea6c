pub mod cli;
pub mod config;
pub mod dashboard;
pub mod models;
pub mod notify;
pub mod session;
pub mod store;
pub mod sync;
pub mod utils;

pub use config::Config;
pub use dashboard::Dashboard;
pub use models::{Comment, ForumPost, Note, Task, TaskPriority, TaskStatus};
pub use notify::{ConsoleNotifier, NotificationLog, Notifier, TracingNotifier};
pub use session::{Identity, Session, SessionProvider};
pub use store::{MemoryStore, RemoteStore, SqliteStore};
pub use sync::SyncContext;
pub use utils::Profile;
