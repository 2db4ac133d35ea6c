//! Entity synchronization
//!
//! Each hook owns one in-memory mirror of a remote collection and keeps it
//! consistent with the outcome of every remote call: on success the returned
//! rows are merged in, on failure the user is notified once and the mirror
//! is left untouched. Errors never reach the caller.

pub mod forum;
pub mod notes;
pub mod tasks;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::notify::{Notification, Notifier};
use crate::session::{Identity, SessionProvider};
use crate::store::{Filter, RemoteStore, StoreError};

pub use forum::{ForumSort, ForumStats, ForumSync};
pub use notes::NotesSync;
pub use tasks::{TaskFilter, TasksSync};

/// Collaborators every hook is built from
#[derive(Clone)]
pub struct SyncContext {
    store: Arc<dyn RemoteStore>,
    session: Arc<dyn SessionProvider>,
    notifier: Arc<dyn Notifier>,
}

impl SyncContext {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        session: Arc<dyn SessionProvider>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            session,
            notifier,
        }
    }

    pub fn store(&self) -> &dyn RemoteStore {
        self.store.as_ref()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.current_identity()
    }

    /// Identity for a mutating call, or `None` when signed out
    fn require_identity(&self, action: &'static str) -> Option<Identity> {
        let identity = self.identity();
        if identity.is_none() {
            tracing::debug!(action, "no active identity, ignoring");
        }
        identity
    }

    fn succeed(&self, description: &str) {
        self.notifier.notify(Notification::success(description));
    }

    /// Log and report a failed remote call, unless the mirror was disposed meanwhile
    fn fail<T>(&self, mirror: &Mirror<T>, description: &str, err: &StoreError) {
        if mirror.is_disposed() {
            tracing::debug!(mirror = mirror.label, error = %err, "dropping failure for disposed mirror");
            return;
        }
        tracing::error!(mirror = mirror.label, error = %err, "{}", description);
        self.notifier.notify(Notification::failure(description));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Ready,
}

#[derive(Debug)]
struct MirrorState<T> {
    items: Vec<T>,
    phase: Phase,
    loads_in_flight: usize,
    fetched_for: Option<Identity>,
}

/// Ordered local copy of a remote collection
#[derive(Debug)]
pub struct Mirror<T> {
    label: &'static str,
    state: RwLock<MirrorState<T>>,
    disposed: AtomicBool,
}

impl<T> Mirror<T> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: RwLock::new(MirrorState {
                items: Vec::new(),
                phase: Phase::Idle,
                loads_in_flight: 0,
                fetched_for: None,
            }),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl<T: Clone> Mirror<T> {
    fn read(&self) -> RwLockReadGuard<'_, MirrorState<T>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, MirrorState<T>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the items in mirror order
    pub fn items(&self) -> Vec<T> {
        self.read().items.clone()
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().items.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.read().phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == Phase::Loading
    }

    /// Identity the current items were fetched for
    pub fn fetched_for(&self) -> Option<Identity> {
        self.read().fetched_for.clone()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.read().items.iter().find(|item| predicate(item)).cloned()
    }

    /// Stop applying responses. Requests already in flight complete but are ignored.
    /// Mark a fetch as started; returns `false` if the mirror is disposed
    fn begin_load(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut state = self.write();
        state.loads_in_flight += 1;
        state.phase = Phase::Loading;
        true
    }

    /// Complete a fetch started with `begin_load`. `loaded` replaces the items when present.
    /// Returns `false` if the response was discarded because the mirror is disposed.
    fn finish_load(&self, loaded: Option<(Option<Identity>, Vec<T>)>) -> bool {
        if self.is_disposed() {
            tracing::debug!(mirror = self.label, "discarding load for disposed mirror");
            return false;
        }
        let mut state = self.write();
        state.loads_in_flight = state.loads_in_flight.saturating_sub(1);
        if state.loads_in_flight == 0 {
            state.phase = Phase::Ready;
        }
        if let Some((identity, items)) = loaded {
            state.items = items;
            state.fetched_for = identity;
        }
        true
    }

    /// Empty the mirror without a fetch (no identity to fetch for)
    fn clear(&self) {
        if self.is_disposed() {
            return;
        }
        let mut state = self.write();
        state.items.clear();
        state.fetched_for = None;
        if state.loads_in_flight == 0 {
            state.phase = Phase::Ready;
        }
    }

    /// Apply a mutation result; `None` if the mirror is disposed
    fn apply<R>(&self, f: impl FnOnce(&mut Vec<T>) -> R) -> Option<R> {
        if self.is_disposed() {
            tracing::debug!(mirror = self.label, "discarding response for disposed mirror");
            return None;
        }
        Some(f(&mut self.write().items))
    }
}

/// Restricts an update or delete to rows the identity owns
fn owned_by(identity: &Identity) -> [Filter; 1] {
    [Filter::eq("user_id", identity.as_str())]
}

/// Case-insensitive substring match over any of the fields; a blank term matches everything
pub fn matches_search<'a>(term: &str, fields: impl IntoIterator<Item = &'a str>) -> bool {
    let term = term.trim().to_lowercase();
    if term.is_empty() {
        return true;
    }
    fields
        .into_iter()
        .any(|field| field.to_lowercase().contains(&term))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notify::NotificationLog;
    use crate::session::Session;
    use crate::store::MemoryStore;

    /// Hook collaborators with handles kept for assertions
    pub struct Harness {
        pub store: Arc<MemoryStore>,
        pub session: Session,
        pub log: NotificationLog,
        pub ctx: SyncContext,
    }

    impl Harness {
        pub fn signed_in(id: &str) -> Self {
            Self::with_session(Session::signed_in(id))
        }

        pub fn anonymous() -> Self {
            Self::with_session(Session::anonymous())
        }

        fn with_session(session: Session) -> Self {
            let store = Arc::new(MemoryStore::new());
            let log = NotificationLog::new();
            let ctx = SyncContext::new(store.clone(), Arc::new(session.clone()), Arc::new(log.clone()));
            Self {
                store,
                session,
                log,
                ctx,
            }
        }
    }

    pub fn row(value: serde_json::Value) -> crate::store::Row {
        crate::store::encode_row(&value).expect("fixture must be an object")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_is_case_insensitive_and_blank_matches_all() {
        assert!(matches_search("MEET", ["Weekly meeting", ""]));
        assert!(matches_search("  ", ["anything"]));
        assert!(!matches_search("budget", ["Weekly meeting", "agenda"]));
    }

    #[test]
    fn test_mirror_phases() {
        let mirror: Mirror<u32> = Mirror::new("numbers");
        assert_eq!(mirror.phase(), Phase::Idle);

        assert!(mirror.begin_load());
        assert!(mirror.begin_load());
        assert!(mirror.is_loading());

        assert!(mirror.finish_load(None));
        assert!(mirror.is_loading());
        assert!(mirror.finish_load(Some((None, vec![1, 2]))));
        assert_eq!(mirror.phase(), Phase::Ready);
        assert_eq!(mirror.items(), vec![1, 2]);
    }

    #[test]
    fn test_disposed_mirror_ignores_responses() {
        let mirror: Mirror<u32> = Mirror::new("numbers");
        mirror.begin_load();
        assert!(mirror.finish_load(Some((None, vec![1]))));
        mirror.dispose();

        assert!(mirror.apply(|items| items.push(2)).is_none());
        assert!(!mirror.finish_load(Some((None, vec![]))));
        assert!(!mirror.begin_load());
        assert_eq!(mirror.items(), vec![1]);
    }

    #[test]
    fn test_failure_reporting_works_for_any_item_type() {
        // Not `Clone`
        struct Opaque;
        let h = testing::Harness::signed_in("u1");
        let mirror: Mirror<Opaque> = Mirror::new("opaque");
        let err = StoreError::Rejected("offline".to_string());

        h.ctx.fail(&mirror, "Opaque could not be loaded.", &err);
        mirror.dispose();
        h.ctx.fail(&mirror, "Opaque could not be loaded.", &err);

        assert_eq!(h.log.failures(), 1);
        assert_eq!(
            h.log.last().map(|n| n.description),
            Some("Opaque could not be loaded.".to_string())
        );
    }
}
