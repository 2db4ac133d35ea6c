use serde::Serialize;

use super::{matches_search, owned_by, Mirror, Phase, SyncContext};
use crate::models::{from_row, from_rows, Note};
use crate::store::{encode_row, timestamp_now, Collection, Filter, OrderBy, StoreError};

#[derive(Serialize)]
struct NewNote<'a> {
    user_id: &'a str,
    title: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct NotePatch<'a> {
    title: &'a str,
    content: &'a str,
    updated_at: String,
}

/// The signed-in user's notes, most recently updated first
pub struct NotesSync {
    ctx: SyncContext,
    mirror: Mirror<Note>,
}

impl NotesSync {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            mirror: Mirror::new("notes"),
        }
    }

    pub fn mirror(&self) -> &Mirror<Note> {
        &self.mirror
    }

    pub fn notes(&self) -> Vec<Note> {
        self.mirror.items()
    }

    pub fn is_loading(&self) -> bool {
        self.mirror.is_loading()
    }

    pub fn dispose(&self) {
        self.mirror.dispose();
    }

    /// Notes whose title or content contains `term`
    pub fn search(&self, term: &str) -> Vec<Note> {
        self.notes()
            .into_iter()
            .filter(|note| matches_search(term, [note.title.as_str(), note.content.as_str()]))
            .collect()
    }

    /// Fetch every note of the current identity. Signed out, the mirror is emptied instead.
    pub async fn list(&self) {
        let Some(identity) = self.ctx.identity() else {
            self.mirror.clear();
            return;
        };
        // Another user's notes must not linger while this fetch is pending or if it fails
        if self.mirror.fetched_for().is_some_and(|held| held != identity) {
            self.mirror.clear();
        }
        if !self.mirror.begin_load() {
            return;
        }

        let result: Result<Vec<Note>, StoreError> = async {
            let rows = self
                .ctx
                .store()
                .select(
                    Collection::Notes,
                    &[Filter::eq("user_id", identity.as_str())],
                    Some(OrderBy::desc("updated_at")),
                )
                .await?;
            from_rows(rows)
        }
        .await;

        match result {
            Ok(notes) if self.ctx.identity().as_ref() == Some(&identity) => {
                tracing::debug!(count = notes.len(), "loaded notes");
                self.mirror.finish_load(Some((Some(identity), notes)));
            }
            Ok(_) => {
                tracing::debug!("identity changed during note fetch, discarding");
                self.mirror.finish_load(None);
            }
            Err(err) => {
                if self.mirror.finish_load(None) {
                    self.ctx.fail(&self.mirror, "Notes could not be loaded.", &err);
                }
            }
        }
    }

    /// Re-fetch when the session identity differs from the one the mirror holds.
    /// Returns whether a refresh happened.
    pub async fn refresh_on_identity_change(&self) -> bool {
        if self.mirror.phase() != Phase::Idle
            && self.ctx.identity() == self.mirror.fetched_for()
        {
            return false;
        }
        self.list().await;
        true
    }

    pub async fn create(&self, title: &str, content: &str) -> Option<Note> {
        let identity = self.ctx.require_identity("create note")?;

        let result: Result<Note, StoreError> = async {
            let row = encode_row(&NewNote {
                user_id: identity.as_str(),
                title,
                content,
            })?;
            from_row(self.ctx.store().insert(Collection::Notes, row).await?)
        }
        .await;

        match result {
            Ok(note) => {
                self.mirror.apply(|notes| notes.insert(0, note.clone()))?;
                self.ctx.succeed("Note created.");
                Some(note)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Note could not be created.", &err);
                None
            }
        }
    }

    /// Replace title and content; the note keeps its position in the mirror
    pub async fn update(&self, id: &str, title: &str, content: &str) -> Option<Note> {
        let identity = self.ctx.require_identity("update note")?;

        let result: Result<Note, StoreError> = async {
            let patch = encode_row(&NotePatch {
                title,
                content,
                updated_at: timestamp_now(),
            })?;
            from_row(
                self.ctx
                    .store()
                    .update(Collection::Notes, id, &owned_by(&identity), patch)
                    .await?,
            )
        }
        .await;

        match result {
            Ok(note) => {
                self.mirror.apply(|notes| {
                    if let Some(slot) = notes.iter_mut().find(|n| n.id == id) {
                        *slot = note.clone();
                    }
                })?;
                self.ctx.succeed("Note updated.");
                Some(note)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Note could not be updated.", &err);
                None
            }
        }
    }

    pub async fn delete(&self, id: &str) -> bool {
        let Some(identity) = self.ctx.require_identity("delete note") else {
            return false;
        };

        match self
            .ctx
            .store()
            .delete(Collection::Notes, id, &owned_by(&identity))
            .await
        {
            Ok(()) => {
                if self.mirror.apply(|notes| notes.retain(|n| n.id != id)).is_none() {
                    return false;
                }
                self.ctx.succeed("Note deleted.");
                true
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Note could not be deleted.", &err);
                false
            }
        }
    }
}
