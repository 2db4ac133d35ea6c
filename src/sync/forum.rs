use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use super::{matches_search, Mirror, SyncContext};
use crate::models::{from_row, from_rows, Comment, ForumPost};
use crate::store::{encode_row, Collection, OrderBy, StoreError};

/// Display order for the post list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForumSort {
    /// Most recently created first
    #[default]
    Newest,
    /// Most likes first
    Popular,
    /// Most comments first
    Commented,
}

impl ForumSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForumSort::Newest => "newest",
            ForumSort::Popular => "popular",
            ForumSort::Commented => "commented",
        }
    }
}

impl fmt::Display for ForumSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ForumSort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "newest" => Ok(ForumSort::Newest),
            "popular" => Ok(ForumSort::Popular),
            "commented" => Ok(ForumSort::Commented),
            other => Err(format!("Unknown forum sort: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForumStats {
    pub posts: usize,
    pub likes: u64,
    pub comments: usize,
    /// Distinct author names across posts
    pub active_authors: usize,
}

impl ForumStats {
    pub fn from_posts(posts: &[ForumPost]) -> Self {
        Self {
            posts: posts.len(),
            likes: posts.iter().map(|p| p.likes).sum(),
            comments: posts.iter().map(|p| p.comments.len()).sum(),
            active_authors: posts
                .iter()
                .map(|p| p.author_name.as_str())
                .collect::<HashSet<_>>()
                .len(),
        }
    }
}

#[derive(Serialize)]
struct NewPost<'a> {
    user_id: &'a str,
    title: &'a str,
    content: &'a str,
    author_name: &'a str,
    likes: u64,
}

#[derive(Serialize)]
struct LikePatch {
    likes: u64,
}

#[derive(Serialize)]
struct NewComment<'a> {
    post_id: &'a str,
    user_id: &'a str,
    content: &'a str,
    author_name: &'a str,
}

/// Attach each comment to its post, keeping the comments' order.
/// Comments whose post is not in `posts` are dropped.
fn join_comments(mut posts: Vec<ForumPost>, comments: Vec<Comment>) -> Vec<ForumPost> {
    let mut by_post: HashMap<String, Vec<Comment>> = HashMap::new();
    for comment in comments {
        by_post.entry(comment.post_id.clone()).or_default().push(comment);
    }
    for post in &mut posts {
        post.comments = by_post.remove(&post.id).unwrap_or_default();
    }
    posts
}

/// Stable sort, so equal keys keep their fetch order
pub fn sort_posts(mut posts: Vec<ForumPost>, sort: ForumSort) -> Vec<ForumPost> {
    match sort {
        ForumSort::Newest => posts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        ForumSort::Popular => posts.sort_by(|a, b| b.likes.cmp(&a.likes)),
        ForumSort::Commented => posts.sort_by(|a, b| b.comments.len().cmp(&a.comments.len())),
    }
    posts
}

/// Public discussion board: posts with their comment threads joined in
pub struct ForumSync {
    ctx: SyncContext,
    mirror: Mirror<ForumPost>,
}

impl ForumSync {
    pub fn new(ctx: SyncContext) -> Self {
        Self {
            ctx,
            mirror: Mirror::new("forum"),
        }
    }

    pub fn mirror(&self) -> &Mirror<ForumPost> {
        &self.mirror
    }

    /// Posts in fetch order (newest first)
    pub fn posts(&self) -> Vec<ForumPost> {
        self.mirror.items()
    }

    pub fn is_loading(&self) -> bool {
        self.mirror.is_loading()
    }

    pub fn dispose(&self) {
        self.mirror.dispose();
    }

    pub fn sorted(&self, sort: ForumSort) -> Vec<ForumPost> {
        sort_posts(self.posts(), sort)
    }

    /// Posts matching `term` in title or content, in the given order
    pub fn browse(&self, term: &str, sort: ForumSort) -> Vec<ForumPost> {
        let matching = self
            .posts()
            .into_iter()
            .filter(|post| matches_search(term, [post.title.as_str(), post.content.as_str()]))
            .collect();
        sort_posts(matching, sort)
    }

    pub fn stats(&self) -> ForumStats {
        ForumStats::from_posts(&self.posts())
    }

    /// Fetch posts and comments and join them. Either fetch failing fails the whole load.
    pub async fn list(&self) {
        if !self.mirror.begin_load() {
            return;
        }

        let result: Result<Vec<ForumPost>, StoreError> = async {
            let store = self.ctx.store();
            let posts: Vec<ForumPost> = from_rows(
                store
                    .select(Collection::ForumPosts, &[], Some(OrderBy::desc("created_at")))
                    .await?,
            )?;
            let comments: Vec<Comment> = from_rows(
                store
                    .select(Collection::ForumComments, &[], Some(OrderBy::asc("created_at")))
                    .await?,
            )?;
            Ok(join_comments(posts, comments))
        }
        .await;

        match result {
            Ok(posts) => {
                tracing::debug!(count = posts.len(), "loaded forum posts");
                self.mirror.finish_load(Some((self.ctx.identity(), posts)));
            }
            Err(err) => {
                if self.mirror.finish_load(None) {
                    self.ctx.fail(&self.mirror, "Forum posts could not be loaded.", &err);
                }
            }
        }
    }

    pub async fn create(&self, title: &str, content: &str, author_name: &str) -> Option<ForumPost> {
        let identity = self.ctx.require_identity("create post")?;

        let result: Result<ForumPost, StoreError> = async {
            let row = encode_row(&NewPost {
                user_id: identity.as_str(),
                title,
                content,
                author_name,
                likes: 0,
            })?;
            from_row(self.ctx.store().insert(Collection::ForumPosts, row).await?)
        }
        .await;

        match result {
            Ok(post) => {
                self.mirror.apply(|posts| posts.insert(0, post.clone()))?;
                self.ctx.succeed("Post created.");
                Some(post)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Post could not be created.", &err);
                None
            }
        }
    }

    /// Send the mirrored count plus one, then adopt whatever count the store returns.
    ///
    /// Two likes issued before either response arrives both read the same base
    /// count and store the same value; the last response wins.
    pub async fn like(&self, post_id: &str) -> Option<u64> {
        self.ctx.require_identity("like post")?;
        let Some(current) = self.mirror.find(|p| p.id == post_id) else {
            tracing::debug!(post_id, "like for a post not in the mirror, ignoring");
            return None;
        };

        let result: Result<ForumPost, StoreError> = async {
            let patch = encode_row(&LikePatch {
                likes: current.likes + 1,
            })?;
            from_row(self.ctx.store().update(Collection::ForumPosts, post_id, &[], patch).await?)
        }
        .await;

        match result {
            Ok(stored) => {
                let likes = stored.likes;
                self.mirror.apply(|posts| {
                    if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
                        post.likes = likes;
                    }
                })?;
                Some(likes)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Post could not be liked.", &err);
                None
            }
        }
    }

    /// Append a comment to a post's thread
    pub async fn comment(&self, post_id: &str, content: &str, author_name: &str) -> Option<Comment> {
        let identity = self.ctx.require_identity("add comment")?;

        let result: Result<Comment, StoreError> = async {
            let row = encode_row(&NewComment {
                post_id,
                user_id: identity.as_str(),
                content,
                author_name,
            })?;
            from_row(self.ctx.store().insert(Collection::ForumComments, row).await?)
        }
        .await;

        match result {
            Ok(comment) => {
                self.mirror.apply(|posts| {
                    if let Some(post) = posts.iter_mut().find(|p| p.id == post_id) {
                        post.comments.push(comment.clone());
                    }
                })?;
                self.ctx.succeed("Comment added.");
                Some(comment)
            }
            Err(err) => {
                self.ctx.fail(&self.mirror, "Comment could not be added.", &err);
                None
            }
        }
    }
}
