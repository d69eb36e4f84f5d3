use chrono::{DateTime, Utc};
use futures::{future, Future};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::Error;
use crate::post::PostId;
use crate::query::Query;
use crate::store::{self, BoxFuture, Store};
use crate::user::{string_or_number, UserId};

use std::fmt;

pub const COMMENTS: &str = "comments";

// Embeds the author's profile through the user_id foreign key.
const WITH_AUTHOR: &str = "*,profiles:user_id(name,avatar_url)";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommentId(#[serde(with = "string_or_number")] String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct CommentAuthor {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: CommentId,
    pub post_id: PostId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "profiles")]
    pub author: Option<CommentAuthor>,
}

impl CommentId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Comment {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().and_then(|author| author.name.as_deref())
    }
}

/// Comments are append-only: there is no edit or delete.
#[derive(Clone)]
pub struct CommentService<S> {
    store: S,
}

impl<S: Store> CommentService<S> {
    pub fn new(store: S) -> Self {
        CommentService { store }
    }

    /// Comments on `post_id`, newest first.
    pub fn list(&self, post_id: &PostId) -> BoxFuture<Vec<Comment>> {
        let query = Query::table(COMMENTS)
            .select(WITH_AUTHOR)
            .eq("post_id", post_id.as_str())
            .order("created_at", false);
        store::fetch(&self.store, &query)
    }

    pub fn add(
        &self,
        author: Option<&UserId>,
        post_id: &PostId,
        content: &str,
    ) -> BoxFuture<Comment> {
        let author = match author {
            Some(author) => author,
            None => {
                return Box::new(future::err(Error::AuthenticationRequired(
                    "Must be logged in to comment",
                )))
            }
        };
        debug!(post = %post_id, user = %author, "adding comment");
        let row = json!({
            "post_id": post_id.as_str(),
            "user_id": author.as_str(),
            "content": content,
        });
        Box::new(
            self.store
                .insert(COMMENTS, row)
                .and_then(store::decode_row::<Comment>),
        )
    }
}
