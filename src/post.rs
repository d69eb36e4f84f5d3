use chrono::{DateTime, Utc};
use futures::{future, Future};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::query::Query;
use crate::storage::{Bucket, ObjectStorage, Upload};
use crate::store::{self, BoxFuture, Store};
use crate::user::{string_or_number, Actor, UserId};

use std::collections::BTreeSet;
use std::fmt;

pub const POSTS: &str = "posts";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct PostId(#[serde(with = "string_or_number")] String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub place: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default, deserialize_with = "nullable_tags")]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub user_id: UserId,
}

/// The editable part of a post.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub author_name: Option<String>,
    pub place: Option<String>,
    pub tags: Vec<String>,
}

/// Media picked alongside a draft. Each present file is uploaded before the
/// post row is written.
#[derive(Debug, Clone, Default)]
pub struct PostFiles {
    pub image: Option<Upload>,
    pub video: Option<Upload>,
}

#[derive(Serialize)]
struct PostRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<PostId>,
    title: String,
    content: String,
    author_name: Option<String>,
    place: Option<String>,
    image_url: Option<String>,
    video_url: Option<String>,
    tags: Vec<String>,
    user_id: UserId,
}

impl PostId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        PostId(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Post {
    pub fn draft(&self) -> PostDraft {
        PostDraft {
            title: self.title.clone(),
            content: self.content.clone(),
            author_name: self.author_name.clone(),
            place: self.place.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Case-insensitive match against title, content, author and place.
    pub fn matches(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        let fields = [
            Some(&self.title),
            Some(&self.content),
            self.author_name.as_ref(),
            self.place.as_ref(),
        ];
        fields
            .iter()
            .filter_map(|field| *field)
            .any(|field| field.to_lowercase().contains(&term))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

/// Search box and category selection applied to an already loaded list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub term: Option<String>,
    pub tag: Option<String>,
}

impl PostFilter {
    pub fn apply<'a>(&self, posts: &'a [Post]) -> Vec<&'a Post> {
        posts
            .iter()
            .filter(|post| self.term.as_ref().map_or(true, |term| post.matches(term)))
            .filter(|post| self.tag.as_ref().map_or(true, |tag| post.has_tag(tag)))
            .collect()
    }
}

/// Distinct tags across `posts`, sorted.
pub fn categories(posts: &[Post]) -> Vec<String> {
    posts
        .iter()
        .flat_map(|post| post.tags.iter())
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Clone)]
pub struct PostService<S, O> {
    store: S,
    storage: O,
}

impl<S: Store, O: ObjectStorage> PostService<S, O> {
    pub fn new(store: S, storage: O) -> Self {
        PostService { store, storage }
    }

    /// All posts, newest first, with media references resolved to URLs.
    pub fn fetch_posts(&self) -> BoxFuture<Vec<Post>> {
        let storage = self.storage.clone();
        let query = Query::table(POSTS).order("created_at", false);
        Box::new(
            store::fetch::<S, Post>(&self.store, &query)
                .map(move |posts| {
                    posts
                        .into_iter()
                        .map(|post| resolve_media(&storage, post))
                        .collect()
                }),
        )
    }

    pub fn get_post(&self, id: &PostId) -> BoxFuture<Post> {
        let storage = self.storage.clone();
        let missing = id.clone();
        let query = Query::table(POSTS).eq("id", id.as_str());
        Box::new(store::fetch_one::<S, Post>(&self.store, query).and_then(move |post| match post {
            Some(post) => Ok(resolve_media(&storage, post)),
            None => Err(Error::NotFound(format!("post {}", missing))),
        }))
    }

    pub fn create_post(
        &self,
        author: Option<UserId>,
        draft: PostDraft,
        files: PostFiles,
    ) -> BoxFuture<Post> {
        let author = match author {
            Some(author) => author,
            None => {
                return Box::new(future::err(Error::AuthenticationRequired(
                    "Must be logged in",
                )))
            }
        };
        let row = PostRow {
            id: None,
            title: draft.title,
            content: draft.content,
            author_name: draft.author_name,
            place: draft.place,
            image_url: None,
            video_url: None,
            tags: draft.tags,
            user_id: author,
        };
        self.write(row, files)
    }

    /// Rewrites an existing post. Ownership stays with the original author
    /// even when an admin makes the edit.
    pub fn update_post(
        &self,
        actor: Option<&Actor>,
        post: &Post,
        draft: PostDraft,
        files: PostFiles,
    ) -> BoxFuture<Post> {
        if let Err(err) = check_can_edit(actor, post) {
            return Box::new(future::err(err));
        }
        let row = PostRow {
            id: Some(post.id.clone()),
            title: draft.title,
            content: draft.content,
            author_name: draft.author_name,
            place: draft.place,
            image_url: post.image_url.clone(),
            video_url: post.video_url.clone(),
            tags: draft.tags,
            user_id: post.user_id.clone(),
        };
        self.write(row, files)
    }

    pub fn delete_post(&self, actor: Option<&Actor>, post: &Post) -> BoxFuture<()> {
        if let Err(err) = check_can_edit(actor, post) {
            return Box::new(future::err(err));
        }
        info!(post = %post.id, "deleting post");
        self.store.delete(&Query::table(POSTS).eq("id", post.id.as_str()))
    }

    fn write(&self, mut row: PostRow, files: PostFiles) -> BoxFuture<Post> {
        let store = self.store.clone();
        let storage = self.storage.clone();
        let saved = upload_media(&self.storage, files)
            .and_then(move |(image, video)| {
                if image.is_some() {
                    row.image_url = image;
                }
                if video.is_some() {
                    row.video_url = video;
                }
                store::encode_row(&row)
            })
            .and_then(move |row| store.upsert(POSTS, row, &["id"]))
            .and_then(store::decode_row::<Post>)
            .map(move |post| resolve_media(&storage, post));
        Box::new(saved)
    }
}

fn check_can_edit(actor: Option<&Actor>, post: &Post) -> Result<(), Error> {
    match actor {
        None => Err(Error::AuthenticationRequired("Must be logged in")),
        Some(actor) if actor.can_edit(&post.user_id) => Ok(()),
        Some(actor) => {
            warn!(post = %post.id, user = %actor.user_id, "edit refused: not owner or admin");
            Err(Error::NotPermitted)
        }
    }
}

fn upload_media<O: ObjectStorage>(
    storage: &O,
    files: PostFiles,
) -> BoxFuture<(Option<String>, Option<String>)> {
    let PostFiles { image, video } = files;
    let videos = storage.clone();
    Box::new(
        upload_one(storage, Bucket::Images, image).and_then(move |image| {
            upload_one(&videos, Bucket::Videos, video).map(move |video| (image, video))
        }),
    )
}

fn upload_one<O: ObjectStorage>(
    storage: &O,
    bucket: Bucket,
    upload: Option<Upload>,
) -> BoxFuture<Option<String>> {
    match upload {
        Some(upload) => {
            info!(bucket = %bucket, file = %upload.file_name, "uploading media");
            Box::new(storage.upload(bucket, upload).map(|object| Some(object.path)))
        }
        None => Box::new(future::ok(None)),
    }
}

fn resolve_media<O: ObjectStorage>(storage: &O, mut post: Post) -> Post {
    post.image_url = post
        .image_url
        .filter(|url| !url.is_empty())
        .map(|url| storage.resolve(Bucket::Images, &url));
    post.video_url = post
        .video_url
        .filter(|url| !url.is_empty())
        .map(|url| storage.resolve(Bucket::Videos, &url));
    post
}

fn nullable_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
