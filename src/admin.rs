use chrono::Utc;
use futures::{future, Future};
use serde_json::json;
use tracing::{info, warn};

use crate::error::Error;
use crate::post::Post;
use crate::query::Query;
use crate::store::{self, BoxFuture, Store};
use crate::user::{Actor, Profile, UserId, PROFILES};

use std::collections::HashMap;

/// One line of the moderation table.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardRow {
    pub post: Post,
    pub author_is_admin: bool,
}

#[derive(Clone)]
pub struct AdminService<S> {
    store: S,
}

impl<S: Store> AdminService<S> {
    pub fn new(store: S) -> Self {
        AdminService { store }
    }

    pub fn list_profiles(&self) -> BoxFuture<Vec<Profile>> {
        store::fetch(&self.store, &Query::table(PROFILES).order("user_id", true))
    }

    /// Grants or revokes admin rights. The caller must be an admin; the
    /// backend's row policies have the final say.
    pub fn set_admin(
        &self,
        actor: Option<&Actor>,
        target: &UserId,
        is_admin: bool,
    ) -> BoxFuture<Profile> {
        let actor = match actor {
            Some(actor) => actor,
            None => {
                return Box::new(future::err(Error::AuthenticationRequired(
                    "Must be logged in to update user roles",
                )))
            }
        };
        if !actor.is_admin {
            warn!(user = %actor.user_id, target = %target, "role change refused: not an admin");
            return Box::new(future::err(Error::NotPermitted));
        }

        info!(user = %actor.user_id, target = %target, is_admin, "updating user role");
        let patch = json!({
            "is_admin": is_admin,
            "updated_at": Utc::now().to_rfc3339(),
        });
        let missing = target.clone();
        Box::new(
            self.store
                .update(&Query::table(PROFILES).eq("user_id", target.as_str()), patch)
                .and_then(move |rows| match rows.into_iter().next() {
                    Some(row) => store::decode_row::<Profile>(row),
                    None => Err(Error::NotFound(format!("profile for {}", missing))),
                }),
        )
    }
}

/// Pairs each post with its author's admin flag.
pub fn dashboard_rows(posts: Vec<Post>, profiles: &[Profile]) -> Vec<DashboardRow> {
    let admins: HashMap<&UserId, bool> = profiles
        .iter()
        .map(|profile| (&profile.user_id, profile.is_admin))
        .collect();
    posts
        .into_iter()
        .map(|post| {
            let author_is_admin = admins.get(&post.user_id).cloned().unwrap_or(false);
            DashboardRow { post, author_is_admin }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::post::PostId;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            PROFILES,
            vec![
                json!({"user_id": "root", "is_admin": true, "name": "Root"}),
                json!({"user_id": "writer", "is_admin": false, "name": "Writer"}),
            ],
        );
        store
    }

    fn admin() -> Actor {
        Actor {
            user_id: UserId::new("root"),
            is_admin: true,
        }
    }

    #[test]
    fn admin_can_promote() {
        let store = seeded();
        let profile = AdminService::new(store.clone())
            .set_admin(Some(&admin()), &UserId::new("writer"), true)
            .wait()
            .unwrap();
        assert!(profile.is_admin);
        assert!(profile.updated_at.is_some());
    }

    #[test]
    fn members_and_anonymous_are_refused() {
        let store = seeded();
        let admins = AdminService::new(store.clone());

        let err = admins.set_admin(None, &UserId::new("writer"), true).wait().unwrap_err();
        assert!(err.requires_login());

        let member = Actor::member(UserId::new("writer"));
        match admins.set_admin(Some(&member), &UserId::new("writer"), true).wait() {
            Err(Error::NotPermitted) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(store.mutation_count(), 0);
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let store = seeded();
        let admins = AdminService::new(store);
        match admins.set_admin(Some(&admin()), &UserId::new("ghost"), true).wait() {
            Err(Error::NotFound(what)) => assert_eq!(what, "profile for ghost"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn dashboard_marks_admin_authors() {
        let store = seeded();
        let profiles = AdminService::new(store).list_profiles().wait().unwrap();
        assert_eq!(profiles.len(), 2);

        let post = |id: &str, author: &str| Post {
            id: PostId::new(id),
            title: id.to_string(),
            content: String::new(),
            author_name: None,
            place: None,
            image_url: None,
            video_url: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            user_id: UserId::new(author),
        };
        let posts = vec![post("1", "root"), post("2", "writer"), post("3", "ghost")];
        let rows = dashboard_rows(posts, &profiles);
        let flags: Vec<bool> = rows.iter().map(|row| row.author_is_admin).collect();
        assert_eq!(flags, vec![true, false, false]);
    }
}
