use chrono::{DateTime, Utc};
use futures::{future, Future};
use serde::{Deserialize, Serialize};

use crate::query::Query;
use crate::store::{self, BoxFuture, Store};

use std::fmt;

pub const PROFILES: &str = "user_profiles";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(#[serde(with = "string_or_number")] String);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct User {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// Row of the `user_profiles` table, keyed by user id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: UserId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The signed-in user as far as edit permissions are concerned.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl UserId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Actor {
    pub fn member(user_id: UserId) -> Self {
        Actor {
            user_id,
            is_admin: false,
        }
    }

    /// Owners and admins may edit. The backend enforces the same rule; this
    /// only saves a round trip that would be refused anyway.
    pub fn can_edit(&self, owner: &UserId) -> bool {
        self.is_admin || &self.user_id == owner
    }
}

pub fn get_profile<S: Store>(store: &S, user_id: &UserId) -> BoxFuture<Option<Profile>> {
    store::fetch_one(store, Query::table(PROFILES).eq("user_id", user_id.as_str()))
}

/// Looks up the admin flag for the signed-in user. A user without a profile
/// row is an ordinary member.
pub fn resolve_actor<S: Store>(store: &S, user_id: Option<UserId>) -> BoxFuture<Option<Actor>> {
    let user_id = match user_id {
        Some(user_id) => user_id,
        None => return Box::new(future::ok(None)),
    };
    Box::new(get_profile(store, &user_id).map(move |profile| {
        Some(Actor {
            is_admin: profile.map_or(false, |profile| profile.is_admin),
            user_id,
        })
    }))
}

/// Ids are text on our side; the backend may hand them out as numbers.
pub(crate) mod string_or_number {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => Ok(text),
            Raw::Number(number) => Ok(number.to_string()),
        }
    }

    pub fn serialize<S>(id: &str, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(id)
    }
}
