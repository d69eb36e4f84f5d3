//! Post voting.
//!
//! Each (post, user) pair has at most one row in the `votes` table, holding
//! `+1` or `-1`. A missing row means the user has not voted; zero is never
//! stored. Casting the same direction twice retracts the vote, casting the
//! opposite direction flips it:
//!
//! ```text
//! NoVote --up--> Up      Up --up--> NoVote     Down --down--> NoVote
//! NoVote --down--> Down  Up --down--> Down     Down --up--> Up
//! ```

use futures::{future, Future};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::post::PostId;
use crate::query::Query;
use crate::store::{self, BoxFuture, Store};
use crate::user::UserId;

use std::convert::TryFrom;

pub const VOTES: &str = "votes";

const VOTE_KEY: [&str; 2] = ["post_id", "user_id"];

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(into = "i16", try_from = "i16")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn value(self) -> i16 {
        match self {
            VoteDirection::Up => 1,
            VoteDirection::Down => -1,
        }
    }
}

impl From<VoteDirection> for i16 {
    fn from(direction: VoteDirection) -> i16 {
        direction.value()
    }
}

impl TryFrom<i16> for VoteDirection {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self, Error> {
        match value {
            1 => Ok(VoteDirection::Up),
            -1 => Ok(VoteDirection::Down),
            other => Err(Error::InvalidVote(other)),
        }
    }
}

/// A user's standing vote on one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteState {
    NoVote,
    Up,
    Down,
}

impl Default for VoteState {
    fn default() -> Self {
        VoteState::NoVote
    }
}

impl VoteState {
    /// The state after the user clicks `direction`.
    pub fn apply(self, direction: VoteDirection) -> VoteState {
        match (self, direction) {
            (VoteState::Up, VoteDirection::Up) | (VoteState::Down, VoteDirection::Down) => {
                VoteState::NoVote
            }
            (_, VoteDirection::Up) => VoteState::Up,
            (_, VoteDirection::Down) => VoteState::Down,
        }
    }

    pub fn direction(self) -> Option<VoteDirection> {
        match self {
            VoteState::NoVote => None,
            VoteState::Up => Some(VoteDirection::Up),
            VoteState::Down => Some(VoteDirection::Down),
        }
    }
}

impl From<VoteDirection> for VoteState {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteState::Up,
            VoteDirection::Down => VoteState::Down,
        }
    }
}

impl From<Option<VoteDirection>> for VoteState {
    fn from(direction: Option<VoteDirection>) -> Self {
        direction.map_or(VoteState::NoVote, VoteState::from)
    }
}

/// Row of the `votes` table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Vote {
    pub post_id: PostId,
    pub user_id: UserId,
    pub vote_type: VoteDirection,
}

#[derive(Deserialize)]
struct VoteValue {
    vote_type: i16,
}

/// What a vote control shows for one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    /// Magnitude of the net score. Equal numbers of net upvotes and net
    /// downvotes display the same; see `net` for the signed value.
    pub count: u64,
    pub net: i64,
    pub user_vote: VoteState,
}

#[derive(Clone)]
pub struct VoteReducer<S> {
    store: S,
}

impl<S: Store> VoteReducer<S> {
    pub fn new(store: S) -> Self {
        VoteReducer { store }
    }

    /// Signed sum of every vote on the post.
    pub fn load_net(&self, post_id: &PostId) -> BoxFuture<i64> {
        let query = Query::table(VOTES).select("vote_type").eq("post_id", post_id.as_str());
        Box::new(
            store::fetch::<S, VoteValue>(&self.store, &query)
                .map(|votes| votes.iter().map(|vote| i64::from(vote.vote_type)).sum()),
        )
    }

    /// Display count: the absolute value of the net score.
    pub fn load_aggregate(&self, post_id: &PostId) -> BoxFuture<u64> {
        Box::new(self.load_net(post_id).map(|net| net.unsigned_abs()))
    }

    /// The user's current vote. Without a user this is `NoVote` and the
    /// store is not consulted.
    pub fn load_user_vote(
        &self,
        post_id: &PostId,
        user_id: Option<&UserId>,
    ) -> BoxFuture<VoteState> {
        let user_id = match user_id {
            Some(user_id) => user_id,
            None => return Box::new(future::ok(VoteState::NoVote)),
        };
        let query = Query::table(VOTES)
            .select("vote_type")
            .eq("post_id", post_id.as_str())
            .eq("user_id", user_id.as_str());
        Box::new(
            store::fetch_one::<S, VoteValue>(&self.store, query).and_then(|vote| match vote {
                Some(vote) => VoteDirection::try_from(vote.vote_type).map(VoteState::from),
                None => Ok(VoteState::NoVote),
            }),
        )
    }

    pub fn load_tally(&self, post_id: &PostId, user_id: Option<&UserId>) -> BoxFuture<VoteTally> {
        let user_vote = self.load_user_vote(post_id, user_id);
        Box::new(self.load_net(post_id).and_then(move |net| {
            user_vote.map(move |user_vote| VoteTally {
                count: net.unsigned_abs(),
                net,
                user_vote,
            })
        }))
    }

    /// Applies one click. Returns the user's new state; the aggregate is not
    /// recomputed, call `load_tally` for that.
    ///
    /// A single upsert or delete is issued after reading the current row.
    /// Store failures are passed through untouched.
    pub fn cast_vote(
        &self,
        post_id: &PostId,
        user_id: Option<&UserId>,
        direction: VoteDirection,
    ) -> BoxFuture<VoteState> {
        let user_id = match user_id {
            Some(user_id) => user_id.clone(),
            None => {
                warn!(post = %post_id, "vote rejected: no session");
                return Box::new(future::err(Error::AuthenticationRequired(
                    "Must be logged in to vote",
                )));
            }
        };

        let store = self.store.clone();
        let post_id = post_id.clone();
        let current = self.load_user_vote(&post_id, Some(&user_id));
        Box::new(current.and_then(move |current| {
            let next = current.apply(direction);
            debug!(post = %post_id, user = %user_id, ?current, ?next, "casting vote");
            let write: BoxFuture<()> = match next.direction() {
                None => {
                    let query = Query::table(VOTES)
                        .eq("post_id", post_id.as_str())
                        .eq("user_id", user_id.as_str());
                    store.delete(&query)
                }
                Some(direction) => {
                    let vote = Vote {
                        post_id,
                        user_id,
                        vote_type: direction,
                    };
                    match store::encode_row(&vote) {
                        Ok(row) => Box::new(store.upsert(VOTES, row, &VOTE_KEY).map(|_| ())),
                        Err(err) => Box::new(future::err(err)),
                    }
                }
            };
            write.map(move |_| next)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorBody;
    use crate::memory::{MemoryStore, Operation};
    use serde_json::json;

    const ALL: [VoteState; 3] = [VoteState::NoVote, VoteState::Up, VoteState::Down];

    fn fixture() -> (VoteReducer<MemoryStore>, MemoryStore, PostId, UserId) {
        let store = MemoryStore::new();
        (VoteReducer::new(store.clone()), store, PostId::new("post-1"), UserId::new("user-1"))
    }

    fn stored_values(store: &MemoryStore) -> Vec<i64> {
        store
            .rows(VOTES)
            .iter()
            .filter_map(|row| row["vote_type"].as_i64())
            .collect()
    }

    #[test]
    fn transitions() {
        use crate::vote::VoteDirection::{Down, Up};
        assert_eq!(VoteState::NoVote.apply(Up), VoteState::Up);
        assert_eq!(VoteState::NoVote.apply(Down), VoteState::Down);
        assert_eq!(VoteState::Up.apply(Up), VoteState::NoVote);
        assert_eq!(VoteState::Up.apply(Down), VoteState::Down);
        assert_eq!(VoteState::Down.apply(Down), VoteState::NoVote);
        assert_eq!(VoteState::Down.apply(Up), VoteState::Up);
    }

    #[test]
    fn same_direction_twice_is_identity() {
        for state in ALL.iter() {
            for direction in [VoteDirection::Up, VoteDirection::Down].iter() {
                let twice = state.apply(*direction).apply(*direction);
                if *state == VoteState::from(Some(*direction)) {
                    // retracted, then recast
                    assert_eq!(twice, *state);
                } else {
                    assert_eq!(twice, VoteState::NoVote);
                }
            }
        }
    }

    #[test]
    fn vote_values_round_through_serde() {
        assert_eq!(serde_json::to_value(VoteDirection::Down).unwrap(), json!(-1));
        assert!(serde_json::from_value::<VoteDirection>(json!(0)).is_err());
        match VoteDirection::try_from(2) {
            Err(Error::InvalidVote(2)) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn upvote_twice_returns_to_no_vote() {
        let (votes, store, post, user) = fixture();
        let cast = |direction| votes.cast_vote(&post, Some(&user), direction).wait().unwrap();
        assert_eq!(cast(VoteDirection::Up), VoteState::Up);
        assert_eq!(cast(VoteDirection::Up), VoteState::NoVote);
        assert_eq!(votes.load_user_vote(&post, Some(&user)).wait().unwrap(), VoteState::NoVote);
        assert!(store.rows(VOTES).is_empty());
    }

    #[test]
    fn single_cast_is_reported_back() {
        for direction in [VoteDirection::Up, VoteDirection::Down].iter() {
            let (votes, _, post, user) = fixture();
            votes.cast_vote(&post, Some(&user), *direction).wait().unwrap();
            let state = votes.load_user_vote(&post, Some(&user)).wait().unwrap();
            assert_eq!(state.direction(), Some(*direction));
        }
    }

    #[test]
    fn flip_overwrites_instead_of_accumulating() {
        let (votes, store, post, user) = fixture();
        votes.cast_vote(&post, Some(&user), VoteDirection::Up).wait().unwrap();
        votes.cast_vote(&post, Some(&user), VoteDirection::Down).wait().unwrap();
        assert_eq!(stored_values(&store), vec![-1]);
        assert_eq!(votes.load_user_vote(&post, Some(&user)).wait().unwrap(), VoteState::Down);
        assert_eq!(votes.load_net(&post).wait().unwrap(), -1);
    }

    #[test]
    fn aggregate_is_absolute_net() {
        let (votes, store, post, _) = fixture();
        store.seed(
            VOTES,
            vec![
                json!({"post_id": "post-1", "user_id": "a", "vote_type": 1}),
                json!({"post_id": "post-1", "user_id": "b", "vote_type": 1}),
                json!({"post_id": "post-1", "user_id": "c", "vote_type": -1}),
                json!({"post_id": "post-2", "user_id": "a", "vote_type": -1}),
            ],
        );
        assert_eq!(votes.load_aggregate(&post).wait().unwrap(), 1);

        let other = PostId::new("post-2");
        assert_eq!(votes.load_aggregate(&other).wait().unwrap(), 1);
        assert_eq!(votes.load_net(&other).wait().unwrap(), -1);
    }

    #[test]
    fn anonymous_user_vote_skips_user_query() {
        let (votes, store, post, _) = fixture();
        assert_eq!(votes.load_user_vote(&post, None).wait().unwrap(), VoteState::NoVote);

        let tally = votes.load_tally(&post, None).wait().unwrap();
        assert_eq!(tally.user_vote, VoteState::NoVote);

        let keyed_by_user = store.operations().iter().any(|op| match op {
            Operation::Select(query) => query.filters_on("user_id"),
            _ => false,
        });
        assert!(!keyed_by_user);
    }

    #[test]
    fn anonymous_cast_is_rejected_without_mutation() {
        let (votes, store, post, _) = fixture();
        let err = votes.cast_vote(&post, None, VoteDirection::Up).wait().unwrap_err();
        assert!(err.requires_login());
        assert_eq!(err.to_string(), "Must be logged in to vote");
        assert_eq!(store.mutation_count(), 0);
        assert!(store.operations().is_empty());
    }

    #[test]
    fn count_goes_zero_one_zero() {
        let (votes, _, post, user) = fixture();
        assert_eq!(votes.load_aggregate(&post).wait().unwrap(), 0);
        votes.cast_vote(&post, Some(&user), VoteDirection::Up).wait().unwrap();
        assert_eq!(votes.load_aggregate(&post).wait().unwrap(), 1);
        votes.cast_vote(&post, Some(&user), VoteDirection::Up).wait().unwrap();
        assert_eq!(votes.load_aggregate(&post).wait().unwrap(), 0);
    }

    #[test]
    fn store_failure_passes_through() {
        let (votes, store, post, user) = fixture();
        store.fail_next(ErrorBody::new(503, "database unavailable"));
        match votes.cast_vote(&post, Some(&user), VoteDirection::Down).wait() {
            Err(Error::Response(body)) => {
                assert_eq!(body.status, 503);
                assert_eq!(body.message, "database unavailable");
            }
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(store.mutation_count(), 0);
        assert!(store.rows(VOTES).is_empty());
    }

    #[test]
    fn votes_of_other_users_are_untouched() {
        let (votes, store, post, user) = fixture();
        let other = UserId::new("user-2");
        votes.cast_vote(&post, Some(&other), VoteDirection::Up).wait().unwrap();
        votes.cast_vote(&post, Some(&user), VoteDirection::Up).wait().unwrap();
        votes.cast_vote(&post, Some(&user), VoteDirection::Up).wait().unwrap();

        let tally = votes.load_tally(&post, Some(&other)).wait().unwrap();
        assert_eq!(
            tally,
            VoteTally {
                count: 1,
                net: 1,
                user_vote: VoteState::Up,
            }
        );
        assert_eq!(store.rows(VOTES).len(), 1);
    }

    #[test]
    fn numeric_post_ids_flip_in_place() {
        let (votes, store, _, user) = fixture();
        store.seed(VOTES, vec![json!({"post_id": 7, "user_id": "user-1", "vote_type": 1})]);
        let post = PostId::new("7");

        assert_eq!(votes.load_user_vote(&post, Some(&user)).wait().unwrap(), VoteState::Up);
        votes.cast_vote(&post, Some(&user), VoteDirection::Down).wait().unwrap();

        assert_eq!(stored_values(&store), vec![-1]);
        assert_eq!(votes.load_net(&post).wait().unwrap(), -1);
    }

    #[test]
    fn state_from_direction() {
        assert_eq!(VoteState::from(VoteDirection::Up), VoteState::Up);
        assert_eq!(VoteState::from(Some(VoteDirection::Down)), VoteState::Down);
        assert_eq!(VoteState::from(None::<VoteDirection>), VoteState::NoVote);
    }
}
