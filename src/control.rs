use futures::{future, Future};
use tracing::debug;

use crate::error::Error;
use crate::post::PostId;
use crate::session::{SessionEvent, SessionHub, Subscription};
use crate::store::{BoxFuture, Store};
use crate::vote::{VoteDirection, VoteReducer, VoteState, VoteTally};

use std::sync::{Arc, Mutex, PoisonError};

/// What the up/down buttons render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteView {
    pub count: u64,
    pub up_active: bool,
    pub down_active: bool,
    pub busy: bool,
}

#[derive(Default)]
struct ControlState {
    tally: VoteTally,
    busy: bool,
}

/// Up/down vote buttons for one post.
///
/// Reads the signed-in user from the session hub at click time. Only one
/// click is processed at a time; a click while another is in flight fails
/// with `Error::Busy` and sends nothing. Signing out clears the highlighted
/// vote immediately.
pub struct VoteControl<S> {
    reducer: VoteReducer<S>,
    session: SessionHub,
    post_id: PostId,
    state: Arc<Mutex<ControlState>>,
    _subscription: Subscription,
}

impl<S: Store> VoteControl<S> {
    pub fn new(reducer: VoteReducer<S>, session: SessionHub, post_id: PostId) -> Self {
        let state = Arc::new(Mutex::new(ControlState::default()));
        let watched = state.clone();
        let subscription = session.subscribe(move |event| {
            if let SessionEvent::SignedOut = event {
                lock(&watched).tally.user_vote = VoteState::NoVote;
            }
        });
        VoteControl {
            reducer,
            session,
            post_id,
            state,
            _subscription: subscription,
        }
    }

    pub fn tally(&self) -> VoteTally {
        lock(&self.state).tally
    }

    pub fn view(&self) -> VoteView {
        let state = lock(&self.state);
        VoteView {
            count: state.tally.count,
            up_active: state.tally.user_vote == VoteState::Up,
            down_active: state.tally.user_vote == VoteState::Down,
            busy: state.busy,
        }
    }

    /// Reloads the count and the user's vote.
    pub fn load(&self) -> BoxFuture<VoteTally> {
        let state = self.state.clone();
        let user_id = self.session.user_id();
        Box::new(
            self.reducer
                .load_tally(&self.post_id, user_id.as_ref())
                .map(move |tally| {
                    lock(&state).tally = tally;
                    tally
                }),
        )
    }

    /// Casts `direction` for the signed-in user, then reloads. An
    /// `AuthenticationRequired` error means the caller should send the user
    /// to sign in.
    pub fn click(&self, direction: VoteDirection) -> BoxFuture<VoteTally> {
        let user_id = match self.session.user_id() {
            Some(user_id) => user_id,
            None => {
                return Box::new(future::err(Error::AuthenticationRequired(
                    "Must be logged in to vote",
                )))
            }
        };

        let busy = match BusyGuard::acquire(&self.state) {
            Some(busy) => busy,
            None => {
                debug!(post = %self.post_id, "vote ignored: previous vote in flight");
                return Box::new(future::err(Error::Busy));
            }
        };

        let reducer = self.reducer.clone();
        let post_id = self.post_id.clone();
        let state = self.state.clone();
        let tally = self
            .reducer
            .cast_vote(&self.post_id, Some(&user_id), direction)
            .and_then(move |_| reducer.load_tally(&post_id, Some(&user_id)))
            .then(move |result| {
                if let Ok(tally) = &result {
                    lock(&state).tally = *tally;
                }
                drop(busy);
                result
            });
        Box::new(tally)
    }
}

/// Marks the control busy for as long as it lives. The click future owns
/// it, so dropping an unfinished click frees the control too.
struct BusyGuard {
    state: Arc<Mutex<ControlState>>,
}

impl BusyGuard {
    fn acquire(state: &Arc<Mutex<ControlState>>) -> Option<BusyGuard> {
        let mut locked = lock(state);
        if locked.busy {
            return None;
        }
        locked.busy = true;
        Some(BusyGuard {
            state: state.clone(),
        })
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        lock(&self.state).busy = false;
    }
}

fn lock(state: &Mutex<ControlState>) -> std::sync::MutexGuard<ControlState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
