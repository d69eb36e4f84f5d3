pub mod admin;
pub mod auth;
pub mod client;
pub mod comment;
pub mod config;
pub mod control;
pub mod error;
pub mod memory;
pub mod post;
pub mod query;
pub mod rest;
pub mod session;
pub mod share;
pub mod storage;
pub mod store;
pub mod user;
pub mod vote;

pub use crate::client::Client;
pub use crate::config::Config;
pub use crate::control::{VoteControl, VoteView};
pub use crate::error::{Error, ErrorBody};
pub use crate::session::{Session, SessionEvent, SessionHub};
pub use crate::store::{BoxFuture, Store};
pub use crate::vote::{VoteDirection, VoteReducer, VoteState, VoteTally};
