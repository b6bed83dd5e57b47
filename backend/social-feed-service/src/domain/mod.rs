pub mod models;

pub use models::{
    NewPost, Post, User, Vote, VoteDirection, VoteKey, VoteOutcome, VoteTransition,
};
