pub mod feed;
pub mod posts;
pub mod vote_engine;

pub use feed::{FeedCursor, FeedPage, FeedPaginator};
pub use posts::{text_snippet, PostInput, PostService};
pub use vote_engine::{VoteEngine, VotePolicy};
