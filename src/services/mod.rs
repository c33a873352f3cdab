pub mod candidates;
pub mod catalog;
pub mod likes;
pub mod matching;
pub mod mutual_match;
pub mod notifications;
pub mod retry;

pub use candidates::CandidateRanker;
pub use likes::LikeService;
pub use matching::MatchService;
pub use notifications::{Notifier, NotifierHandle};
pub use retry::RetryPolicy;
