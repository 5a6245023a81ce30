// Live subscription feeds: ordered lists kept fresh by push deliveries.
//
// Every feed follows the same pattern (see `live.rs`): subscribe, replace
// the list wholesale on each delivery, report errors once and stop.
// Cancel with `unsubscribe()` or by dropping the feed.

pub mod comments;
pub mod live;
pub mod notifications;
pub mod posts;

pub use comments::CommentFeed;
pub use live::{ErrorHandler, LiveView};
pub use notifications::NotificationFeed;
pub use posts::{PostFeed, DEFAULT_PAGE_SIZE};
