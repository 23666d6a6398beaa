mod contents;
pub mod memory;
mod repository;
mod schema;
mod sources;
mod subscriptions;
mod types;
mod users;

pub use repository::{ContentRepository, SourceRepository, SubscriptionRepository, UserRepository};
pub use schema::Database;
pub use types::{
    Content, NewContent, NewSource, Source, SourceId, StorageError, SubscriberId, Subscription,
    SubscriptionSettings, User,
};
