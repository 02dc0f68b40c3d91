mod endpoints;
mod persist;
mod store;
mod subscriptions;
mod types;

pub use persist::{JsonFile, MemoryPersistence, Persistence};
pub use store::SubscriptionStore;
pub use types::{
    ChannelInfo, FeedSubscription, PersistError, Settings, StateDocument, StoreError,
    SubscriberState, SubscriptionSummary,
};
