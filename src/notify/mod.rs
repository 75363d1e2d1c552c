// Notification port towards the display layer
pub mod listener;

pub use listener::{ChannelListener, LoggingListener, MarketListener, MarketNotification};
