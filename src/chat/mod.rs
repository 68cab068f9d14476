//! Chat transport core: ordered dispatch, reply channels, message handling.

pub mod dispatcher;
pub mod reply;
pub mod service;

pub use dispatcher::{ChatJob, DispatchError, Dispatcher, MessageHandler};
pub use reply::{ChatReply, DeliveryError, OneshotReply, ReplySink, WebhookReply};
pub use service::ChatService;
