pub mod config;
pub mod http;
pub mod messages;
pub mod models;
pub mod onesignal;
pub mod queue;
pub mod repository;
pub mod service;

pub use config::Config;
pub use queue::{BrokerConnector, MessageProcessor, PushConsumer, PushProducer};
pub use service::PushService;
