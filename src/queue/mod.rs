// Queue-facing components: connection bootstrap, the consumer core, the
// producer, and the retry classifier.

pub mod connection;
pub mod consumer;
pub mod producer;
pub mod retry;

// Re-export specific items to simplify imports elsewhere
pub use connection::BrokerConnector;
pub use consumer::{ConsumerError, MessageProcessor, PushConsumer};
pub use producer::{PublishError, PushProducer};
pub use retry::{classify, RetryClass};

/// Queue carrying push send requests in the shipped configuration.
pub const SEND_QUEUE: &str = "push.send.queue";
/// Queue carrying device-token updates in the shipped configuration.
pub const TOKEN_QUEUE: &str = "push.tokens.queue";
