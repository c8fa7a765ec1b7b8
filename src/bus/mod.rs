mod intern;

pub mod bus;
pub mod external;
pub mod matcher;
pub mod message;
pub mod subscription;

pub(crate) use intern::intern_topic;

pub use self::bus::{MessageBus, MessageBusBuilder};
pub use external::{ExternalSink, ExternalType, JsonSerializer, PayloadSerializer};
pub use matcher::is_match;
pub use message::{BusMessage, Request, Response};
pub use subscription::{Handler, Subscription};
