mod bus;
mod event;

pub use bus::EventBus;
pub use event::{ChangeEvent, ChangeKind};

use rampart_core::BoxFuture;

/// Fire-and-forget publication of change events.
///
/// Delivery failures stay inside the notifier; callers never observe them.
pub trait Notifier: Send + Sync + 'static {
    fn publish<'a>(&'a self, topic: &'a str, event: ChangeEvent) -> BoxFuture<'a, ()>;
}

/// Notifier that drops every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn publish<'a>(&'a self, _topic: &'a str, _event: ChangeEvent) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

pub mod prelude {
    //! Re-exports of the most commonly used event types.
    pub use crate::{ChangeEvent, ChangeKind, EventBus, NoopNotifier, Notifier};
}
