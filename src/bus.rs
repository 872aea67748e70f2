//! Typed publish/subscribe registry for in-process callbacks.
//!
//! [`EventBus`] maps a tag to an ordered list of callbacks. [`EventBus::emit`]
//! invokes every callback registered under the emitted tag, synchronously and
//! in registration order. Unlike a channel there is no buffering and no
//! payload; a panicking callback propagates to the emitter.

use tracing::trace;

/// Handle returned by [`EventBus::on`], usable with [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Registration<T> {
    id: SubscriberId,
    tag: T,
    callback: Box<dyn FnMut() + Send>,
}

/// Ordered tag-to-callback registry.
pub struct EventBus<T> {
    registrations: Vec<Registration<T>>,
    next_id: u64,
}

impl<T: PartialEq> EventBus<T> {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            next_id: 0,
        }
    }

    /// Register a callback under the given tag.
    ///
    /// Registrations are never deduplicated; the same callback may be added
    /// under the same tag more than once and will fire once per registration.
    pub fn on(&mut self, tag: T, callback: impl FnMut() + Send + 'static) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.registrations.push(Registration {
            id,
            tag,
            callback: Box::new(callback),
        });
        id
    }

    /// Remove a registration by handle. Returns `false` if the handle was
    /// already removed or never existed.
    pub fn off(&mut self, id: SubscriberId) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|r| r.id != id);
        self.registrations.len() != before
    }

    /// Invoke every callback registered under `tag`, in registration order.
    pub fn emit(&mut self, tag: &T) {
        trace!("emitting to {} registrations", self.registrations.len());
        for registration in self.registrations.iter_mut() {
            if registration.tag == *tag {
                (registration.callback)();
            }
        }
    }

    /// Number of live registrations across all tags.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl<T: PartialEq> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
