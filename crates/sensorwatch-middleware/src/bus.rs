//! Typed, topic-based, synchronous observer bus.
//!
//! Observers are plain closures registered on the bus.  [`EventBus::publish`]
//! calls every matching observer before it returns, in the order the
//! observers were registered, so consumers see an event in the same tick it
//! was raised.
//!
//! # Topics
//!
//! | Topic | Traffic |
//! |---|---|
//! | [`Topic::Availability`] | `AvailabilityChanged`, `AnyAvailable` |
//! | [`Topic::Coverage`] | `CoverageProviderStateChanged` |
//! | [`Topic::SensorStatus`] | `SensorStatusChanged` (full snapshots, for logging) |

use std::fmt;

use sensorwatch_types::{Event, EventPayload};
use tracing::trace;

/// Routing lanes on the bus, derived from the event payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Availability,
    Coverage,
    SensorStatus,
}

impl Topic {
    /// The lane an event travels on.
    pub fn of(event: &Event) -> Topic {
        match event.payload {
            EventPayload::AvailabilityChanged { .. } | EventPayload::AnyAvailable(_) => {
                Topic::Availability
            }
            EventPayload::CoverageProviderStateChanged(_) => Topic::Coverage,
            EventPayload::SensorStatusChanged(_) => Topic::SensorStatus,
        }
    }
}

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&Event)>;

struct Subscriber {
    id: SubscriptionId,
    topic: Option<Topic>,
    observer: Observer,
}

/// Observer registry owned by a single vessel context.
///
/// # Example
///
/// ```
/// use std::cell::RefCell;
/// use std::rc::Rc;
/// use sensorwatch_middleware::{EventBus, Topic};
/// use sensorwatch_types::{Event, EventPayload};
///
/// let seen = Rc::new(RefCell::new(Vec::new()));
/// let sink = seen.clone();
///
/// let mut bus = EventBus::new();
/// bus.subscribe_to(Topic::Availability, move |e| sink.borrow_mut().push(e.tick));
///
/// bus.publish(Event::new("doc", 7, EventPayload::AnyAvailable(true)));
/// assert_eq!(*seen.borrow(), vec![7]);
/// ```
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    next_id: u64,
    published: u64,
}

impl EventBus {
    /// Create a bus with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every event.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&Event) + 'static,
    {
        self.register(None, Box::new(observer))
    }

    /// Observe only events on `topic`.
    pub fn subscribe_to<F>(&mut self, topic: Topic, observer: F) -> SubscriptionId
    where
        F: FnMut(&Event) + 'static,
    {
        self.register(Some(topic), Box::new(observer))
    }

    /// Remove an observer.  Returns `false` when `id` was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    /// Deliver `event` to every matching observer, in registration order.
    ///
    /// Returns the number of observers that received it.  Zero observers is
    /// a normal condition.
    pub fn publish(&mut self, event: Event) -> usize {
        let topic = Topic::of(&event);
        self.published += 1;
        let mut delivered = 0;
        for sub in &mut self.subscribers {
            if sub.topic.is_none_or(|t| t == topic) {
                (sub.observer)(&event);
                delivered += 1;
            }
        }
        trace!(?topic, tick = event.tick, delivered, "event published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Total number of events published on this bus.
    pub fn published(&self) -> u64 {
        self.published
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .field("published", &self.published)
            .finish()
    }
}

impl EventBus {
    fn register(&mut self, topic: Option<Topic>, observer: Observer) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber {
            id,
            topic,
            observer,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use sensorwatch_types::ProviderState;

    use super::*;

    fn any(tick: u64, value: bool) -> Event {
        Event::new("test", tick, EventPayload::AnyAvailable(value))
    }

    fn coverage(tick: u64) -> Event {
        Event::new(
            "test",
            tick,
            EventPayload::CoverageProviderStateChanged(ProviderState::Bound),
        )
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let mut bus = EventBus::new();
        assert_eq!(bus.publish(any(1, true)), 0);
        assert_eq!(bus.published(), 1);
    }

    #[test]
    fn delivery_follows_registration_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        for name in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(move |_| order.borrow_mut().push(name));
        }
        assert_eq!(bus.publish(any(1, true)), 3);
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn topic_filtering() {
        let availability = Rc::new(RefCell::new(0));
        let cover = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        {
            let availability = availability.clone();
            bus.subscribe_to(Topic::Availability, move |_| *availability.borrow_mut() += 1);
        }
        {
            let cover = cover.clone();
            bus.subscribe_to(Topic::Coverage, move |_| *cover.borrow_mut() += 1);
        }

        bus.publish(any(1, true));
        bus.publish(coverage(1));
        bus.publish(coverage(2));

        assert_eq!(*availability.borrow(), 1);
        assert_eq!(*cover.borrow(), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let hits = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        let id = {
            let hits = hits.clone();
            bus.subscribe(move |_| *hits.borrow_mut() += 1)
        };
        bus.publish(any(1, true));
        assert!(bus.unsubscribe(id));
        bus.publish(any(2, false));
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_unknown_id_returns_false() {
        let mut bus = EventBus::new();
        let id = bus.subscribe(|_| {});
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
    }

    #[test]
    fn topic_of_payloads() {
        assert_eq!(Topic::of(&any(0, false)), Topic::Availability);
        assert_eq!(Topic::of(&coverage(0)), Topic::Coverage);
    }
}
