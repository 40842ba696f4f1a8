use crate::update::PositionUpdate;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    /// The source never managed to connect.
    ConnectionFailed { reason: String },
    ConnectionLost { reason: String },
    Position(PositionUpdate),
    Malformed { topic: String, reason: String },
}

pub trait EventConsumer {
    fn on_event(&mut self, event: &Event);
}

impl<F> EventConsumer for F
where
    F: FnMut(&Event),
{
    fn on_event(&mut self, event: &Event) {
        self(event)
    }
}

pub trait MessageSource {
    fn subscribe(&mut self, consumer: Box<dyn EventConsumer + Send>);
}

/// Hands every event to each consumer, in subscription order.
#[derive(Default)]
pub struct Dispatcher {
    consumers: Vec<Box<dyn EventConsumer + Send>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch(&mut self, event: Event) {
        for consumer in &mut self.consumers {
            consumer.on_event(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }
}

impl MessageSource for Dispatcher {
    fn subscribe(&mut self, consumer: Box<dyn EventConsumer + Send>) {
        self.consumers.push(consumer);
    }
}

/// Reports connection changes and bad payloads in the log.
#[derive(Debug, Default)]
pub struct EventLog;

impl EventConsumer for EventLog {
    fn on_event(&mut self, event: &Event) {
        match event {
            Event::Connected => info!("connected to train location feed"),
            Event::ConnectionFailed { reason } => error!("connection failed: {reason}"),
            Event::ConnectionLost { reason } => error!("connection lost: {reason}"),
            Event::Malformed { topic, reason } => warn!(%topic, "malformed payload: {reason}"),
            Event::Position(_) => {}
        }
    }
}

#[test]
fn dispatches_to_every_consumer_in_order() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut dispatcher = Dispatcher::new();
    for name in ["first", "second"] {
        let seen = Arc::clone(&seen);
        dispatcher.subscribe(Box::new(move |event: &Event| {
            seen.lock().unwrap().push((name, event.clone()));
        }));
    }
    dispatcher.subscribe(Box::new(EventLog));
    assert_eq!(dispatcher.len(), 3);

    dispatcher.dispatch(Event::Connected);
    dispatcher.dispatch(Event::Position(PositionUpdate::new(1, 24.9, 60.2, 10.0)));

    let seen = seen.lock().unwrap();
    let order: Vec<_> = seen
        .iter()
        .map(|(name, event)| (*name, matches!(event, Event::Connected)))
        .collect();
    assert_eq!(
        order,
        [("first", true), ("second", true), ("first", false), ("second", false)]
    );
}
