use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::range::IndexRange;
use crate::velocity::ScrollDirection;

/// Consolidated event stream of the engine.
///
/// Every subscriber receives every event; components react to each other
/// exclusively through this bus (plus explicit capability calls), never
/// through back-references.
#[derive(Debug, Clone)]
pub enum EngineEvent<T> {
    /// A block-aligned range finished loading. `items` carries the payloads
    /// that survived the transform/validate pipeline, in index order.
    RangeLoaded {
        range: IndexRange,
        items: Vec<T>,
    },
    RangeFailed {
        range: IndexRange,
        error: String,
        attempts: u32,
    },
    /// Render plan: which indices to draw and at which primary-axis offset.
    /// `visible_range` is `None` for an empty collection.
    ViewportChanged {
        visible_range: Option<IndexRange>,
        positions: Vec<(usize, f64)>,
        scroll_position: f64,
    },
    ScrollPositionChanged {
        position: f64,
        direction: ScrollDirection,
    },
    /// Programmatic scroll target. `animated` is relayed from the caller;
    /// animation itself is a renderer concern.
    ScrollTo {
        position: f64,
        animated: bool,
    },
    SpeedChanged {
        velocity: f64,
        direction: ScrollDirection,
    },
    LoadingStart {
        range: IndexRange,
    },
    LoadingEnd {
        range: IndexRange,
    },
    /// Static storage was replaced or mutated.
    ItemsSet {
        len: usize,
    },
    Error {
        message: String,
        context: String,
    },
}

/// Fan-out bus: one unbounded channel per subscriber.
///
/// Emission never blocks engine state transitions; receivers that have been
/// dropped are pruned on the next emit.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EngineEvent<T>>>>,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<EngineEvent<T>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// Drop every subscriber channel. Used on destroy.
    pub fn close(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

impl<T: Clone> EventBus<T> {
    pub fn emit(&self, event: EngineEvent<T>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus: EventBus<String> = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(EngineEvent::ItemsSet { len: 3 });

        assert!(matches!(a.try_recv(), Ok(EngineEvent::ItemsSet { len: 3 })));
        assert!(matches!(b.try_recv(), Ok(EngineEvent::ItemsSet { len: 3 })));
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let bus: EventBus<String> = EventBus::new();
        let rx = bus.subscribe();
        let _kept = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx);
        bus.emit(EngineEvent::ItemsSet { len: 0 });
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_close_detaches_everyone() {
        let bus: EventBus<String> = EventBus::new();
        let mut rx = bus.subscribe();
        bus.close();

        bus.emit(EngineEvent::ItemsSet { len: 1 });
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
