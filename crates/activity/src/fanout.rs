//! Canonical event fan-out.
//!
//! Delivers each published event to every subscriber without blocking the
//! normalizer on the slowest one, while preserving per-subscriber order.
//!
//! Two subscriber policies:
//! - **Lossless** (the SSE writer): a bounded channel; when the buffer is
//!   full the producer awaits space. This is the authoritative stream the
//!   user sees.
//! - **Coalesce** (persistence, metrics): a bounded queue; when it is
//!   full an incoming delta replaces the most recent queued delta of the
//!   same stream (the later event wins for `accumulated`). Boundary
//!   events (`*_start`, `*_complete`, `tool_result`, ...) are never
//!   dropped — they may push the queue past its bound (the watermark).
//!
//! A subscription is a lazy finite sequence: the orchestrator closes the
//! fanout right after publishing the request's terminal
//! `activity_complete` (multi-model handoffs emit inner
//! `activity_start`/`activity_complete` pairs before it), so every
//! subscriber's stream ends at the terminal event.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use ah_domain::event::ActivityEvent;

/// Overflow policy for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberPolicy {
    Lossless,
    Coalesce,
}

enum SubscriberKind {
    Lossless {
        tx: mpsc::Sender<ActivityEvent>,
    },
    Coalesce {
        queue: Arc<Mutex<CoalesceQueue>>,
        notify: Arc<Notify>,
    },
}

struct SubscriberEntry {
    name: &'static str,
    kind: SubscriberKind,
    closed: bool,
}

struct CoalesceQueue {
    items: VecDeque<ActivityEvent>,
    bound: usize,
    done: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventFanout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventFanout {
    subscribers: Mutex<Vec<SubscriberEntry>>,
    buffer: usize,
    /// Sticky flag: a lossless subscriber went away. The orchestrator
    /// reads this as the client-disconnect cancel signal.
    lossless_closed: std::sync::atomic::AtomicBool,
}

impl EventFanout {
    /// `buffer` is the per-subscriber bound (the `fanoutBuffer` knob).
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            buffer: buffer.max(1),
            lossless_closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Attach a subscriber. The returned [`Subscription`] yields events
    /// in publish order and ends when the fanout is closed.
    pub fn subscribe(&self, name: &'static str, policy: SubscriberPolicy) -> Subscription {
        match policy {
            SubscriberPolicy::Lossless => {
                let (tx, rx) = mpsc::channel(self.buffer);
                self.subscribers.lock().push(SubscriberEntry {
                    name,
                    kind: SubscriberKind::Lossless { tx },
                    closed: false,
                });
                Subscription {
                    inner: SubscriptionInner::Lossless { rx },
                    done: false,
                }
            }
            SubscriberPolicy::Coalesce => {
                let queue = Arc::new(Mutex::new(CoalesceQueue {
                    items: VecDeque::new(),
                    bound: self.buffer,
                    done: false,
                }));
                let notify = Arc::new(Notify::new());
                self.subscribers.lock().push(SubscriberEntry {
                    name,
                    kind: SubscriberKind::Coalesce {
                        queue: queue.clone(),
                        notify: notify.clone(),
                    },
                    closed: false,
                });
                Subscription {
                    inner: SubscriptionInner::Coalesce { queue, notify },
                    done: false,
                }
            }
        }
    }

    /// Broadcast one event.
    ///
    /// Awaits buffer space only on lossless subscribers. Returns `false`
    /// when a lossless subscriber has gone away (its receiver dropped) —
    /// the orchestrator treats that as the client-disconnect cancel
    /// signal.
    pub async fn publish(&self, event: &ActivityEvent) -> bool {
        // Snapshot the subscriber list so the lock is never held across
        // an await point.
        enum Target {
            Lossless(mpsc::Sender<ActivityEvent>, usize),
            Coalesce(Arc<Mutex<CoalesceQueue>>, Arc<Notify>),
        }
        let targets: Vec<Target> = {
            let subs = self.subscribers.lock();
            subs.iter()
                .enumerate()
                .filter(|(_, s)| !s.closed)
                .map(|(i, s)| match &s.kind {
                    SubscriberKind::Lossless { tx } => Target::Lossless(tx.clone(), i),
                    SubscriberKind::Coalesce { queue, notify } => {
                        Target::Coalesce(queue.clone(), notify.clone())
                    }
                })
                .collect()
        };

        for target in targets {
            match target {
                Target::Lossless(tx, idx) => {
                    if tx.send(event.clone()).await.is_err() {
                        let mut subs = self.subscribers.lock();
                        if let Some(entry) = subs.get_mut(idx) {
                            tracing::debug!(subscriber = entry.name, "lossless subscriber closed");
                            entry.closed = true;
                        }
                        self.lossless_closed
                            .store(true, std::sync::atomic::Ordering::Release);
                    }
                }
                Target::Coalesce(queue, notify) => {
                    let mut q = queue.lock();
                    q.push(event.clone());
                    drop(q);
                    notify.notify_one();
                }
            }
        }
        !self
            .lossless_closed
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Whether a lossless subscriber has disconnected.
    pub fn lossless_closed(&self) -> bool {
        self.lossless_closed
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// End every subscription. Called once after the request's terminal
    /// `activity_complete` has been published.
    pub fn close(&self) {
        let mut subs = self.subscribers.lock();
        for entry in subs.drain(..) {
            if let SubscriberKind::Coalesce { queue, notify } = entry.kind {
                queue.lock().done = true;
                notify.notify_one();
            }
            // Lossless senders end their channel by being dropped here.
        }
    }
}

impl CoalesceQueue {
    fn push(&mut self, event: ActivityEvent) {
        if self.done {
            return;
        }
        if self.items.len() >= self.bound && event.is_coalescible() {
            let key = event.coalesce_key().map(|(k, id)| (k, id.to_string()));
            if let Some(slot) = self.items.iter_mut().rev().find(|queued| {
                queued.is_coalescible()
                    && queued.coalesce_key().map(|(k, id)| (k, id.to_string())) == key
            }) {
                // Later event wins for delta/accumulated.
                *slot = event;
                return;
            }
        }
        self.items.push_back(event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum SubscriptionInner {
    Lossless {
        rx: mpsc::Receiver<ActivityEvent>,
    },
    Coalesce {
        queue: Arc<Mutex<CoalesceQueue>>,
        notify: Arc<Notify>,
    },
}

/// A lazy finite sequence of canonical events for one subscriber.
pub struct Subscription {
    inner: SubscriptionInner,
    done: bool,
}

impl Subscription {
    /// Next event in publish order, or `None` once the fanout has been
    /// closed (or dropped) and the buffer is drained.
    pub async fn recv(&mut self) -> Option<ActivityEvent> {
        if self.done {
            return None;
        }
        let event = match &mut self.inner {
            SubscriptionInner::Lossless { rx } => match rx.recv().await {
                Some(evt) => evt,
                None => {
                    self.done = true;
                    return None;
                }
            },
            SubscriptionInner::Coalesce { queue, notify } => loop {
                {
                    let mut q = queue.lock();
                    if let Some(evt) = q.items.pop_front() {
                        break evt;
                    }
                    if q.done {
                        self.done = true;
                        return None;
                    }
                }
                notify.notified().await;
            },
        };
        Some(event)
    }

    /// Drain everything that is ready or pending up to the terminal event.
    pub async fn collect(mut self) -> Vec<ActivityEvent> {
        let mut out = Vec::new();
        while let Some(evt) = self.recv().await {
            out.push(evt);
        }
        out
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ah_domain::event::{StopReason, Timing, TokenTally};

    fn content(seq: u64) -> ActivityEvent {
        ActivityEvent::ContentDelta {
            session_id: "s1".into(),
            delta: format!("d{seq}"),
            accumulated: format!("acc{seq}"),
            sequence_number: seq,
            ts: seq,
        }
    }

    fn complete() -> ActivityEvent {
        ActivityEvent::ActivityComplete {
            session_id: "s1".into(),
            tokens: TokenTally::default(),
            timing: Timing::default(),
            had_thinking: false,
            tool_call_count: 0,
            stop_reason: StopReason::EndTurn,
            ts: 999,
        }
    }

    fn tool_start(id: &str) -> ActivityEvent {
        ActivityEvent::ToolStart {
            session_id: "s1".into(),
            tool_call_id: id.into(),
            tool_name: "search".into(),
            tool_index: 0,
            ts: 1,
        }
    }

    #[tokio::test]
    async fn lossless_delivers_in_publish_order() {
        let fanout = EventFanout::new(16);
        let sub = fanout.subscribe("sse", SubscriberPolicy::Lossless);
        for i in 1..=5 {
            assert!(fanout.publish(&content(i)).await);
        }
        fanout.publish(&complete()).await;
        fanout.close();

        let events = sub.collect().await;
        assert_eq!(events.len(), 6);
        for (i, evt) in events.iter().take(5).enumerate() {
            match evt {
                ActivityEvent::ContentDelta {
                    sequence_number, ..
                } => assert_eq!(*sequence_number, i as u64 + 1),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn subscription_ends_after_close() {
        let fanout = EventFanout::new(16);
        let mut sub = fanout.subscribe("sse", SubscriberPolicy::Lossless);
        fanout.publish(&complete()).await;
        fanout.close();

        assert!(sub.recv().await.unwrap().is_terminal());
        assert!(sub.recv().await.is_none());
        // Idempotent after the end.
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_lossless_subscriber_signals_cancel() {
        let fanout = EventFanout::new(2);
        let sub = fanout.subscribe("sse", SubscriberPolicy::Lossless);
        drop(sub);
        // Fill the channel buffer, then the drop is observed.
        let mut alive = true;
        for i in 1..=4 {
            alive = fanout.publish(&content(i)).await;
        }
        assert!(!alive);
    }

    #[tokio::test]
    async fn coalesce_merges_deltas_when_full() {
        let fanout = EventFanout::new(2);
        let mut sub = fanout.subscribe("persist", SubscriberPolicy::Coalesce);

        // Queue fills with 2 deltas; the next 3 coalesce into the tail.
        for i in 1..=5 {
            fanout.publish(&content(i)).await;
        }
        fanout.publish(&complete()).await;
        fanout.close();

        let first = sub.recv().await.unwrap();
        let second = sub.recv().await.unwrap();
        match (&first, &second) {
            (
                ActivityEvent::ContentDelta {
                    sequence_number: a, ..
                },
                ActivityEvent::ContentDelta {
                    sequence_number: b, ..
                },
            ) => {
                assert_eq!(*a, 1);
                // Later events won the slot.
                assert_eq!(*b, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(sub.recv().await.unwrap().is_terminal());
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn coalesce_never_drops_boundary_events() {
        let fanout = EventFanout::new(1);
        let mut sub = fanout.subscribe("persist", SubscriberPolicy::Coalesce);

        fanout.publish(&content(1)).await;
        fanout.publish(&tool_start("t1")).await;
        fanout.publish(&tool_start("t2")).await;
        fanout.publish(&complete()).await;
        fanout.close();

        let events = {
            let mut out = Vec::new();
            while let Some(evt) = sub.recv().await {
                out.push(evt);
            }
            out
        };
        // Bound of 1 exceeded by boundary events: all four delivered.
        assert_eq!(events.len(), 4);
        assert!(matches!(events[1], ActivityEvent::ToolStart { .. }));
        assert!(matches!(events[2], ActivityEvent::ToolStart { .. }));
    }

    #[tokio::test]
    async fn coalesce_keeps_distinct_streams_apart() {
        let fanout = EventFanout::new(1);
        let mut sub = fanout.subscribe("persist", SubscriberPolicy::Coalesce);

        let thinking = ActivityEvent::ThinkingDelta {
            session_id: "s1".into(),
            thinking_id: "th1".into(),
            delta: "a".into(),
            accumulated: "a".into(),
            sequence_number: 1,
            ts: 1,
        };
        fanout.publish(&thinking).await;
        // Content delta with a different coalesce key must not replace
        // the queued thinking delta even though the queue is full.
        fanout.publish(&content(1)).await;
        fanout.publish(&complete()).await;
        fanout.close();

        assert!(matches!(
            sub.recv().await.unwrap(),
            ActivityEvent::ThinkingDelta { .. }
        ));
        assert!(matches!(
            sub.recv().await.unwrap(),
            ActivityEvent::ContentDelta { .. }
        ));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_get_full_order() {
        let fanout = EventFanout::new(16);
        let sse = fanout.subscribe("sse", SubscriberPolicy::Lossless);
        let persist = fanout.subscribe("persist", SubscriberPolicy::Coalesce);

        for i in 1..=3 {
            fanout.publish(&content(i)).await;
        }
        fanout.publish(&complete()).await;
        fanout.close();

        let a = sse.collect().await;
        let b = persist.collect().await;
        assert_eq!(a.len(), 4);
        assert_eq!(b.len(), 4);
    }
}
