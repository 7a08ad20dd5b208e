//! Bounded ingress queue between the broker event loop and the dispatcher
//!
//! The queue has a hard cap. On overflow the oldest queued non-retained
//! telemetry frame is shed first; when none is queued, telemetry is shed on
//! arrival and anything else evicts the oldest queued frame.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use super::client::MqttMessage;

fn is_telemetry_topic(topic: &str) -> bool {
    topic.split('/').any(|seg| seg == "telemetry")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Enqueued,
    /// Something was shed to make room; carries the running drop total
    Shed(u64),
}

pub struct IngressQueue {
    inner: Mutex<VecDeque<MqttMessage>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl IngressQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, msg: MqttMessage) -> PushOutcome {
        let mut outcome = PushOutcome::Enqueued;
        {
            let mut queue = match self.inner.lock() {
                Ok(guard) => guard,
                // A poisoned lock means a panicked pusher; keep serving
                Err(poisoned) => poisoned.into_inner(),
            };

            if queue.len() >= self.capacity {
                let victim = queue
                    .iter()
                    .position(|m| !m.retain && is_telemetry_topic(&m.topic));

                match victim {
                    Some(pos) => {
                        queue.remove(pos);
                    }
                    None if is_telemetry_topic(&msg.topic) => {
                        // Nothing shedable queued; the incoming telemetry is
                        // the lowest-value frame, so it is the one shed
                        let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        return PushOutcome::Shed(total);
                    }
                    None => {
                        queue.pop_front();
                    }
                }
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                outcome = PushOutcome::Shed(total);
            }

            queue.push_back(msg);
        }
        self.notify.notify_one();
        outcome
    }

    pub async fn pop(&self) -> MqttMessage {
        loop {
            let notified = self.notify.notified();
            {
                let mut queue = match self.inner.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(msg) = queue.pop_front() {
                    // Wake the next waiter if frames remain
                    if !queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return msg;
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
