//! Notification fan-in.
//!
//! Each actor owns a small bounded inbox. A long-lived task per open stream
//! copies events from the service into the inbox; the actor drains it at
//! the start of every tick.

use ridebench_env::{NotificationEvent, NotificationFeed};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

struct Subscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct NotificationInbox {
    owner: String,
    tx: mpsc::Sender<NotificationEvent>,
    rx: Mutex<mpsc::Receiver<NotificationEvent>>,
    subscription: Mutex<Option<Subscription>>,
}

impl NotificationInbox {
    pub fn new(owner: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            owner: owner.into(),
            tx,
            rx: Mutex::new(rx),
            subscription: Mutex::new(None),
        }
    }

    /// True while a stream is attached and still delivering.
    pub fn is_connected(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Starts forwarding `feed` into the inbox, replacing any previous stream.
    pub fn attach(&self, feed: NotificationFeed) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(forward(
            self.owner.clone(),
            feed,
            self.tx.clone(),
            cancel.clone(),
        ));
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Subscription { cancel, task });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
    }

    /// Closes the stream and stops its forwarding task.
    pub fn close(&self) {
        if let Some(subscription) = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            subscription.cancel.cancel();
        }
    }

    /// Takes every event delivered so far, oldest first.
    pub fn drain(&self) -> Vec<NotificationEvent> {
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Drop for NotificationInbox {
    fn drop(&mut self) {
        self.close();
    }
}

async fn forward(
    owner: String,
    mut feed: NotificationFeed,
    tx: mpsc::Sender<NotificationEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return,
            event = feed.recv() => match event {
                Some(event) => event,
                None => {
                    debug!(%owner, "Notification stream ended");
                    return;
                }
            },
        };

        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(%owner, %event, "Notification inbox saturated, blocking delivery");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(TrySendError::Closed(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridebench_env::notification_stream;
    use std::time::Duration;

    fn matched(id: &str) -> NotificationEvent {
        NotificationEvent::ChairMatched {
            server_request_id: id.into(),
        }
    }

    #[tokio::test]
    async fn test_drain_returns_events_in_order() {
        let inbox = NotificationInbox::new("C1", 8);
        let (sink, feed) = notification_stream(8);
        inbox.attach(feed);
        assert!(inbox.is_connected());

        sink.send(matched("a")).await.unwrap();
        sink.send(matched("b")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let ids: Vec<String> = inbox
            .drain()
            .iter()
            .map(|e| e.server_request_id().to_owned())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(inbox.drain().is_empty());
    }

    #[tokio::test]
    async fn test_saturated_inbox_applies_backpressure() {
        let inbox = NotificationInbox::new("U1", 2);
        let (sink, feed) = notification_stream(1);
        inbox.attach(feed);

        for id in ["a", "b", "c", "d"] {
            tokio::time::timeout(Duration::from_millis(50), sink.send(matched(id)))
                .await
                .ok();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // nothing was dropped: everything shows up once there is room
        let mut seen = inbox.drain();
        tokio::time::sleep(Duration::from_millis(20)).await;
        seen.extend(inbox.drain());
        tokio::time::sleep(Duration::from_millis(20)).await;
        seen.extend(inbox.drain());
        let ids: Vec<&str> = seen.iter().map(|e| e.server_request_id()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_close_stops_forwarding() {
        let inbox = NotificationInbox::new("C2", 4);
        let (sink, feed) = notification_stream(4);
        inbox.attach(feed);
        inbox.close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(!inbox.is_connected());
        // the forwarder dropped the feed, so the service side sees a closed stream
        assert!(sink.send(matched("late")).await.is_err());
    }
}
