//! A single-slot cell that publishes the latest value to waiting readers and
//! subscribers.

use std::{sync::Arc, time::Duration};
use tokio::sync::watch;

/// Holds the most recently published value.
///
/// Writers never block. Readers may wait for the first value to be published
/// and subscribers are notified of every subsequent publication, though a
/// slow subscriber only observes the latest value.
#[derive(Debug)]
pub struct Cell<T> {
    tx: watch::Sender<Option<Arc<T>>>,
}

/// Observes values published after the subscription was created.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
}

// === impl Cell ===

impl<T> Cell<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publishes a value, returning a handle to it.
    pub fn set(&self, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.tx.send_replace(Some(value.clone()));
        value
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.tx.borrow().clone()
    }

    /// Waits until a value has been set, returning immediately when one
    /// already has been.
    pub async fn get_wait(&self) -> Arc<T> {
        let mut rx = self.tx.subscribe();
        let value = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            // The sender is owned by this cell, so the channel cannot close
            // while it is borrowed.
            Err(_) => None,
        };
        match value {
            Some(value) => value,
            None => std::future::pending().await,
        }
    }

    /// Waits up to `timeout` for a value to be set.
    pub async fn get_wait_timeout(&self, timeout: Duration) -> Option<Arc<T>> {
        tokio::time::timeout(timeout, self.get_wait()).await.ok()
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let mut rx = self.tx.subscribe();
        rx.mark_unchanged();
        Subscription { rx }
    }
}

impl<T> Default for Cell<T> {
    fn default() -> Self {
        Self::new()
    }
}

// === impl Subscription ===

impl<T> Subscription<T> {
    /// Waits for the next value to be set.
    ///
    /// Returns `None` once the cell has been dropped.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    #[test]
    fn get_before_set() {
        let cell = Cell::<String>::new();
        assert!(cell.get().is_none());

        cell.set("value".to_string());
        assert_eq!(cell.get().as_deref().map(String::as_str), Some("value"));
    }

    #[tokio::test]
    async fn get_wait_blocks_until_set() {
        let cell = Arc::new(Cell::<String>::new());
        let waiter = tokio::spawn({
            let cell = cell.clone();
            async move { cell.get_wait().await }
        });

        time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        cell.set("value".to_string());
        let value = time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must be woken")
            .expect("waiter must not panic");
        assert_eq!(*value, "value");
    }

    #[tokio::test]
    async fn get_wait_returns_immediately_when_set() {
        let cell = Cell::<i32>::new();
        cell.set(42);
        let value = time::timeout(Duration::from_millis(10), cell.get_wait())
            .await
            .expect("value is already set");
        assert_eq!(*value, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn get_wait_timeout_waits_at_least_the_timeout() {
        let cell = Cell::<u32>::new();
        let start = time::Instant::now();
        assert!(cell
            .get_wait_timeout(Duration::from_millis(50))
            .await
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn get_wait_timeout_returns_value_set_in_time() {
        let cell = Arc::new(Cell::<u32>::new());
        tokio::spawn({
            let cell = cell.clone();
            async move {
                time::sleep(Duration::from_millis(10)).await;
                cell.set(7);
            }
        });
        let value = cell.get_wait_timeout(Duration::from_secs(1)).await;
        assert_eq!(value.as_deref(), Some(&7));
    }

    #[tokio::test]
    async fn concurrent_waiters_all_receive_value() {
        let cell = Arc::new(Cell::<&'static str>::new());
        let waiters = (0..10)
            .map(|_| {
                let cell = cell.clone();
                tokio::spawn(async move { cell.get_wait().await })
            })
            .collect::<Vec<_>>();

        cell.set("value");
        for waiter in waiters {
            let value = time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("waiter must be woken")
                .expect("waiter must not panic");
            assert_eq!(*value, "value");
        }
    }

    #[tokio::test]
    async fn subscriptions_receive_subsequent_sets() {
        let cell = Cell::<&'static str>::new();
        let mut sub1 = cell.subscribe();
        let mut sub2 = cell.subscribe();

        cell.set("first");
        assert_eq!(sub1.next().await.as_deref(), Some(&"first"));
        assert_eq!(sub2.next().await.as_deref(), Some(&"first"));

        cell.set("second");
        assert_eq!(sub1.next().await.as_deref(), Some(&"second"));
        assert_eq!(sub2.next().await.as_deref(), Some(&"second"));
    }

    #[tokio::test]
    async fn subscription_does_not_see_prior_value() {
        let cell = Cell::<&'static str>::new();
        cell.set("prior");

        let mut sub = cell.subscribe();
        assert!(
            time::timeout(Duration::from_millis(10), sub.next())
                .await
                .is_err(),
            "subscription must not observe a value set before it was created"
        );

        cell.set("next");
        assert_eq!(sub.next().await.as_deref(), Some(&"next"));
    }

    #[tokio::test]
    async fn slow_subscriber_sees_latest() {
        let cell = Cell::<u32>::new();
        let mut sub = cell.subscribe();
        for i in 0..5 {
            cell.set(i);
        }
        assert_eq!(sub.next().await.as_deref(), Some(&4));
    }

    #[tokio::test]
    async fn subscription_ends_when_cell_is_dropped() {
        let cell = Cell::<u32>::new();
        let mut sub = cell.subscribe();
        drop(cell);
        assert!(sub.next().await.is_none());
    }
}
