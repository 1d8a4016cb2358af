//! In-memory publisher for testing.
//!
//! Captures every published payload for assertions.
//!
//! # Panics
//!
//! Methods panic if the internal lock is poisoned. This adapter is for tests only.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crate::ports::{PublishError, ResponsePublisher};

/// Publisher that records payloads in memory.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<Mutex<Vec<String>>>,
    notify: Arc<Notify>,
    delay: Duration,
    fail: Arc<Mutex<bool>>,
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every publish sleeps for `delay` before recording.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes later publishes fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().expect("publisher lock poisoned") = failing;
    }

    // === Test Helpers ===

    /// All payloads published so far.
    pub fn published(&self) -> Vec<String> {
        self.published
            .lock()
            .expect("publisher lock poisoned")
            .clone()
    }

    /// Published payloads decoded as JSON; non-JSON payloads are skipped.
    pub fn published_json(&self) -> Vec<Value> {
        self.published()
            .iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect()
    }

    /// `type` fields of the published JSON payloads.
    pub fn published_types(&self) -> Vec<String> {
        self.published_json()
            .iter()
            .filter_map(|v| v.get("type").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.published.lock().expect("publisher lock poisoned").len()
    }

    pub fn clear(&self) {
        self.published
            .lock()
            .expect("publisher lock poisoned")
            .clear();
    }

    /// Waits until a published payload satisfies `predicate`.
    ///
    /// Returns false if none does within `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&Value) -> bool,
    {
        let check = || self.published_json().iter().any(|v| predicate(v));
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if check() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    /// Waits until at least `count` payloads have been published.
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.count() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl ResponsePublisher for InMemoryPublisher {
    async fn publish(&self, payload: String) -> Result<(), PublishError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if *self.fail.lock().expect("publisher lock poisoned") {
            return Err(PublishError::Transport("publisher set to fail".to_string()));
        }
        self.published
            .lock()
            .expect("publisher lock poisoned")
            .push(payload);
        self.notify.notify_waiters();
        Ok(())
    }
}
