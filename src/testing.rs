//! Test doubles for the save path.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::SaveError;
use crate::saver::Saver;

/// Records every value it is asked to save, optionally sleeping to simulate
/// latency and failing with scripted errors.
#[derive(Debug)]
pub struct RecordingSaver<T> {
    calls: Mutex<Vec<T>>,
    failures: Mutex<VecDeque<SaveError>>,
    latency: Duration,
}

impl<T: Clone> RecordingSaver<T> {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    #[must_use]
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            latency,
        })
    }

    /// The next call fails with `error`. Scripted failures are consumed in order.
    pub fn fail_next(&self, error: SaveError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push_back(error);
        }
    }

    pub fn calls(&self) -> Vec<T> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn last_call(&self) -> Option<T> {
        self.calls.lock().ok().and_then(|c| c.last().cloned())
    }
}

#[async_trait]
impl<T> Saver<T> for RecordingSaver<T>
where
    T: Clone + Send + 'static,
{
    async fn save(&self, value: T) -> Result<(), SaveError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(value);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = self.failures.lock().ok().and_then(|mut f| f.pop_front());
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
