//! Shared test doubles for the network layer.
//!
//! Feature-gated behind `testutil` so it never ships in production builds.
//! Enable it from a dependent crate's dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! vesta-types = { workspace = true, features = ["testutil"] }
//! ```

use crate::{HttpTransport, NetworkError, Result, WireRequest, WireResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// One request observed by a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: WireRequest,
    /// When the request reached the transport (tokio clock, so paused-time
    /// tests see virtual instants).
    pub at: Instant,
}

/// An [`HttpTransport`] that replays a scripted sequence of outcomes.
///
/// Outcomes are consumed in order; once the script is exhausted the
/// `repeat` outcome (if any) is returned for every further call. An optional
/// gate holds every call until the test releases a permit, which makes it
/// possible to pile up concurrent callers behind one in-flight request.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<WireResponse>>>,
    repeat: Mutex<Option<Result<WireResponse>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    gate: Option<Arc<Semaphore>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose calls block until a permit is added to the
    /// returned semaphore.
    #[must_use]
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    /// Queue one outcome.
    pub fn push(&self, outcome: Result<WireResponse>) -> &Self {
        lock(&self.script).push_back(outcome);
        self
    }

    /// Queue a response with a JSON body.
    pub fn push_json(&self, status: u16, body: &serde_json::Value) -> &Self {
        self.push(Ok(WireResponse::new(status, body.to_string())))
    }

    /// Return `outcome` for every call after the script runs out.
    pub fn repeat(&self, outcome: Result<WireResponse>) -> &Self {
        *lock(&self.repeat) = Some(outcome);
        self
    }

    /// Number of calls observed so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Snapshot of every request observed so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        lock(&self.requests).push(RecordedRequest {
            request,
            at: Instant::now(),
        });
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| NetworkError::Cancelled)?
                .forget();
        }
        let next = lock(&self.script).pop_front();
        next.or_else(|| lock(&self.repeat).clone())
            .unwrap_or_else(|| Err(NetworkError::Unknown("transport script exhausted".into())))
    }
}
