//! In-memory push source for driving `SensorFeed` in tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Notify};

use sensorfeed::{DataSource, PayloadStream, PipelineResult, SensorFeed, SourceError};

pub const WAIT: Duration = Duration::from_secs(2);

/// Event pushed to every open subscription.
#[derive(Clone, Debug)]
enum Push {
    Snapshot(Value),
    Fail(String),
}

pub struct ChannelSource {
    // ---
    pushes: broadcast::Sender<Push>,
    auth_fails: bool,
    subscribe_fails: bool,
    auth_gate: Option<Arc<Notify>>,
    pub auth_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
}

impl ChannelSource {
    // ---
    pub fn new() -> Self {
        Self {
            pushes: broadcast::channel(64).0,
            auth_fails: false,
            subscribe_fails: false,
            auth_gate: None,
            auth_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_auth(mut self) -> Self {
        self.auth_fails = true;
        self
    }

    pub fn failing_subscribe(mut self) -> Self {
        self.subscribe_fails = true;
        self
    }

    /// Sign-in blocks until `gate` is notified.
    pub fn gated_auth(mut self, gate: Arc<Notify>) -> Self {
        self.auth_gate = Some(gate);
        self
    }

    pub fn push(&self, snapshot: Value) {
        let _ = self.pushes.send(Push::Snapshot(snapshot));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.pushes.send(Push::Fail(reason.to_string()));
    }

    pub fn open_subscriptions(&self) -> usize {
        self.pushes.receiver_count()
    }

    /// Wait until exactly `n` subscriptions are open.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        // ---
        tokio::time::timeout(WAIT, async {
            while self.open_subscriptions() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("subscription count never reached target");
    }
}

#[async_trait]
impl DataSource for ChannelSource {
    // ---
    async fn ensure_anonymous_session(&self) -> Result<(), SourceError> {
        // ---
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.auth_gate {
            gate.notified().await;
        }
        if self.auth_fails {
            return Err(SourceError::Auth("sign-in disabled".into()));
        }
        Ok(())
    }

    async fn subscribe(&self, _path: &str) -> Result<PayloadStream, SourceError> {
        // ---
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.subscribe_fails {
            return Err(SourceError::Status {
                status: 401,
                body: "Permission denied".into(),
            });
        }

        let rx = self.pushes.subscribe();
        let payloads = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(Push::Snapshot(value)) => Some((Ok(value), rx)),
                Ok(Push::Fail(reason)) => Some((Err(SourceError::Cancelled(reason)), rx)),
                Err(_) => None,
            }
        });
        Ok(payloads.boxed())
    }
}

/// Forward every result a feed publishes into a channel.
pub fn record(feed: &SensorFeed) -> (mpsc::UnboundedReceiver<PipelineResult>, sensorfeed::Unsubscribe) {
    // ---
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = feed.subscribe(move |result| {
        let _ = tx.send(result.clone());
    });
    (rx, handle)
}

pub async fn next_result(rx: &mut mpsc::UnboundedReceiver<PipelineResult>) -> PipelineResult {
    // ---
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a published result")
        .expect("feed listener dropped")
}
