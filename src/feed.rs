//! Live sensor feed: keeps the current [`PipelineResult`] for one path of a
//! [`DataSource`] and pushes every recompute to its listeners.
//!
//! Lifecycle of an attached feed:
//! 1. publish the empty result (what listeners see before any data)
//! 2. best-effort anonymous sign-in; failure is logged and ignored
//! 3. subscribe to the path; every snapshot is run through the pipeline and
//!    replaces the published result wholesale
//! 4. on a subscription error or a closed stream, publish the empty result
//!    and stop. There is no retry here.
//!
//! [`SensorFeed::detach`] is idempotent. Once it returns, no listener is
//! called again and the published result no longer changes, even if the
//! sign-in or a snapshot was still in flight.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::{Mutex, ReentrantMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::PipelineResult;
use crate::pipeline;
use crate::source::DataSource;

// ---

type Listener = Arc<dyn Fn(&PipelineResult) + Send + Sync>;

struct State {
    // ---
    live: bool,
    latest: PipelineResult,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

struct Shared {
    // ---
    /// Held for the whole of a publish, listener calls included, so that
    /// `detach` waits out an in-flight publish. Reentrant so a listener may
    /// detach or subscribe from inside its callback.
    publishing: ReentrantMutex<()>,
    state: Mutex<State>,
    cancel: CancellationToken,
}

/// Handle to a feed. Clones share the same state.
#[derive(Clone)]
pub struct SensorFeed {
    shared: Arc<Shared>,
}

/// Returned by [`SensorFeed::subscribe`]; removes the listener.
pub struct Unsubscribe {
    shared: Arc<Shared>,
    id: u64,
}

impl SensorFeed {
    // ---
    /// A feed that is not connected to anything. It only ever holds the
    /// empty result unless something calls [`publish`](Self::publish).
    pub fn detached() -> Self {
        // ---
        Self {
            shared: Arc::new(Shared {
                publishing: ReentrantMutex::new(()),
                state: Mutex::new(State {
                    live: true,
                    latest: PipelineResult::empty(),
                    listeners: Vec::new(),
                    next_listener_id: 0,
                }),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Start following `path` on `source`. Must be called from within a
    /// tokio runtime; the subscription runs on a spawned task.
    pub fn attach(source: Arc<dyn DataSource>, path: impl Into<String>) -> Self {
        // ---
        let feed = Self::detached();
        tokio::spawn(follow(source, path.into(), feed.clone()));
        feed
    }

    /// Clone of the most recently published result.
    pub fn latest(&self) -> PipelineResult {
        self.shared.state.lock().latest.clone()
    }

    pub fn is_live(&self) -> bool {
        self.shared.state.lock().live
    }

    /// Register `listener`. It is called right away with the latest result and
    /// then once per publish, in publish order. On a detached feed nothing is
    /// registered and the listener is never called.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&PipelineResult) + Send + Sync + 'static,
    {
        // ---
        let listener: Listener = Arc::new(listener);
        let _publishing = self.shared.publishing.lock();

        let (id, initial) = {
            let mut state = self.shared.state.lock();
            let id = state.next_listener_id;
            state.next_listener_id += 1;
            let initial = state.live.then(|| {
                state.listeners.push((id, listener.clone()));
                state.latest.clone()
            });
            (id, initial)
        };

        if let Some(latest) = initial {
            listener(&latest);
        }

        Unsubscribe {
            shared: self.shared.clone(),
            id,
        }
    }

    /// Replace the published result and notify listeners. Returns `false`
    /// (and changes nothing) once the feed has been detached.
    pub fn publish(&self, result: PipelineResult) -> bool {
        // ---
        let _publishing = self.shared.publishing.lock();

        let listeners: Vec<Listener> = {
            let mut state = self.shared.state.lock();
            if !state.live {
                return false;
            }
            state.latest = result.clone();
            state.listeners.iter().map(|(_, l)| l.clone()).collect()
        };

        for listener in listeners {
            listener(&result);
        }
        true
    }

    /// Tear the feed down: stop the subscription task, drop every listener
    /// and freeze the published result. Safe to call more than once.
    pub fn detach(&self) {
        // ---
        self.shared.cancel.cancel();

        let _publishing = self.shared.publishing.lock();
        let mut state = self.shared.state.lock();
        if state.live {
            debug!("Detaching sensor feed ({} listeners)", state.listeners.len());
            state.live = false;
            state.listeners.clear();
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }
}

impl Unsubscribe {
    // ---
    /// Remove the listener. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let _publishing = self.shared.publishing.lock();
        self.shared
            .state
            .lock()
            .listeners
            .retain(|(id, _)| *id != self.id);
    }
}

// ---

async fn follow(source: Arc<dyn DataSource>, path: String, feed: SensorFeed) {
    // ---
    let cancel = feed.cancellation();

    let signed_in = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        res = source.ensure_anonymous_session() => res,
    };
    if let Err(e) = signed_in {
        warn!("Anonymous sign-in failed, subscribing anyway: {}", e);
    }

    let subscribed = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        res = source.subscribe(&path) => res,
    };
    let mut payloads = match subscribed {
        Ok(payloads) => payloads,
        Err(e) => {
            error!("Subscription to /{} failed: {}", path, e);
            feed.publish(PipelineResult::empty());
            return;
        }
    };

    info!("Following /{}", path);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = payloads.next() => match next {
                Some(Ok(raw)) => {
                    let result = pipeline::run(&raw);
                    debug!(
                        "Snapshot for /{}: current={} history={}",
                        path,
                        result.current.is_some(),
                        result.history.len()
                    );
                    if !feed.publish(result) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!("Subscription to /{} failed: {}", path, e);
                    feed.publish(PipelineResult::empty());
                    break;
                }
                None => {
                    warn!("Subscription to /{} closed by source", path);
                    feed.publish(PipelineResult::empty());
                    break;
                }
            }
        }
    }
    debug!("Stopped following /{}", path);
}
