//! Realtime-database client over the REST streaming API.
//!
//! Anonymous sign-in goes through the identity toolkit `accounts:signUp`
//! endpoint; the resulting session is kept for the life of the process and
//! shared by every subscription opened through the same [`FirebaseSource`].
//! ID tokens expire after an hour, at which point the server sends
//! `auth_revoked`; the session is then refreshed through the secure token
//! endpoint and the subscription reopened with the new token.
//!
//! A subscription is a long-lived `GET {db}/{path}.json` with
//! `Accept: text/event-stream`. The server sends `put` / `patch` events
//! relative to the subscribed path; we keep a local copy of the value at the
//! path and yield the whole of it after every change, which is what the
//! pipeline expects as a snapshot.
//!
//! # API Reference
//!
//! See: <https://firebase.google.com/docs/reference/rest/database#section-streaming>
//! and <https://firebase.google.com/docs/reference/rest/auth#section-refresh-token>

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{DataSource, PayloadStream, SourceError};

/// Default identity toolkit endpoint used for anonymous sign-in.
pub const DEFAULT_AUTH_BASE_URL: &str = "https://identitytoolkit.googleapis.com";

/// Default secure token endpoint used to refresh an expired ID token.
pub const DEFAULT_TOKEN_BASE_URL: &str = "https://securetoken.googleapis.com";

/// Consecutive `auth_revoked` events tolerated on one subscription before it
/// gives up. A delivered snapshot resets the count.
pub const MAX_REAUTH_ATTEMPTS: u32 = 3;

// ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
}

/// The secure token endpoint answers in snake_case.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
}

/// Body of `put` and `patch` events.
#[derive(Debug, Deserialize)]
struct PathUpdate {
    path: String,
    data: Value,
}

#[derive(Debug, Clone)]
struct Session {
    id_token: String,
    refresh_token: String,
}

/// Client for one realtime database.
pub struct FirebaseSource {
    inner: Arc<Connection>,
}

/// State shared between the source and the streams it hands out, which
/// need it to reauthenticate after the source call has returned.
struct Connection {
    client: reqwest::Client,
    database_url: String,
    api_key: String,
    auth_base_url: String,
    token_base_url: String,
    /// Held across sign-in so concurrent callers share one session.
    session: Mutex<Option<Session>>,
}

impl FirebaseSource {
    // ---
    pub fn new(database_url: &str, api_key: &str) -> Self {
        Self::with_endpoints(
            database_url,
            api_key,
            DEFAULT_AUTH_BASE_URL,
            DEFAULT_TOKEN_BASE_URL,
        )
    }

    /// Create a client with custom identity and token endpoints (emulators,
    /// tests).
    pub fn with_endpoints(
        database_url: &str,
        api_key: &str,
        auth_base_url: &str,
        token_base_url: &str,
    ) -> Self {
        // ---
        Self {
            inner: Arc::new(Connection {
                client: reqwest::Client::new(),
                database_url: database_url.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
                auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
                token_base_url: token_base_url.trim_end_matches('/').to_string(),
                session: Mutex::new(None),
            }),
        }
    }

    /// Exchange the session's refresh token for a new ID token, signing in
    /// from scratch if there is no session yet.
    pub async fn refresh_session(&self) -> Result<(), SourceError> {
        self.inner.refresh_session().await
    }

    /// Current ID token, if signed in.
    pub async fn id_token(&self) -> Option<String> {
        self.inner.session.lock().await.as_ref().map(|s| s.id_token.clone())
    }

    fn stream_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.inner.database_url, path.trim_matches('/'))
    }
}

impl Connection {
    // ---
    async fn ensure_session(&self) -> Result<(), SourceError> {
        // ---
        let mut session = self.session.lock().await;
        if session.is_none() {
            *session = Some(self.sign_in_anonymously().await?);
        }
        Ok(())
    }

    async fn refresh_session(&self) -> Result<(), SourceError> {
        // ---
        let mut session = self.session.lock().await;
        let renewed = match session.as_ref() {
            Some(current) => self.exchange_refresh_token(&current.refresh_token).await?,
            None => self.sign_in_anonymously().await?,
        };
        *session = Some(renewed);
        Ok(())
    }

    async fn sign_in_anonymously(&self) -> Result<Session, SourceError> {
        // ---
        let url = format!("{}/v1/accounts:signUp", self.auth_base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({ "returnSecureToken": true }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("{}: {}", status, body)));
        }

        let signed_in: SignUpResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(e.to_string()))?;

        info!("Signed in anonymously as {}", signed_in.local_id);
        Ok(Session {
            id_token: signed_in.id_token,
            refresh_token: signed_in.refresh_token,
        })
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<Session, SourceError> {
        // ---
        let url = format!("{}/v1/token", self.token_base_url);
        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Auth(format!("token refresh {}: {}", status, body)));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Auth(e.to_string()))?;

        info!("Refreshed anonymous session token");
        Ok(Session {
            id_token: refreshed.id_token,
            refresh_token: refreshed.refresh_token,
        })
    }

    async fn open(&self, url: &str) -> Result<PayloadStream, SourceError> {
        // ---
        debug!("Opening event stream: {}", url);

        let token = self.session.lock().await.as_ref().map(|s| s.id_token.clone());
        let mut request = self.client.get(url).header(ACCEPT, "text/event-stream");
        if let Some(token) = &token {
            request = request.query(&[("auth", token.as_str())]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(snapshot_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl DataSource for FirebaseSource {
    // ---
    async fn ensure_anonymous_session(&self) -> Result<(), SourceError> {
        self.inner.ensure_session().await
    }

    async fn subscribe(&self, path: &str) -> Result<PayloadStream, SourceError> {
        // ---
        let url = self.stream_url(path);
        let first = self.inner.open(&url).await?;
        info!("Event stream open for /{}", path.trim_matches('/'));

        let connection = self.inner.clone();
        Ok(reauthenticating(first, move || {
            let connection = connection.clone();
            let url = url.clone();
            async move {
                connection.refresh_session().await?;
                connection.open(&url).await
            }
        }))
    }
}

// ---

/// Follow `first`, and whenever it ends with [`SourceError::AuthRevoked`]
/// call `reopen` and carry on with the stream it returns.
///
/// Gives up (passing the revocation through) after [`MAX_REAUTH_ATTEMPTS`]
/// revocations without a snapshot in between. A failed `reopen` ends the
/// stream with its error.
pub fn reauthenticating<F, Fut>(first: PayloadStream, reopen: F) -> PayloadStream
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<PayloadStream, SourceError>> + Send + 'static,
{
    // ---
    struct Resume<F> {
        current: Option<PayloadStream>,
        reopen: F,
        attempts: u32,
    }

    let state = Resume {
        current: Some(first),
        reopen,
        attempts: 0,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let item = state.current.as_mut()?.next().await;
            match item {
                Some(Ok(snapshot)) => {
                    state.attempts = 0;
                    return Some((Ok(snapshot), state));
                }
                Some(Err(SourceError::AuthRevoked)) if state.attempts < MAX_REAUTH_ATTEMPTS => {
                    state.attempts += 1;
                    warn!(
                        "Credentials revoked, reauthenticating (attempt {} of {})",
                        state.attempts, MAX_REAUTH_ATTEMPTS
                    );
                    // Release the old connection before opening the next one
                    state.current = None;
                    match (state.reopen)().await {
                        Ok(next) => state.current = Some(next),
                        Err(e) => return Some((Err(e), state)),
                    }
                }
                Some(Err(e)) => {
                    state.current = None;
                    return Some((Err(e), state));
                }
                None => return None,
            }
        }
    })
    .boxed()
}

/// Turn a raw `text/event-stream` body into a stream of full snapshots.
pub fn snapshot_stream<S, B, E>(bytes: S) -> PayloadStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<SourceError> + Send + 'static,
{
    // ---
    let state = EventState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        tree: Value::Null,
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for event in state.decoder.feed(chunk.as_ref()) {
                        state.apply(event);
                    }
                }
                Some(Err(e)) => {
                    state.ready.push_back(Err(e.into()));
                    state.finished = true;
                }
                None => {
                    debug!("Event stream closed by server");
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

struct EventState<S> {
    bytes: std::pin::Pin<Box<S>>,
    decoder: SseDecoder,
    tree: Value,
    ready: VecDeque<Result<Value, SourceError>>,
    finished: bool,
}

impl<S> EventState<S> {
    // ---
    fn apply(&mut self, event: SseEvent) {
        // ---
        if self.finished {
            return;
        }

        match event.event.as_str() {
            "put" | "patch" => match serde_json::from_str::<PathUpdate>(&event.data) {
                Ok(update) if event.event == "put" => {
                    set_at(&mut self.tree, &update.path, update.data);
                    self.ready.push_back(Ok(self.tree.clone()));
                }
                Ok(update) => {
                    match update.data {
                        Value::Object(children) => {
                            for (key, child) in children {
                                let child_path =
                                    format!("{}/{}", update.path.trim_end_matches('/'), key);
                                set_at(&mut self.tree, &child_path, child);
                            }
                        }
                        other => set_at(&mut self.tree, &update.path, other),
                    }
                    self.ready.push_back(Ok(self.tree.clone()));
                }
                Err(e) => {
                    warn!("Skipping undecodable {} event: {}", event.event, e);
                }
            },
            "keep-alive" => {}
            "cancel" => {
                self.ready.push_back(Err(SourceError::Cancelled(event.data)));
                self.finished = true;
            }
            "auth_revoked" => {
                self.ready.push_back(Err(SourceError::AuthRevoked));
                self.finished = true;
            }
            other => debug!("Ignoring event type {}", other),
        }
    }
}

/// Write `data` at a slash-separated `path` under `root`; `null` deletes.
pub fn set_at(root: &mut Value, path: &str, data: Value) {
    // ---
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *root = data;
        return;
    };

    let mut node = root;
    for segment in parents {
        node = object_mut(node)
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let parent = object_mut(node);
    if data.is_null() {
        parent.shift_remove(*last);
    } else {
        parent.insert(last.to_string(), data);
    }
}

/// View `value` as an object, converting arrays to index-keyed objects and
/// replacing any scalar.
fn object_mut(value: &mut Value) -> &mut Map<String, Value> {
    // ---
    if !value.is_object() {
        let converted = match value.take() {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .filter(|(_, v)| !v.is_null())
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => Map::new(),
        };
        *value = Value::Object(converted);
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just made an object"),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::Uri;
    use axum::{Json, Router};

    fn body(chunks: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], SourceError>> {
        stream::iter(chunks.iter().map(|c| Ok(c.as_bytes())).collect::<Vec<_>>())
    }

    fn revoked_body() -> PayloadStream {
        snapshot_stream(body(&["event: auth_revoked\ndata: token expired\n\n"]))
    }

    /// Identity and secure token endpoints on an ephemeral port.
    async fn spawn_identity_server() -> String {
        // ---
        let app = Router::new().fallback(|uri: Uri, form: String| async move {
            match uri.path() {
                "/v1/accounts:signUp" => Json(json!({
                    "idToken": "id-1",
                    "refreshToken": "refresh-1",
                    "localId": "anon"
                })),
                "/v1/token" if form.contains("grant_type=refresh_token") => {
                    let previous = form
                        .split('&')
                        .find_map(|pair| pair.strip_prefix("refresh_token="))
                        .unwrap_or_default()
                        .to_string();
                    Json(json!({
                        "id_token": format!("id-after-{previous}"),
                        "refresh_token": "refresh-2",
                        "expires_in": "3600"
                    }))
                }
                _ => Json(json!({})),
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_set_at_root_and_nested() {
        // ---
        let mut tree = Value::Null;
        set_at(&mut tree, "/", json!({ "a": { "rt_ms": 1 } }));
        set_at(&mut tree, "/b", json!({ "rt_ms": 2 }));
        set_at(&mut tree, "/a/rt_ms", json!(5));
        assert_eq!(tree, json!({ "a": { "rt_ms": 5 }, "b": { "rt_ms": 2 } }));

        set_at(&mut tree, "/a", Value::Null);
        assert_eq!(tree, json!({ "b": { "rt_ms": 2 } }));
    }

    #[test]
    fn test_set_at_over_array() {
        // ---
        let mut tree = json!([{ "rt_ms": 1 }, { "rt_ms": 2 }]);
        set_at(&mut tree, "/2", json!({ "rt_ms": 3 }));
        assert_eq!(
            tree,
            json!({ "0": { "rt_ms": 1 }, "1": { "rt_ms": 2 }, "2": { "rt_ms": 3 } })
        );
    }

    #[tokio::test]
    async fn test_put_and_patch_yield_full_snapshots() {
        // ---
        let payloads = snapshot_stream(body(&[
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"k1\":{\"rt_ms\":1}}}\n\n",
            "event: keep-alive\ndata: null\n\n",
            "event: patch\ndata: {\"path\":\"/\",\"data\":{\"k2\":{\"rt_ms\":2}}}\n\n",
            "event: put\ndata: {\"path\":\"/k1\",\"data\":null}\n\n",
        ]));

        let snapshots: Vec<Value> = payloads.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            snapshots,
            vec![
                json!({ "k1": { "rt_ms": 1 } }),
                json!({ "k1": { "rt_ms": 1 }, "k2": { "rt_ms": 2 } }),
                json!({ "k2": { "rt_ms": 2 } }),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_ends_stream_with_error() {
        // ---
        let mut payloads = snapshot_stream(body(&[
            "event: put\ndata: {\"path\":\"/\",\"data\":null}\n\n",
            "event: cancel\ndata: permission denied\n\n",
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"x\":1}}\n\n",
        ]));

        assert_eq!(payloads.next().await.unwrap().unwrap(), Value::Null);
        assert!(matches!(
            payloads.next().await,
            Some(Err(SourceError::Cancelled(reason))) if reason == "permission denied"
        ));
        assert!(payloads.next().await.is_none());
    }

    #[tokio::test]
    async fn test_auth_revoked_and_bad_payloads() {
        // ---
        let mut payloads = snapshot_stream(body(&[
            "event: put\ndata: {not json}\n\n",
            "event: auth_revoked\ndata: credential is no longer valid\n\n",
        ]));

        assert!(matches!(
            payloads.next().await,
            Some(Err(SourceError::AuthRevoked))
        ));
        assert!(payloads.next().await.is_none());
    }

    #[tokio::test]
    async fn test_revoked_subscription_resumes_after_reauth() {
        // ---
        let first = snapshot_stream(body(&[
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"a\":{\"rt_ms\":1}}}\n\n",
            "event: auth_revoked\ndata: credential is no longer valid\n\n",
        ]));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let payloads = reauthenticating(first, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Ok::<_, SourceError>(snapshot_stream(body(&[
                    "event: put\ndata: {\"path\":\"/\",\"data\":{\"b\":{\"rt_ms\":2}}}\n\n",
                ])))
            }
        });

        let snapshots: Vec<Value> = payloads.map(|r| r.unwrap()).collect().await;
        assert_eq!(
            snapshots,
            vec![json!({ "a": { "rt_ms": 1 } }), json!({ "b": { "rt_ms": 2 } })]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_repeated_revocation_gives_up() {
        // ---
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut payloads = reauthenticating(revoked_body(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SourceError>(revoked_body()) }
        });

        assert!(matches!(
            payloads.next().await,
            Some(Err(SourceError::AuthRevoked))
        ));
        assert!(payloads.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_REAUTH_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn test_failed_reauth_ends_stream() {
        // ---
        let mut payloads = reauthenticating(revoked_body(), || async {
            Err::<PayloadStream, _>(SourceError::Auth("INVALID_REFRESH_TOKEN".into()))
        });

        assert!(matches!(
            payloads.next().await,
            Some(Err(SourceError::Auth(reason))) if reason == "INVALID_REFRESH_TOKEN"
        ));
        assert!(payloads.next().await.is_none());
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        // ---
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let first = snapshot_stream(body(&["event: cancel\ndata: permission denied\n\n"]));
        let mut payloads = reauthenticating(first, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, SourceError>(revoked_body()) }
        });

        assert!(matches!(
            payloads.next().await,
            Some(Err(SourceError::Cancelled(_)))
        ));
        assert!(payloads.next().await.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_session_token() {
        // ---
        let base = spawn_identity_server().await;
        let source = FirebaseSource::with_endpoints("http://127.0.0.1:9", "key", &base, &base);
        assert_eq!(source.id_token().await, None);

        source.ensure_anonymous_session().await.unwrap();
        source.ensure_anonymous_session().await.unwrap();
        assert_eq!(source.id_token().await.as_deref(), Some("id-1"));

        source.refresh_session().await.unwrap();
        assert_eq!(source.id_token().await.as_deref(), Some("id-after-refresh-1"));

        // The rotated refresh token is the one used next time
        source.refresh_session().await.unwrap();
        assert_eq!(source.id_token().await.as_deref(), Some("id-after-refresh-2"));
    }

    #[tokio::test]
    async fn test_refresh_without_session_signs_in() {
        // ---
        let base = spawn_identity_server().await;
        let source = FirebaseSource::with_endpoints("http://127.0.0.1:9", "key", &base, &base);

        source.refresh_session().await.unwrap();
        assert_eq!(source.id_token().await.as_deref(), Some("id-1"));
    }

    #[test]
    fn test_stream_url() {
        // ---
        let source = FirebaseSource::new("https://demo.firebaseio.com/", "key");
        assert_eq!(
            source.stream_url("/sensor_data/merged/"),
            "https://demo.firebaseio.com/sensor_data/merged.json"
        );
    }
}
