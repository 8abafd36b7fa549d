use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::future::retry;
use serde::de::DeserializeOwned;
use tracing::warn;

/// Exponential backoff between 1s and 20s, giving up after `max_elapsed`.
pub fn backoff_policy(max_elapsed: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(20),
        max_elapsed_time: Some(max_elapsed),
        ..Default::default()
    }
}

/// Outcome of a single attempt against a remote API.
pub enum Attempt<T> {
    Done(T),
    /// Worth retrying: transport errors, 429 and 5xx responses.
    Transient(anyhow::Error),
    /// Retrying cannot help: 4xx responses, malformed payloads.
    Permanent(anyhow::Error),
}

/// Classify an HTTP status that is not a success.
pub fn classify_status<T>(status: reqwest::StatusCode, error: anyhow::Error) -> Attempt<T> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Attempt::Transient(error)
    } else {
        Attempt::Permanent(error)
    }
}

/// Run `op` until it succeeds, fails permanently, or the policy gives up.
pub async fn with_retry<T, F, Fut>(
    what: &str,
    policy: ExponentialBackoff,
    op: F,
) -> anyhow::Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let op = &op;
    retry(policy, move || async move {
        match op().await {
            Attempt::Done(value) => Ok(value),
            Attempt::Transient(e) => {
                warn!("{what} attempt failed: {e}");
                Err(backoff::Error::transient(e))
            }
            Attempt::Permanent(e) => Err(backoff::Error::permanent(e)),
        }
    })
    .await
}

/// Send the request produced by `build`, retrying transient failures, and
/// decode the JSON response body.
pub async fn send_json<T, B>(what: &str, policy: ExponentialBackoff, build: B) -> anyhow::Result<T>
where
    T: DeserializeOwned,
    B: Fn() -> reqwest::RequestBuilder,
{
    let build = &build;
    with_retry(what, policy, move || async move {
        let resp = match build().send().await {
            Ok(resp) => resp,
            Err(e) => return Attempt::Transient(e.into()),
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return classify_status(status, anyhow::anyhow!("{what} error ({status}): {body}"));
        }
        match resp.json::<T>().await {
            Ok(value) => Attempt::Done(value),
            Err(e) => Attempt::Permanent(e.into()),
        }
    })
    .await
}
