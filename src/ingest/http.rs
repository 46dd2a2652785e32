/// Shared blocking HTTP plumbing: client construction and retry with
/// exponential backoff.

use std::thread;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::Fetch;
use crate::model::{HarvestError, Result};

/// Builds the blocking client used by every harvester.
pub fn build_client(fetch: &Fetch) -> Result<Client> {
    let client = Client::builder()
        .timeout(fetch.timeout())
        .user_agent(fetch.user_agent.clone())
        .build()?;
    Ok(client)
}

/// Server-side or throttling responses worth another attempt.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Sends the request built by `make_request`, retrying transport errors and
/// retryable statuses up to `fetch.retries` extra times.
///
/// Returns the first successful response, or the last failure as
/// `HarvestError::Http` / `HarvestError::Request`.
pub fn send_with_retry<F>(fetch: &Fetch, make_request: F) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0;
    loop {
        let last_error = match make_request().send() {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) => {
                let status = response.status();
                if !is_retryable_status(status) {
                    return Err(HarvestError::Http(status.as_u16()));
                }
                HarvestError::Http(status.as_u16())
            }
            Err(e) => HarvestError::Request(e),
        };

        if attempt >= fetch.retries {
            return Err(last_error);
        }
        log::debug!(
            "retrying after {} (attempt {}/{})",
            last_error,
            attempt + 1,
            fetch.retries
        );
        thread::sleep(fetch.backoff(attempt));
        attempt += 1;
    }
}

/// Reads a successful response body as JSON.
pub fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let body = response.text()?;
    Ok(serde_json::from_str(&body)?)
}

/// GET `url` and deserialize the JSON body, with retry.
pub fn get_json<T: DeserializeOwned>(client: &Client, url: &str, fetch: &Fetch) -> Result<T> {
    let response = send_with_retry(fetch, || {
        client.get(url).header("Accept", "application/json")
    })?;
    read_json(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_build_client_with_defaults() {
        assert!(build_client(&Fetch::default()).is_ok());
    }

    #[test]
    fn test_unreachable_host_fails_after_retries() {
        let fetch = Fetch {
            retries: 1,
            backoff_secs: 0.0,
            timeout_secs: 2,
            ..Fetch::default()
        };
        let client = build_client(&fetch).unwrap();
        // port 9 (discard) on loopback refuses connections immediately
        let result: Result<serde_json::Value> = get_json(&client, "http://127.0.0.1:9/", &fetch);
        assert!(matches!(result, Err(HarvestError::Request(_))));
    }
}
