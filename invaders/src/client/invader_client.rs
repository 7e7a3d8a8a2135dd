use crate::domain::error::PipelineError;
use crate::domain::error::PipelineError::{ProtocolError, RemoteError};
use crate::domain::MetadataResponse;
use reqwest::Url;
use std::time::Instant;
use tracing::{debug, instrument};

/// Queries the flashes end-point for one player.
///
/// Single request, no retry. A payload whose `code` is not `0` is a
/// `RemoteError` carrying the server's message.
#[instrument(skip(client))]
pub async fn fetch_metadata(
    client: &reqwest::Client,
    endpoint: &Url,
    uid: &str,
) -> Result<MetadataResponse, PipelineError> {
    let timer = Instant::now();
    let target = endpoint.to_string();

    let response = client
        .get(endpoint.clone())
        .query(&[("uid", uid)])
        .send()
        .await
        .map_err(|err| PipelineError::transport(&target, &err))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| PipelineError::transport(&target, &err))?;

    let metadata: MetadataResponse = serde_json::from_str(&body).map_err(|err| ProtocolError {
        target: target.clone(),
        reason: format!("HTTP {status}, {err}"),
    })?;

    if metadata.code != 0 {
        return Err(RemoteError {
            target,
            message: metadata
                .message
                .unwrap_or_else(|| format!("code {} without message", metadata.code)),
        });
    }

    debug!(
        "Fetched {} invaders in {} ms",
        metadata.invaders.len(),
        timer.elapsed().as_millis()
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn endpoint(server: &MockServer) -> Url {
        server.url("/api/flashesV2/").parse().unwrap()
    }

    #[tokio::test]
    async fn returns_records_on_code_zero() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/api/flashesV2/").query_param("uid", "abc");
                then.status(200).json_body(json!({
                    "code": 0,
                    "invaders": {
                        "ship1": { "name": "ship1", "image": "http://x/1.jpg" },
                        "ship2": { "name": "ship2", "image": "http://x/2.jpg" }
                    }
                }));
            })
            .await;

        let metadata = fetch_metadata(&reqwest::Client::new(), &endpoint(&server), "abc")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(metadata.invaders.len(), 2);
        assert_eq!(metadata.invaders[0].name, "ship1");
    }

    #[tokio::test]
    async fn non_zero_code_is_remote_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/flashesV2/");
                then.status(200).json_body(json!({ "code": 1, "message": "bad uid" }));
            })
            .await;

        let err = fetch_metadata(&reqwest::Client::new(), &endpoint(&server), "abc")
            .await
            .unwrap_err();

        assert!(matches!(err, RemoteError { ref message, .. } if message == "bad uid"));
    }

    #[tokio::test]
    async fn invalid_json_is_protocol_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/flashesV2/");
                then.status(502).body("<html>Bad Gateway</html>");
            })
            .await;

        let err = fetch_metadata(&reqwest::Client::new(), &endpoint(&server), "abc")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let endpoint: Url = "http://127.0.0.1:1/api/flashesV2/".parse().unwrap();

        let err = fetch_metadata(&reqwest::Client::new(), &endpoint, "abc")
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "transport");
    }
}
