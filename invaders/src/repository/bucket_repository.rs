use crate::domain::error::PipelineError;
use crate::domain::error::PipelineError::{
    ConfigurationError, FilesystemError, RemoteError, TransportError,
};
use crate::domain::{image_format_for, InvaderRecord};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, StatusCode, Url};
use serde::Deserialize;
use std::time::Instant;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, instrument};

/// Uploads staged images through the Cloud Storage JSON API.
#[derive(Debug, Clone)]
pub struct BucketRepository {
    client: reqwest::Client,
    storage_url: Url,
    access_token: Option<String>,
    key_prefix: String,
}

#[derive(Deserialize)]
struct StorageErrorBody {
    error: StorageError,
}

#[derive(Deserialize)]
struct StorageError {
    message: String,
}

impl BucketRepository {
    /// Objects land under `<key_prefix>/`, one prefix per player.
    pub fn new(
        client: reqwest::Client,
        storage_url: Url,
        access_token: Option<String>,
        key_prefix: &str,
    ) -> BucketRepository {
        BucketRepository {
            client,
            storage_url,
            access_token,
            key_prefix: key_prefix.to_string(),
        }
    }

    /// Stable per record, so a second run overwrites instead of duplicating.
    pub fn object_key(&self, record: &InvaderRecord) -> Option<String> {
        let file_name = record.local_path.as_ref()?.file_name()?.to_str()?;
        Some(format!("{}/{file_name}", self.key_prefix))
    }

    #[instrument(skip(self, record), fields(invader = %record.name))]
    pub async fn upload_file(
        &self,
        record: InvaderRecord,
        bucket: &str,
    ) -> Result<InvaderRecord, PipelineError> {
        let timer = Instant::now();
        let (Some(local_path), Some(key)) = (record.local_path.clone(), self.object_key(&record))
        else {
            return Err(FilesystemError {
                path: record.key.clone(),
                reason: "record has no downloaded file to upload".to_string(),
            });
        };

        let file = File::open(&local_path)
            .await
            .map_err(|err| PipelineError::filesystem(local_path.display(), &err))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| PipelineError::filesystem(local_path.display(), &err))?
            .len();
        let mime_type = image_format_for(&key).to_mime_type();

        let url = self.upload_url(bucket)?;
        let mut request = self
            .client
            .post(url.clone())
            .query(&[("uploadType", "media"), ("name", key.as_str())])
            .header(CONTENT_TYPE, mime_type)
            .header(CONTENT_LENGTH, size)
            .body(Body::wrap_stream(ReaderStream::new(file)));
        if let Some(token) = &self.access_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request
            .send()
            .await
            .map_err(|err| PipelineError::transport(url.as_str(), &err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Upload of {key} to {bucket} answered HTTP {status}");
            return Err(rejection(url.as_str(), status, &body));
        }

        debug!(
            "Upload took {} ms for gs://{bucket}/{key} ({size} bytes)",
            timer.elapsed().as_millis()
        );
        Ok(record.with_remote_object(format!("gs://{bucket}/{key}")))
    }

    fn upload_url(&self, bucket: &str) -> Result<Url, PipelineError> {
        let mut url = self.storage_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConfigurationError {
                setting: "storage-url".to_string(),
                reason: format!("{} cannot be a base URL", self.storage_url),
            })?
            .pop_if_empty()
            .extend(["upload", "storage", "v1", "b", bucket, "o"]);
        Ok(url)
    }
}

/// Auth failures are transport-level; anything else the store refused keeps
/// its own message.
fn rejection(target: &str, status: StatusCode, body: &str) -> PipelineError {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return TransportError {
            target: target.to_string(),
            reason: format!("storage authentication failed with HTTP {status}"),
        };
    }
    let message = serde_json::from_str::<StorageErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| match body.trim() {
            "" => format!("HTTP {status}"),
            text => text.to_string(),
        });
    RemoteError {
        target: target.to_string(),
        message,
    }
}
