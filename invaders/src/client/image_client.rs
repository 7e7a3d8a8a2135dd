use crate::domain::error::PipelineError;
use crate::domain::error::PipelineError::{ProtocolError, RemoteError};
use crate::domain::{image_format_for, ExtensionProvider, InvaderRecord};
use futures_util::StreamExt;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

/// Streams the record's image into `target_dir`, which must already exist.
///
/// The returned record carries the local path; the file is flushed and
/// closed by then. Partial files are left behind on failure.
#[instrument(skip(client, record), fields(invader = %record.name))]
pub async fn download_image(
    client: &reqwest::Client,
    record: InvaderRecord,
    target_dir: &Path,
) -> Result<InvaderRecord, PipelineError> {
    let timer = Instant::now();
    let image = record.image.as_deref().ok_or_else(|| ProtocolError {
        target: record.key.clone(),
        reason: format!("invader {} has no image URL", record.name),
    })?;
    let url: Url = image.parse().map_err(|err| ProtocolError {
        target: image.to_string(),
        reason: format!("invalid image URL for {}: {err}", record.name),
    })?;
    let path = local_path_for(target_dir, &record.key, &url)?;

    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| PipelineError::transport(url.as_str(), &err))?;
    if !response.status().is_success() {
        return Err(RemoteError {
            target: url.to_string(),
            message: format!("image download answered HTTP {}", response.status()),
        });
    }

    let mut file = File::create(&path)
        .await
        .map_err(|err| PipelineError::filesystem(path.display(), &err))?;
    let mut body = response.bytes_stream();
    let mut written: usize = 0;
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| PipelineError::transport(url.as_str(), &err))?;
        file.write_all(&chunk)
            .await
            .map_err(|err| PipelineError::filesystem(path.display(), &err))?;
        written += chunk.len();
    }
    file.flush()
        .await
        .map_err(|err| PipelineError::filesystem(path.display(), &err))?;
    drop(file);

    debug!(
        "Download took {} ms for {} ({written} bytes)",
        timer.elapsed().as_millis(),
        path.display()
    );
    Ok(record.with_local_path(path))
}

/// `target_dir/<key>.<ext>`. Keys are unique per run and the extension never
/// contains a dot, so two records never share a file.
pub fn local_path_for(
    target_dir: &Path,
    key: &str,
    url: &Url,
) -> Result<PathBuf, PipelineError> {
    let unsafe_key =
        key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\', '\0']);
    if unsafe_key {
        return Err(ProtocolError {
            target: url.to_string(),
            reason: format!("invader key {key:?} is not usable as a file name"),
        });
    }
    let extension = image_format_for(url.path()).get_format_extension();
    Ok(target_dir.join(format!("{key}.{extension}")))
}
