use crate::client::image_client::download_image;
use crate::client::invader_client::fetch_metadata;
use crate::config::{FanOut, Mode, Settings};
use crate::domain::error::PipelineError;
use crate::domain::InvaderRecord;
use crate::repository::bucket_repository::BucketRepository;
use crate::repository::volume_repository::VolumeRepository;
use futures::stream::{self, StreamExt};
use std::num::NonZeroUsize;
use std::time::Instant;
use tracing::{error, info, instrument, warn};

/// Outcome of one run. Every record ends up in exactly one bucket.
#[derive(Debug, Default)]
pub struct RunReport {
    pub saved: Vec<InvaderRecord>,
    /// Failed records by key.
    pub failed: Vec<(String, PipelineError)>,
    /// Records never attempted because sequential mode stopped early.
    pub skipped: usize,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, key: String, outcome: Result<InvaderRecord, PipelineError>) {
        match outcome {
            Ok(saved) => {
                info!(
                    invader = %saved.name,
                    key = %saved.key,
                    path = ?saved.local_path,
                    remote = saved.remote_object.as_deref(),
                    "Saved {}",
                    saved.name
                );
                self.saved.push(saved);
            }
            Err(err) => {
                error!(key = %key, kind = err.kind(), "Failed to save {key}: {err}");
                self.failed.push((key, err));
            }
        }
    }
}

/// Fetch, download and optionally upload every invader of one player.
pub struct Pipeline {
    client: reqwest::Client,
    settings: Settings,
}

impl Pipeline {
    pub fn new(client: reqwest::Client, settings: Settings) -> Pipeline {
        Pipeline { client, settings }
    }

    /// Drives the whole run and logs every outcome. `Err` means nothing was
    /// processed: the fetch or the staging directory failed.
    #[instrument(skip(self), fields(uid = %self.settings.uid))]
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let timer = Instant::now();

        let metadata = fetch_metadata(&self.client, &self.settings.api_url, &self.settings.uid)
            .await
            .map_err(|err| {
                error!(kind = err.kind(), "Could not fetch invaders: {err}");
                err
            })?;

        let volume = VolumeRepository::new(self.settings.staging_dir.clone());
        volume.ensure_dir().await.map_err(|err| {
            error!(kind = err.kind(), "Could not prepare staging directory: {err}");
            err
        })?;

        let records = metadata.invaders;
        info!(
            "Fetched {} invaders into {}",
            records.len(),
            volume.root().display()
        );

        let uploader = match &self.settings.mode {
            Mode::DownloadOnly => None,
            Mode::DownloadAndUpload { bucket } => Some((
                BucketRepository::new(
                    self.client.clone(),
                    self.settings.storage_url.clone(),
                    self.settings.access_token.clone(),
                    &self.settings.uid,
                ),
                bucket.as_str(),
            )),
        };
        let stage = Stage {
            client: &self.client,
            volume: &volume,
            uploader: uploader.as_ref().map(|(repository, bucket)| (repository, *bucket)),
        };

        let report = match self.settings.fan_out {
            FanOut::Concurrent { max_in_flight } => {
                run_concurrent(&stage, records, max_in_flight).await
            }
            FanOut::Sequential { limit } => run_sequential(&stage, records, limit).await,
        };

        info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            skipped = report.skipped,
            "Run finished in {} ms",
            timer.elapsed().as_millis()
        );
        Ok(report)
    }
}

/// What one record goes through: download, then upload when a bucket is set.
struct Stage<'a> {
    client: &'a reqwest::Client,
    volume: &'a VolumeRepository,
    uploader: Option<(&'a BucketRepository, &'a str)>,
}

impl Stage<'_> {
    async fn process(&self, record: InvaderRecord) -> Result<InvaderRecord, PipelineError> {
        let target_dir = self.volume.ensure_dir().await?;
        let downloaded = download_image(self.client, record, target_dir).await?;
        match self.uploader {
            Some((repository, bucket)) => repository.upload_file(downloaded, bucket).await,
            None => Ok(downloaded),
        }
    }
}

/// All records in flight on the current task; a failure never stops siblings.
async fn run_concurrent(
    stage: &Stage<'_>,
    records: Vec<InvaderRecord>,
    max_in_flight: Option<NonZeroUsize>,
) -> RunReport {
    let in_flight = max_in_flight.map_or(records.len().max(1), NonZeroUsize::get);
    let mut outcomes = stream::iter(records)
        .map(|record| async move {
            let key = record.key.clone();
            (key, stage.process(record).await)
        })
        .buffer_unordered(in_flight);

    let mut report = RunReport::default();
    while let Some((key, outcome)) = outcomes.next().await {
        report.record(key, outcome);
    }
    report
}

/// One record at a time in server order. The first failure ends the run.
async fn run_sequential(
    stage: &Stage<'_>,
    records: Vec<InvaderRecord>,
    limit: Option<usize>,
) -> RunReport {
    let mut pending = records.into_iter().take(limit.unwrap_or(usize::MAX));
    let mut report = RunReport::default();
    while let Some(record) = pending.next() {
        let key = record.key.clone();
        let outcome = stage.process(record).await;
        let failed = outcome.is_err();
        report.record(key, outcome);
        if failed {
            report.skipped = pending.count();
            warn!("Stopping after failure, {} invaders not attempted", report.skipped);
            break;
        }
    }
    report
}
