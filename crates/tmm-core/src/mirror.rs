//! The mirror job: channel → filter → download → convert → upload → mark.
//!
//! One message at a time, in channel order. Only setup failures (auth, channel
//! resolution) abort a run; every per-message failure is logged and skipped so
//! the next run can retry it.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    dedup::DedupStore,
    domain::{object_key, normalize_prefix, ChannelHandle, DateWindow, MediaAttachment, Message, MessageId},
    ports::{ChannelReader, MediaConverter, ObjectStore},
    utils::{AuditEvent, AuditLogger},
    Result,
};

#[derive(Clone, Debug)]
pub struct MirrorOptions {
    pub handle: ChannelHandle,
    pub window: DateWindow,
    pub key_prefix: Option<String>,
    /// Enumerate and filter only; no download, upload or mark.
    pub dry_run: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Convert,
    Upload,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Convert => "convert",
            Stage::Upload => "upload",
        }
    }
}

/// Terminal state of one message within a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    OutsideWindow,
    NoMedia,
    UnsupportedMedia,
    AlreadyProcessed,
    /// Dry run: the message would have been mirrored.
    Eligible,
    /// Stored under `key`. `marked` is false when the dedup write failed.
    Uploaded { key: String, marked: bool },
    Failed { stage: Stage, error: String },
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct MirrorReport {
    pub channel: String,
    pub seen: usize,
    pub outside_window: usize,
    pub no_media: usize,
    pub unsupported: usize,
    pub already_processed: usize,
    pub eligible: usize,
    pub uploaded: usize,
    pub unmarked: usize,
    pub failed: usize,
    /// Set when reading the channel broke off mid-run.
    pub read_error: Option<String>,
    #[serde(skip)]
    pub outcomes: Vec<(MessageId, MessageOutcome)>,
}

impl MirrorReport {
    fn record(&mut self, id: MessageId, outcome: MessageOutcome) {
        match &outcome {
            MessageOutcome::OutsideWindow => self.outside_window += 1,
            MessageOutcome::NoMedia => self.no_media += 1,
            MessageOutcome::UnsupportedMedia => self.unsupported += 1,
            MessageOutcome::AlreadyProcessed => self.already_processed += 1,
            MessageOutcome::Eligible => self.eligible += 1,
            MessageOutcome::Uploaded { marked, .. } => {
                self.uploaded += 1;
                if !marked {
                    self.unmarked += 1;
                }
            }
            MessageOutcome::Failed { .. } => self.failed += 1,
        }
        self.outcomes.push((id, outcome));
    }

    /// Keys uploaded during this run, in processing order.
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                MessageOutcome::Uploaded { key, .. } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Wires the ports together for a single run. The dedup store is injected and
/// owned by the caller for the duration of the run.
pub struct MirrorJob<'a> {
    reader: &'a dyn ChannelReader,
    converter: &'a dyn MediaConverter,
    store: &'a dyn ObjectStore,
    dedup: &'a mut dyn DedupStore,
    audit: Option<&'a AuditLogger>,
}

impl<'a> MirrorJob<'a> {
    pub fn new(
        reader: &'a dyn ChannelReader,
        converter: &'a dyn MediaConverter,
        store: &'a dyn ObjectStore,
        dedup: &'a mut dyn DedupStore,
    ) -> Self {
        Self {
            reader,
            converter,
            store,
            dedup,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: &'a AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn run(&mut self, opts: &MirrorOptions) -> Result<MirrorReport> {
        let prefix = normalize_prefix(opts.key_prefix.as_deref());
        let channel = self.reader.resolve(&opts.handle).await?;
        info!(
            channel = %channel.title,
            id = channel.id,
            start = %opts.window.start(),
            end = %opts.window.end(),
            prefix = prefix.as_deref().unwrap_or(""),
            "mirroring channel"
        );
        self.audit(AuditEvent::run_started(&opts.handle.display()));

        let mut report = MirrorReport {
            channel: channel.title.clone(),
            ..MirrorReport::default()
        };

        let mut cursor = self.reader.open(&channel, opts.window).await?;
        loop {
            let msg = match cursor.next().await {
                Ok(Some(msg)) => msg,
                Ok(None) => break,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(error = %e, "reading channel failed, stopping early");
                    report.read_error = Some(e.to_string());
                    break;
                }
            };
            report.seen += 1;

            if opts.window.is_after(msg.date) {
                // Messages arrive oldest first; nothing later can match.
                debug!(id = %msg.id, date = %msg.date, "past end of window");
                report.record(msg.id, MessageOutcome::OutsideWindow);
                break;
            }
            if opts.window.is_before(msg.date) {
                report.record(msg.id, MessageOutcome::OutsideWindow);
                continue;
            }

            let outcome = self.handle_message(&msg, prefix.as_deref(), opts.dry_run).await;
            report.record(msg.id, outcome);
        }

        info!(
            seen = report.seen,
            uploaded = report.uploaded,
            already_processed = report.already_processed,
            failed = report.failed,
            "mirror run finished"
        );
        if let Ok(summary) = serde_json::to_value(&report) {
            self.audit(AuditEvent::run_finished(&opts.handle.display(), summary));
        }

        Ok(report)
    }

    async fn handle_message(
        &mut self,
        msg: &Message,
        prefix: Option<&str>,
        dry_run: bool,
    ) -> MessageOutcome {
        match self.dedup.has(msg.id) {
            Ok(true) => {
                info!(id = %msg.id, "message already processed, skipping");
                return MessageOutcome::AlreadyProcessed;
            }
            Ok(false) => {}
            Err(e) => {
                // Reprocessing is safe: uploads overwrite by key.
                warn!(id = %msg.id, error = %e, "dedup lookup failed, treating as new");
            }
        }

        let Some(media) = &msg.media else {
            debug!(id = %msg.id, "no media, skipping");
            return MessageOutcome::NoMedia;
        };
        if !media.kind.is_supported() {
            debug!(id = %msg.id, mime = media.mime_type.as_deref().unwrap_or(""), "unsupported media, skipping");
            return MessageOutcome::UnsupportedMedia;
        }

        if dry_run {
            info!(id = %msg.id, kind = media.kind.as_str(), "would mirror message");
            return MessageOutcome::Eligible;
        }

        info!(id = %msg.id, kind = media.kind.as_str(), "processing message");
        match self.transfer(msg.id, media, prefix).await {
            Ok(key) => {
                let marked = match self.dedup.mark(msg.id) {
                    Ok(()) => true,
                    Err(e) => {
                        error!(id = %msg.id, error = %e, "uploaded but failed to record in dedup store");
                        false
                    }
                };
                info!(id = %msg.id, key = %key, "uploaded");
                self.audit(AuditEvent::uploaded(msg.id, &key));
                MessageOutcome::Uploaded { key, marked }
            }
            Err((stage, e)) => {
                warn!(id = %msg.id, stage = stage.as_str(), error = %e, "message failed, skipping");
                self.audit(AuditEvent::failed(msg.id, stage.as_str(), &e.to_string()));
                MessageOutcome::Failed {
                    stage,
                    error: e.to_string(),
                }
            }
        }
    }

    async fn transfer(
        &self,
        id: MessageId,
        media: &MediaAttachment,
        prefix: Option<&str>,
    ) -> std::result::Result<String, (Stage, crate::Error)> {
        let raw = self
            .reader
            .download(media)
            .await
            .map_err(|e| (Stage::Download, e))?;
        debug!(id = %id, bytes = raw.len(), "downloaded");

        let converted = self
            .converter
            .convert(raw, media.kind)
            .await
            .map_err(|e| (Stage::Convert, e))?;

        let key = object_key(prefix, id, &converted.extension);
        self.store
            .upload(&key, converted.bytes, &converted.content_type)
            .await
            .map_err(|e| (Stage::Upload, e))?;
        Ok(key)
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = self.audit {
            if let Err(e) = audit.write(event) {
                warn!(error = %e, "failed to write audit event");
            }
        }
    }
}
