//! The per-session transfer loop.
//!
//! For each item in the requested range the orchestrator decides how to
//! forward it, edits PDFs when asked to, picks a thumbnail for videos, and
//! runs the upload inside the resilience controller. The session is torn
//! down on every exit path by the [`RunGuard`](crate::session::RunGuard).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::DynamicImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info, warn};

use ferry_core::{
    apply_caption_edits, apply_filename_edit, HaltReason, InsertPosition, Item, ItemId, ItemKind,
    MediaInfo, Pacing, PageSet, ProgressEvent, ProgressSink, RelayConfig, SessionId, Settings,
    SkipReason, ThumbnailMode, TransferStats, TransferSummary,
};
use ferry_document::{
    find_pages_with_keywords, page_count, DocumentError, DocumentMutator, PageSimilarityEngine,
    Rasterizer,
};
use ferry_store::{
    BytesChunkSource, MessageStore, RemoteChunkSource, TransferFault, UploadMetadata,
    UploadReceipt,
};
use ferry_transfer::{
    Attempt, ChunkedTransferStream, FileOutcome, RetryPolicy, StreamOptions,
    TransferResilienceController,
};

use crate::error::{RelayError, Result};
use crate::session::{SessionManager, TransferSession};
use crate::thumbnail::{acquire_thumbnail, FrameExtractor};

/// Thresholds outside this band are honoured but logged.
const SIMILARITY_RANGE: std::ops::RangeInclusive<f64> = 0.60..=0.90;

/// Drives one session at a time from source to destination.
pub struct TransferOrchestrator<S, R, F>
where
    S: MessageStore + ?Sized + 'static,
    R: Rasterizer,
    F: FrameExtractor,
{
    store: Arc<S>,
    config: RelayConfig,
    sessions: Arc<SessionManager>,
    rasterizer: R,
    extractor: F,
    engine: PageSimilarityEngine,
    mutator: DocumentMutator,
    progress: Arc<dyn ProgressSink>,
    seed: Option<u64>,
}

impl<S, R, F> TransferOrchestrator<S, R, F>
where
    S: MessageStore + ?Sized + 'static,
    R: Rasterizer,
    F: FrameExtractor,
{
    pub fn new(
        store: Arc<S>,
        config: RelayConfig,
        sessions: Arc<SessionManager>,
        rasterizer: R,
        extractor: F,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        info!(
            profile = ?config.profile,
            chunk_size = config.chunk_size,
            queue_capacity = config.queue_capacity,
            buffer_bytes = config.buffer_bytes(),
            part_size = config.upload_part_size,
            paced = config.pacing.is_some(),
            "transfer mode"
        );
        Self {
            store,
            config,
            sessions,
            rasterizer,
            extractor,
            engine: PageSimilarityEngine::default(),
            mutator: DocumentMutator::default(),
            progress,
            seed: None,
        }
    }

    /// Fix the pacing jitter sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_engine(mut self, engine: PageSimilarityEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_mutator(mut self, mutator: DocumentMutator) -> Self {
        self.mutator = mutator;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Transfer items `first..=last` of the session's source chat.
    ///
    /// Per-item failures are contained and counted as skips. Only a failure
    /// to enumerate the range is returned as an error; the session is torn
    /// down either way.
    pub async fn run(&self, id: SessionId, first: ItemId, last: ItemId) -> Result<TransferSummary> {
        let guard = self.sessions.begin(id)?;
        let session = guard.session().clone();
        let assets = Assets::load(&session.settings).await;

        let mut stats = TransferStats::start();
        let mut pacer = Pacer::new(
            self.config.pacing.clone(),
            self.config.hygiene_pause,
            self.seed,
        );
        self.report(ProgressEvent::SessionStarted { first, last }).await;

        let items = match self.store.enumerate(session.source, first, last).await {
            Ok(items) => items,
            Err(fault) => {
                error!(session = %id, error = %fault, "cannot enumerate source range");
                let summary = stats.summarize(HaltReason::Stopped);
                self.report(ProgressEvent::SessionFinished(summary)).await;
                return Err(fault.into());
            }
        };
        info!(session = %id, items = items.len(), first = %first, last = %last, "range enumerated");

        let controller = TransferResilienceController::new(
            RetryPolicy::from(&self.config),
            self.sessions.breaker(),
            Arc::clone(&self.progress),
        );

        let mut halt = HaltReason::Completed;
        for item in &items {
            if self.sessions.stop_requested() {
                info!(session = %id, item = %item.id, "stop requested");
                halt = HaltReason::Stopped;
                break;
            }

            let outcome = match &item.kind {
                ItemKind::Service => {
                    debug!(item = %item.id, "service entry skipped");
                    continue;
                }
                ItemKind::Text { text } => {
                    self.forward_text(&controller, &session, item.id, text).await
                }
                ItemKind::Media { .. } => {
                    self.forward_media(&controller, &session, &assets, item).await
                }
            };

            match outcome {
                Forwarded::Done(bytes) => {
                    stats.record_success(bytes);
                    pacer.after_success(bytes).await;
                }
                Forwarded::Nothing => {}
                Forwarded::Skipped(reason) => {
                    stats.record_skip();
                    self.report(ProgressEvent::ItemSkipped {
                        item: item.id,
                        reason,
                    })
                    .await;
                }
                Forwarded::Halted => {
                    stats.record_skip();
                    self.report(ProgressEvent::ItemSkipped {
                        item: item.id,
                        reason: SkipReason::CircuitOpen,
                    })
                    .await;
                    halt = HaltReason::CircuitOpen;
                    break;
                }
            }
        }

        let summary = stats.summarize(halt);
        info!(
            session = %id,
            processed = summary.processed,
            skipped = summary.skipped,
            bytes = summary.total_bytes,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            halt = ?summary.halt,
            "transfer finished"
        );
        self.report(ProgressEvent::SessionFinished(summary.clone()))
            .await;
        drop(guard);
        Ok(summary)
    }

    async fn forward_text(
        &self,
        controller: &TransferResilienceController<'_>,
        session: &TransferSession,
        item: ItemId,
        text: &str,
    ) -> Forwarded {
        let text = apply_caption_edits(&session.settings, text);
        if text.trim().is_empty() {
            debug!(item = %item, "nothing left to send after edits");
            return Forwarded::Nothing;
        }

        let mut work = TextForward {
            store: Arc::clone(&self.store),
            dest: session.dest,
            text,
        };
        match controller.run(item, &mut work).await {
            FileOutcome::Succeeded(()) => {
                self.report(ProgressEvent::TextForwarded { item }).await;
                Forwarded::Done(0)
            }
            other => Forwarded::from_failure(other),
        }
    }

    async fn forward_media(
        &self,
        controller: &TransferResilienceController<'_>,
        session: &TransferSession,
        assets: &Assets,
        item: &Item,
    ) -> Forwarded {
        let settings = &session.settings;
        let caption = apply_caption_edits(settings, item.text());

        let Some(info) = item.media() else {
            // Nothing to stream; let the attempt loop re-resolve it.
            let mut work = self.file_transfer(session, item.id, None, UploadMetadata {
                caption,
                ..Default::default()
            });
            return self.finish_media(controller, item.id, &mut work).await;
        };

        let edited = if info.is_pdf() && settings.edits_documents() {
            self.edit_document(session, assets, item.id, info).await
        } else {
            None
        };

        let thumbnail = if info.is_video() && settings.thumbnail.mode != ThumbnailMode::Original {
            self.video_thumbnail(settings, info).await
        } else {
            info.thumbnail.clone()
        };

        let metadata = UploadMetadata {
            file_name: apply_filename_edit(settings, &info.display_name()),
            caption,
            mime_type: info.mime_type.clone(),
            thumbnail,
            duration: info.duration,
            width: info.width,
            height: info.height,
            supports_streaming: info.supports_streaming,
        };
        let mut work = self.file_transfer(session, item.id, edited, metadata);
        self.finish_media(controller, item.id, &mut work).await
    }

    fn file_transfer(
        &self,
        session: &TransferSession,
        item: ItemId,
        payload: Option<Bytes>,
        metadata: UploadMetadata,
    ) -> FileTransfer<S> {
        FileTransfer {
            store: Arc::clone(&self.store),
            source: session.source,
            dest: session.dest,
            item,
            payload,
            metadata,
            options: StreamOptions::from(&self.config),
            part_size: self.config.upload_part_size,
            progress: Arc::clone(&self.progress),
        }
    }

    async fn finish_media(
        &self,
        controller: &TransferResilienceController<'_>,
        item: ItemId,
        work: &mut FileTransfer<S>,
    ) -> Forwarded {
        match controller.run(item, work).await {
            FileOutcome::Succeeded(receipt) => {
                info!(
                    item = %item,
                    file = %work.metadata.file_name,
                    bytes = receipt.bytes,
                    message = %receipt.message_id,
                    "file forwarded"
                );
                self.report(ProgressEvent::ItemCompleted {
                    item,
                    file_name: work.metadata.file_name.clone(),
                    bytes: receipt.bytes,
                })
                .await;
                Forwarded::Done(receipt.bytes)
            }
            other => Forwarded::from_failure(other),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Documents
    // ─────────────────────────────────────────────────────────────────────────

    /// Edited document bytes, or `None` to forward the original.
    async fn edit_document(
        &self,
        session: &TransferSession,
        assets: &Assets,
        item: ItemId,
        info: &MediaInfo,
    ) -> Option<Bytes> {
        match self.try_edit_document(session, assets, item, info).await {
            Ok(DocumentEdit::Changed {
                document,
                original_pages,
                removed,
                inserted,
            }) => {
                self.report(ProgressEvent::DocumentEdited {
                    item,
                    original_pages,
                    removed,
                    inserted,
                })
                .await;
                Some(document)
            }
            Ok(DocumentEdit::Unchanged(reason)) => {
                info!(item = %item, reason = %reason, "forwarding original document");
                self.report(ProgressEvent::DocumentUnchanged { item, reason })
                    .await;
                None
            }
            Err(e) => {
                warn!(item = %item, error = %e, "document edit failed, forwarding original");
                self.report(ProgressEvent::DocumentUnchanged {
                    item,
                    reason: e.to_string(),
                })
                .await;
                None
            }
        }
    }

    async fn try_edit_document(
        &self,
        session: &TransferSession,
        assets: &Assets,
        item: ItemId,
        info: &MediaInfo,
    ) -> Result<DocumentEdit> {
        let settings = &session.settings;
        let document = self.download_whole(session, item, info).await?;

        let selection = self.select_pages(settings, assets, &document).await;
        let mut current = document;
        let mut original_pages = None;
        let mut removed = 0;
        let mut covers_every_page = false;

        if !selection.is_empty() {
            let report = self.blocking_mutate({
                let mutator = self.mutator.clone();
                let document = current.clone();
                move || mutator.remove_pages(&document, &selection)
            })
            .await?;
            original_pages = Some(report.original_pages);
            if report.kept == 0 {
                warn!(item = %item, pages = report.original_pages, "selection covers every page, keeping them all");
                covers_every_page = true;
            } else if !report.is_noop() {
                removed = report.removed;
                current = report.document;
            }
        }

        let mut inserted = 0;
        if let Some((image, position)) = &assets.insertion {
            let report = self.blocking_mutate({
                let mutator = self.mutator.clone();
                let document = current.clone();
                let image = image.clone();
                let position = *position;
                move || mutator.insert_image_page(&document, &image, position)
            })
            .await?;
            debug!(item = %item, after = report.inserted_after, total = report.total_pages, "image page inserted");
            inserted = 1;
            current = report.document;
        }

        if removed == 0 && inserted == 0 {
            let reason = if covers_every_page {
                "selection covers every page"
            } else {
                "no pages matched"
            };
            return Ok(DocumentEdit::Unchanged(reason.to_string()));
        }

        let original_pages = match original_pages {
            Some(n) => n,
            None => page_count(&current)?.saturating_sub(inserted),
        };
        info!(item = %item, original_pages, removed, inserted, "document edited");
        Ok(DocumentEdit::Changed {
            document: current,
            original_pages,
            removed,
            inserted,
        })
    }

    /// Fetch the whole document through a stream on a fresh reference.
    async fn download_whole(
        &self,
        session: &TransferSession,
        item: ItemId,
        info: &MediaInfo,
    ) -> Result<Bytes> {
        let location = match self.store.resolve(session.source, item).await? {
            Some(resolved) => resolved
                .media()
                .map(|m| m.location)
                .ok_or(TransferFault::StaleReference)?,
            None => return Err(TransferFault::other(format!("item {item} vanished")).into()),
        };

        let mut stream = ChunkedTransferStream::open(
            RemoteChunkSource::new(Arc::clone(&self.store), location),
            &info.display_name(),
            info.size,
            &StreamOptions::from(&self.config),
            Arc::clone(&self.progress),
        );
        let document = stream.read_to_end().await;
        stream.close().await;
        Ok(document?)
    }

    /// Union of every configured selector. A failing selector contributes
    /// nothing.
    async fn select_pages(&self, settings: &Settings, assets: &Assets, document: &Bytes) -> PageSet {
        let removal = &settings.pdf_removal;
        let mut selection: PageSet = removal.pages.iter().copied().collect();

        if !removal.keywords.is_empty() {
            let doc = document.clone();
            let keywords = removal.keywords.clone();
            match tokio::task::spawn_blocking(move || find_pages_with_keywords(&doc, &keywords)).await {
                Ok(Ok(pages)) => {
                    debug!(pages = ?pages, "keyword matches");
                    selection.extend(pages);
                }
                Ok(Err(e)) => warn!(error = %e, "keyword search failed"),
                Err(e) => warn!(error = %e, "keyword search task failed"),
            }
        }

        if let Some(reference) = &assets.reference {
            let threshold = if removal.threshold.is_nan() {
                warn!(
                    fallback = self.config.similarity_threshold,
                    "similarity threshold is not a number"
                );
                self.config.similarity_threshold
            } else {
                if !SIMILARITY_RANGE.contains(&removal.threshold) {
                    warn!(
                        threshold = removal.threshold,
                        "similarity threshold outside 0.60..=0.90, using it as given"
                    );
                }
                removal.threshold
            };
            match self
                .engine
                .find_matching_pages(
                    &self.rasterizer,
                    document,
                    reference,
                    threshold,
                    self.config.raster_dpi,
                )
                .await
            {
                Ok(matches) => {
                    for m in &matches {
                        debug!(page = m.page, score = m.score, method = %m.method, "similar page");
                    }
                    selection.extend(matches.iter().map(|m| m.page));
                }
                Err(e) => warn!(error = %e, "similarity search failed"),
            }
        }

        selection
    }

    async fn blocking_mutate<T, W>(&self, work: W) -> Result<T>
    where
        T: Send + 'static,
        W: FnOnce() -> ferry_document::Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|e| RelayError::Document(DocumentError::Worker(e.to_string())))?
            .map_err(RelayError::from)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Thumbnails
    // ─────────────────────────────────────────────────────────────────────────

    async fn video_thumbnail(&self, settings: &Settings, info: &MediaInfo) -> Option<Bytes> {
        let mut stream = ChunkedTransferStream::open(
            RemoteChunkSource::new(Arc::clone(&self.store), info.location),
            &info.display_name(),
            info.size,
            &StreamOptions::from(&self.config),
            Arc::clone(&self.progress),
        );
        let prefix = stream.read_prefix(self.config.thumbnail_probe_bytes).await;
        stream.close().await;

        if prefix.is_empty() {
            warn!(file = %info.display_name(), "no video bytes for thumbnail");
            return info.thumbnail.clone();
        }
        acquire_thumbnail(
            &self.extractor,
            &settings.thumbnail,
            self.config.thumbnail_offset,
            info.thumbnail.clone(),
            prefix,
        )
        .await
    }

    async fn report(&self, event: ProgressEvent) {
        if let Err(e) = self.progress.report(event).await {
            debug!(error = %e, "progress update dropped");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Per-item work
// ─────────────────────────────────────────────────────────────────────────────

enum Forwarded {
    Done(u64),
    /// Nothing to forward; not counted.
    Nothing,
    Skipped(SkipReason),
    Halted,
}

impl Forwarded {
    fn from_failure<T>(outcome: FileOutcome<T>) -> Self {
        match outcome {
            FileOutcome::Succeeded(_) => Forwarded::Nothing,
            FileOutcome::Skipped(reason) | FileOutcome::FatallySkipped(reason) => {
                Forwarded::Skipped(reason)
            }
            FileOutcome::Halted => Forwarded::Halted,
        }
    }
}

enum DocumentEdit {
    Changed {
        document: Bytes,
        original_pages: u32,
        removed: u32,
        inserted: u32,
    },
    Unchanged(String),
}

/// Stream one file to the destination. Every attempt re-resolves the item so
/// a stale reference is refreshed.
struct FileTransfer<S: MessageStore + ?Sized + 'static> {
    store: Arc<S>,
    source: ferry_core::ChatId,
    dest: ferry_core::ChatId,
    item: ItemId,
    /// Edited bytes to send instead of the remote object.
    payload: Option<Bytes>,
    metadata: UploadMetadata,
    options: StreamOptions,
    part_size: usize,
    progress: Arc<dyn ProgressSink>,
}

#[async_trait]
impl<S: MessageStore + ?Sized + 'static> Attempt for FileTransfer<S> {
    type Output = UploadReceipt;

    async fn attempt(&mut self, number: u32) -> std::result::Result<UploadReceipt, TransferFault> {
        let resolved = self
            .store
            .resolve(self.source, self.item)
            .await?
            .ok_or_else(|| TransferFault::other(format!("item {} vanished", self.item)))?;
        let info = resolved.media().ok_or(TransferFault::StaleReference)?;

        let name = if self.metadata.file_name.is_empty() {
            info.display_name()
        } else {
            self.metadata.file_name.clone()
        };
        let payload = self.payload.clone();
        let (mut stream, size) = match payload {
            Some(document) => {
                let size = document.len() as u64;
                let stream = ChunkedTransferStream::open(
                    BytesChunkSource::new(document),
                    &name,
                    size,
                    &self.options,
                    Arc::clone(&self.progress),
                );
                (stream, size)
            }
            None => {
                let stream = ChunkedTransferStream::open(
                    RemoteChunkSource::new(Arc::clone(&self.store), info.location),
                    &name,
                    info.size,
                    &self.options,
                    Arc::clone(&self.progress),
                );
                (stream, info.size)
            }
        };

        let mut metadata = self.metadata.clone();
        metadata.file_name = name;
        let result = self
            .store
            .upload_stream(self.dest, &mut stream, size, self.part_size, metadata)
            .await;
        stream.close().await;

        let receipt = result?;
        debug!(
            item = %self.item,
            attempt = number,
            digest = %stream.digest_hex(),
            delivered = stream.delivered(),
            "upload stream drained"
        );
        Ok(receipt)
    }

    fn label(&self) -> String {
        if self.metadata.file_name.is_empty() {
            format!("item {}", self.item)
        } else {
            self.metadata.file_name.clone()
        }
    }
}

struct TextForward<S: MessageStore + ?Sized + 'static> {
    store: Arc<S>,
    dest: ferry_core::ChatId,
    text: String,
}

#[async_trait]
impl<S: MessageStore + ?Sized + 'static> Attempt for TextForward<S> {
    type Output = ();

    async fn attempt(&mut self, _number: u32) -> std::result::Result<(), TransferFault> {
        self.store.send_text(self.dest, &self.text).await.map(|_| ())
    }

    fn label(&self) -> String {
        "text".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Assets and pacing
// ─────────────────────────────────────────────────────────────────────────────

/// Images named by the settings, decoded once per run.
#[derive(Default)]
struct Assets {
    reference: Option<DynamicImage>,
    insertion: Option<(DynamicImage, InsertPosition)>,
}

impl Assets {
    /// An image that fails to load disables its selector with a warning.
    async fn load(settings: &Settings) -> Self {
        let mut assets = Assets::default();
        if let Some(path) = &settings.pdf_removal.reference_image {
            match load_image(path).await {
                Ok(image) => assets.reference = Some(image),
                Err(e) => warn!(error = %e, "similarity selection disabled"),
            }
        }
        if let Some(insertion) = &settings.pdf_insertion {
            match load_image(&insertion.image).await {
                Ok(image) => assets.insertion = Some((image, insertion.position)),
                Err(e) => warn!(error = %e, "page insertion disabled"),
            }
        }
        assets
    }
}

async fn load_image(path: &Path) -> Result<DynamicImage> {
    let owned = path.to_path_buf();
    let asset_error = |reason: String| RelayError::Asset {
        path: path.to_path_buf(),
        reason,
    };
    tokio::task::spawn_blocking(move || image::open(owned))
        .await
        .map_err(|e| asset_error(e.to_string()))?
        .map_err(|e| asset_error(e.to_string()))
}

/// Inter-file delays and the periodic hygiene pause.
struct Pacer {
    pacing: Option<Pacing>,
    hygiene_pause: Duration,
    rng: StdRng,
    since_pause: u32,
    next_pause: u32,
}

impl Pacer {
    fn new(pacing: Option<Pacing>, hygiene_pause: Duration, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let next_pause = rng.gen_range(3..=5);
        Self {
            pacing,
            hygiene_pause,
            rng,
            since_pause: 0,
            next_pause,
        }
    }

    async fn after_success(&mut self, bytes: u64) {
        if let Some(pacing) = &self.pacing {
            let base = if bytes > pacing.large_file_threshold {
                pacing.large_file_delay
            } else {
                pacing.small_file_delay
            };
            let delay = base + pacing.jitter.mul_f64(self.rng.gen::<f64>());
            debug!(delay_ms = delay.as_millis() as u64, bytes, "pacing");
            tokio::time::sleep(delay).await;
        }

        self.since_pause += 1;
        if self.since_pause >= self.next_pause {
            debug!(pause_ms = self.hygiene_pause.as_millis() as u64, "hygiene pause");
            tokio::time::sleep(self.hygiene_pause).await;
            self.since_pause = 0;
            self.next_pause = self.rng.gen_range(3..=5);
        }
    }
}
