//! Native engine seam and background document decoding.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::error::{EngineError, RenderError, RenderResult};
use crate::geometry::DeviceRect;
use crate::tile::PixelBuffer;

/// Where a document's bytes come from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    File(PathBuf),
    Memory(Bytes),
}

impl DocumentSource {
    /// Read the whole document into memory.
    pub fn read_bytes(&self) -> RenderResult<Bytes> {
        match self {
            DocumentSource::File(path) => Ok(Bytes::from(std::fs::read(path)?)),
            DocumentSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Display for DocumentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentSource::File(path) => write!(f, "{}", path.display()),
            DocumentSource::Memory(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

/// Native decode/raster engine.
///
/// Called from the decode pool and from the render worker thread, never
/// from both for the same document at the same time.
pub trait DocumentEngine: Send + Sync + 'static {
    type Document: Send + Sync + 'static;

    fn open_document(
        &self,
        source: &DocumentSource,
        password: Option<&str>,
    ) -> Result<Self::Document, EngineError>;

    fn page_count(&self, document: &Self::Document) -> usize;

    /// Unscaled page size in points.
    fn page_size(&self, document: &Self::Document, page: usize) -> Result<(f32, f32), EngineError>;

    /// Prepare a page for rendering.
    fn open_page(&self, document: &Self::Document, page: usize) -> Result<(), EngineError>;

    /// Draw the whole page into `rect` of `target`, clipped to the buffer.
    fn render_region(
        &self,
        document: &Self::Document,
        page: usize,
        target: &mut PixelBuffer,
        rect: DeviceRect,
        annotations: bool,
    ) -> Result<(), EngineError>;

    fn close_document(&self, document: &Self::Document);
}

/// A successfully opened document.
pub struct DecodedDocument<E: DocumentEngine> {
    pub document: Arc<E::Document>,
    pub page_count: usize,
    /// Size of the reference page, shared by every page in the layout.
    pub page_width: f32,
    pub page_height: f32,
}

impl<E: DocumentEngine> Clone for DecodedDocument<E> {
    fn clone(&self) -> Self {
        Self {
            document: Arc::clone(&self.document),
            page_count: self.page_count,
            page_width: self.page_width,
            page_height: self.page_height,
        }
    }
}

impl<E: DocumentEngine> fmt::Debug for DecodedDocument<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedDocument")
            .field("page_count", &self.page_count)
            .field("page_width", &self.page_width)
            .field("page_height", &self.page_height)
            .finish_non_exhaustive()
    }
}

/// Open the document and measure its reference page.
pub fn decode_document<E: DocumentEngine>(
    engine: &E,
    source: &DocumentSource,
    password: Option<&str>,
    reference_page: usize,
) -> RenderResult<DecodedDocument<E>> {
    let document = engine
        .open_document(source, password)
        .map_err(RenderError::DocumentOpen)?;

    let measured = measure(engine, &document, reference_page);
    match measured {
        Ok((page_count, page_width, page_height)) => Ok(DecodedDocument {
            document: Arc::new(document),
            page_count,
            page_width,
            page_height,
        }),
        Err(e) => {
            engine.close_document(&document);
            Err(e)
        }
    }
}

fn measure<E: DocumentEngine>(
    engine: &E,
    document: &E::Document,
    reference_page: usize,
) -> RenderResult<(usize, f32, f32)> {
    let page_count = engine.page_count(document);
    if page_count == 0 {
        return Err(RenderError::DocumentOpen("document has no pages".into()));
    }
    if reference_page >= page_count {
        return Err(RenderError::DocumentOpen(
            format!("reference page {reference_page} out of {page_count} pages").into(),
        ));
    }

    engine
        .open_page(document, reference_page)
        .map_err(|source| RenderError::PageOpen {
            page: reference_page,
            source,
        })?;
    let (width, height) = engine
        .page_size(document, reference_page)
        .map_err(|source| RenderError::PageOpen {
            page: reference_page,
            source,
        })?;
    if !(width > 0.0 && height > 0.0) {
        return Err(RenderError::InvalidPageSize { width, height });
    }
    Ok((page_count, width, height))
}

struct DecodeOutcome<E: DocumentEngine> {
    generation: u64,
    result: RenderResult<DecodedDocument<E>>,
}

/// Runs document decodes on a dedicated single-thread pool.
///
/// Each `load` supersedes the previous one. A decode that finishes after
/// being cancelled or superseded closes its document and posts nothing.
pub struct DocumentLoader<E: DocumentEngine> {
    engine: Arc<E>,
    pool: rayon::ThreadPool,
    /// Bumped by every `load` and `cancel`.
    generation: Arc<AtomicU64>,
    /// Cancel flag of the most recent decode.
    cancelled: Mutex<Arc<AtomicBool>>,
    tx: Sender<DecodeOutcome<E>>,
    rx: Receiver<DecodeOutcome<E>>,
}

impl<E: DocumentEngine> DocumentLoader<E> {
    pub fn new(engine: Arc<E>) -> RenderResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .thread_name(|idx| format!("document-decode-{}", idx))
            .build()?;
        let (tx, rx) = crossbeam_channel::unbounded();

        Ok(Self {
            engine,
            pool,
            generation: Arc::new(AtomicU64::new(0)),
            cancelled: Mutex::new(Arc::new(AtomicBool::new(false))),
            tx,
            rx,
        })
    }

    /// Start decoding `source` in the background, superseding any decode
    /// still in progress. Returns the decode's generation.
    pub fn load(&self, source: DocumentSource, password: Option<String>, reference_page: usize) -> u64 {
        let cancelled = Arc::new(AtomicBool::new(false));
        {
            let mut current = self.cancelled.lock();
            current.store(true, Ordering::Release);
            *current = Arc::clone(&cancelled);
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        let engine = Arc::clone(&self.engine);
        let current_generation = Arc::clone(&self.generation);
        let tx = self.tx.clone();

        log::debug!("[DECODE] start #{} {}", generation, source);
        self.pool.spawn(move || {
            if cancelled.load(Ordering::Acquire) {
                log::debug!("[DECODE] #{} cancelled before start", generation);
                return;
            }

            let result = decode_document(&*engine, &source, password.as_deref(), reference_page);

            let stale = cancelled.load(Ordering::Acquire)
                || current_generation.load(Ordering::Acquire) != generation;
            if stale {
                if let Ok(decoded) = &result {
                    engine.close_document(&decoded.document);
                }
                log::debug!("[DECODE] #{} cancelled, result discarded", generation);
                return;
            }

            let _ = tx.send(DecodeOutcome { generation, result });
        });
        generation
    }

    /// Cancel the decode in progress, if any.
    pub fn cancel(&self) {
        self.cancelled.lock().store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Next finished decode, without blocking.
    pub fn try_recv(&self) -> Option<RenderResult<DecodedDocument<E>>> {
        while let Ok(outcome) = self.rx.try_recv() {
            if let Some(result) = self.accept(outcome) {
                return Some(result);
            }
        }
        None
    }

    /// Wait up to `timeout` for the next finished decode.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<RenderResult<DecodedDocument<E>>> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(outcome) => {
                    if let Some(result) = self.accept(outcome) {
                        return Some(result);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Drop outcomes that were superseded after being posted.
    fn accept(&self, outcome: DecodeOutcome<E>) -> Option<RenderResult<DecodedDocument<E>>> {
        if outcome.generation == self.generation.load(Ordering::Acquire) {
            return Some(outcome.result);
        }
        if let Ok(decoded) = &outcome.result {
            self.engine.close_document(&decoded.document);
        }
        None
    }
}

impl<E: DocumentEngine> Drop for DocumentLoader<E> {
    fn drop(&mut self) {
        self.cancel();
    }
}
