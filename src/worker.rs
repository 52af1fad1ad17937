//! Serial background render worker.
//!
//! One dedicated thread drains a FIFO channel of [`RenderRequest`]s, renders
//! each through the engine, and posts the finished tile back on a second
//! channel. The owner drains that channel on its own thread; the worker never
//! touches the cache.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::{render_timing_enabled, RenderConfig};
use crate::document::DocumentEngine;
use crate::error::{RenderError, RenderResult};
use crate::tile::{PixelBuffer, PixelFormat, Tile, TileKey};

/// One tile to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub key: TileKey,
    pub is_thumbnail: bool,
    pub priority_order: u32,
    pub format: PixelFormat,
    pub annotations: bool,
}

/// What the worker hands back to the owner.
#[derive(Debug)]
pub enum WorkerEvent {
    TileReady(Tile),
    /// The page could not be opened. Reported once per page.
    PageError { page: usize, error: RenderError },
}

struct RenderTask {
    request: RenderRequest,
    epoch: u64,
}

struct Posted {
    epoch: u64,
    event: WorkerEvent,
}

/// Settings the worker thread reads.
#[derive(Debug, Clone, Copy)]
struct WorkerSettings {
    invalid_page_color: u32,
    timing: bool,
}

/// Handle to the render thread for one open document.
pub struct RenderWorker {
    tasks: Option<Sender<RenderTask>>,
    /// Second handle on the task queue, used to purge unstarted tasks.
    pending: Receiver<RenderTask>,
    events: Receiver<Posted>,
    running: Arc<AtomicBool>,
    /// Bumped on every restart; tasks and results from older epochs are dropped.
    epoch: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenderWorker {
    /// Spawn the worker thread for `document`. The worker starts running.
    pub fn spawn<E: DocumentEngine>(
        engine: Arc<E>,
        document: Arc<E::Document>,
        config: &RenderConfig,
    ) -> RenderResult<Self> {
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<RenderTask>();
        let (event_tx, event_rx) = crossbeam_channel::unbounded::<Posted>();
        let running = Arc::new(AtomicBool::new(true));
        let epoch = Arc::new(AtomicU64::new(0));
        let settings = WorkerSettings {
            invalid_page_color: config.invalid_page_color,
            timing: render_timing_enabled(),
        };

        let thread_rx = task_rx.clone();
        let thread_running = Arc::clone(&running);
        let thread_epoch = Arc::clone(&epoch);

        let handle = std::thread::Builder::new()
            .name("render-worker".into())
            .spawn(move || {
                let mut opened_pages: HashMap<usize, bool> = HashMap::new();

                for task in thread_rx.iter() {
                    let is_current = |epoch: u64| {
                        thread_running.load(Ordering::Acquire)
                            && thread_epoch.load(Ordering::Acquire) == epoch
                    };
                    if !is_current(task.epoch) {
                        continue;
                    }

                    let started = Instant::now();
                    let outcome = render_tile(
                        &*engine,
                        &document,
                        &mut opened_pages,
                        &task.request,
                        settings.invalid_page_color,
                    );
                    if settings.timing {
                        let (w, h) = task.request.key.pixel_size();
                        log::debug!(
                            "[RENDER] page={} {}x{} thumb={} took {:.2?}",
                            task.request.key.document_page,
                            w,
                            h,
                            task.request.is_thumbnail,
                            started.elapsed()
                        );
                    }

                    if !is_current(task.epoch) {
                        if let Ok(tile) = outcome {
                            log::trace!(
                                "[RENDER] stopped, releasing page {} tile",
                                tile.key.document_page
                            );
                            tile.release();
                        }
                        continue;
                    }

                    let event = match outcome {
                        Ok(tile) => WorkerEvent::TileReady(tile),
                        Err(RenderError::PageOpen { page, source }) => {
                            log::warn!("[RENDER] cannot open page {}: {}", page, source);
                            WorkerEvent::PageError {
                                page,
                                error: RenderError::PageOpen { page, source },
                            }
                        }
                        Err(e) => {
                            log::warn!("[RENDER] dropped request: {}", e);
                            continue;
                        }
                    };
                    if event_tx
                        .send(Posted {
                            epoch: task.epoch,
                            event,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
                log::debug!("[RENDER] worker exited");
            })?;

        Ok(Self {
            tasks: Some(task_tx),
            pending: task_rx,
            events: event_rx,
            running,
            epoch,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a request behind everything already submitted.
    pub fn submit(&self, request: RenderRequest) -> RenderResult<()> {
        if !self.is_running() {
            return Err(RenderError::WorkerStopped);
        }
        let tasks = self.tasks.as_ref().ok_or(RenderError::WorkerStopped)?;
        let task = RenderTask {
            request,
            epoch: self.epoch.load(Ordering::Acquire),
        };
        tasks.send(task).map_err(|_| RenderError::WorkerStopped)
    }

    /// Drop queued requests that have not started. A task already rendering
    /// is left alone. Returns how many were dropped.
    pub fn purge_pending(&self) -> usize {
        let purged = self.pending.try_iter().count();
        if purged > 0 {
            log::trace!("[RENDER] purged {} pending requests", purged);
        }
        purged
    }

    /// Number of queued requests not yet picked up by the thread.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Stop accepting and publishing work. Anything that finishes from now on
    /// is released instead of posted.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Resume after `stop`. Work submitted before the restart stays discarded.
    pub fn start(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.running.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Next result from the current epoch, without blocking.
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        while let Ok(posted) = self.events.try_recv() {
            if let Some(event) = self.accept(posted) {
                return Some(event);
            }
        }
        None
    }

    /// Wait up to `timeout` for the next result from the current epoch.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<WorkerEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(posted) => {
                    if let Some(event) = self.accept(posted) {
                        return Some(event);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
    }

    /// Results posted just before a stop are released here.
    fn accept(&self, posted: Posted) -> Option<WorkerEvent> {
        let current = self.is_running() && posted.epoch == self.epoch.load(Ordering::Acquire);
        if current {
            return Some(posted.event);
        }
        if let WorkerEvent::TileReady(tile) = posted.event {
            tile.release();
        }
        None
    }

    /// Stop, close the queue and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.stop();
        self.purge_pending();
        self.tasks.take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
        while let Ok(posted) = self.events.try_recv() {
            if let WorkerEvent::TileReady(tile) = posted.event {
                tile.release();
            }
        }
    }
}

impl fmt::Debug for RenderWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderWorker")
            .field("running", &self.is_running())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Render one request, opening its page on first use.
///
/// A page that failed to open stays failed: the first request reports
/// `PageOpen`, later ones come back filled with `invalid_page_color`.
fn render_tile<E: DocumentEngine>(
    engine: &E,
    document: &E::Document,
    opened_pages: &mut HashMap<usize, bool>,
    request: &RenderRequest,
    invalid_page_color: u32,
) -> RenderResult<Tile> {
    let page = request.key.document_page;
    let page_ok = match opened_pages.get(&page) {
        Some(&ok) => ok,
        None => match engine.open_page(document, page) {
            Ok(()) => {
                opened_pages.insert(page, true);
                true
            }
            Err(source) => {
                opened_pages.insert(page, false);
                return Err(RenderError::PageOpen { page, source });
            }
        },
    };

    let (width, height) = request.key.pixel_size();
    let mut buffer = PixelBuffer::allocate(width, height, request.format)?;

    if page_ok {
        let rect = request.key.bounds.to_device(width, height);
        engine
            .render_region(document, page, &mut buffer, rect, request.annotations)
            .map_err(|source| RenderError::Render { page, source })?;
    } else {
        buffer.fill(invalid_page_color);
    }

    Ok(Tile::new(
        request.key,
        request.is_thumbnail,
        request.priority_order,
        buffer.freeze(),
    ))
}
