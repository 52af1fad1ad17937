//! Owner-side tile scheduler.
//!
//! `TileScheduler` lives on the owner context (the UI thread of an embedding
//! viewer). It starts the background decode, spawns the render worker once
//! the document is open, runs a scheduling pass for every viewport change,
//! and moves finished tiles from the worker into the cache during `poll`.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{CacheStats, TileCache};
use crate::config::RenderConfig;
use crate::document::{DecodedDocument, DocumentEngine, DocumentLoader, DocumentSource};
use crate::error::{RenderError, RenderResult};
use crate::layout::{PageLayout, Viewport};
use crate::page_order::PageOrder;
use crate::prefetch::{PassPlanner, PassSummary};
use crate::tile::Tile;
use crate::worker::{RenderWorker, WorkerEvent};

/// Callbacks into the drawing surface. Always invoked from `poll`.
pub trait RenderSurface {
    /// A tile was stored and can be drawn.
    fn on_tile_ready(&mut self, tile: &Tile);

    /// `page` could not be opened; its tiles will show the invalid-page fill.
    fn on_page_error(&mut self, page: usize, error: &RenderError);

    /// The document could not be opened. No tiles will follow.
    fn on_load_error(&mut self, error: &RenderError);

    /// The document is open and `page_count` pages are laid out.
    fn on_load_complete(&mut self, _page_count: usize) {}

    /// The first tile of this load was stored.
    fn on_first_render(&mut self) {}
}

/// A decoded document with its worker.
struct Session<E: DocumentEngine> {
    document: DecodedDocument<E>,
    order: PageOrder,
    layout: PageLayout,
    worker: RenderWorker,
    first_render_pending: bool,
}

enum LoadState<E: DocumentEngine> {
    Idle,
    Decoding {
        user_pages: Vec<usize>,
        view_width: f32,
        view_height: f32,
    },
    Loaded(Session<E>),
    Failed,
}

/// Tile scheduler for one document at a time.
pub struct TileScheduler<E: DocumentEngine> {
    engine: Arc<E>,
    config: RenderConfig,
    cache: Arc<TileCache>,
    planner: PassPlanner,
    loader: DocumentLoader<E>,
    state: LoadState<E>,
}

impl<E: DocumentEngine> TileScheduler<E> {
    pub fn new(engine: Arc<E>, config: RenderConfig) -> RenderResult<Self> {
        config.validate()?;
        let cache = Arc::new(TileCache::new(
            config.cache_capacity,
            config.thumbnail_capacity,
        ));
        let planner = PassPlanner::new(&config);
        let loader = DocumentLoader::new(Arc::clone(&engine))?;

        Ok(Self {
            engine,
            config,
            cache,
            planner,
            loader,
            state: LoadState::Idle,
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Start opening a document in the background.
    ///
    /// `user_pages` optionally reorders or repeats document pages; empty
    /// means every page in document order. The layout is fitted to a
    /// `view_width` x `view_height` view. Completion is reported by `poll`.
    pub fn load(
        &mut self,
        source: DocumentSource,
        password: Option<String>,
        user_pages: Vec<usize>,
        view_width: f32,
        view_height: f32,
    ) -> RenderResult<()> {
        if matches!(self.state, LoadState::Decoding { .. } | LoadState::Loaded(_)) {
            return Err(RenderError::AlreadyLoaded);
        }

        let reference_page = user_pages.first().copied().unwrap_or(0);
        self.loader.load(source, password, reference_page);
        self.state = LoadState::Decoding {
            user_pages,
            view_width,
            view_height,
        };
        Ok(())
    }

    /// Whether a document is open and ready to schedule.
    pub fn is_loaded(&self) -> bool {
        matches!(self.state, LoadState::Loaded(_))
    }

    /// Number of pages in the visible sequence, once loaded.
    pub fn page_count(&self) -> Option<usize> {
        self.session().map(|s| s.order.len())
    }

    pub fn layout(&self) -> Option<&PageLayout> {
        self.session().map(|s| &s.layout)
    }

    pub fn page_order(&self) -> Option<&PageOrder> {
        self.session().map(|s| &s.order)
    }

    /// Page under the centre of `viewport`.
    pub fn page_at(&self, viewport: &Viewport) -> Option<usize> {
        let session = self.session()?;
        let (offset, length) = viewport.along(session.layout.axis);
        Some(session.layout.page_at_offset(offset, length, viewport.zoom))
    }

    /// Handle everything that finished since the last call. Never blocks.
    /// Returns the number of decode and worker events handled.
    pub fn poll(&mut self, surface: &mut dyn RenderSurface) -> usize {
        let mut handled = 0;

        if matches!(self.state, LoadState::Decoding { .. }) {
            if let Some(result) = self.loader.try_recv() {
                self.finish_decode(result, surface);
                handled += 1;
            }
        }

        loop {
            let event = match &self.state {
                LoadState::Loaded(session) => session.worker.try_recv(),
                _ => None,
            };
            let Some(event) = event else { break };
            self.handle_event(event, surface);
            handled += 1;
        }
        handled
    }

    /// Like `poll`, but waits up to `timeout` for the first event.
    pub fn poll_timeout(&mut self, surface: &mut dyn RenderSurface, timeout: Duration) -> usize {
        let first = match &self.state {
            LoadState::Decoding { .. } => self.loader.recv_timeout(timeout).map(Ok),
            LoadState::Loaded(session) => session.worker.recv_timeout(timeout).map(Err),
            LoadState::Idle | LoadState::Failed => None,
        };
        match first {
            Some(Ok(result)) => {
                self.finish_decode(result, surface);
                1 + self.poll(surface)
            }
            Some(Err(event)) => {
                self.handle_event(event, surface);
                1 + self.poll(surface)
            }
            None => 0,
        }
    }

    /// Run one scheduling pass for `viewport`.
    ///
    /// Queued requests from earlier passes that have not started are dropped
    /// first; a tile already rendering is left to finish.
    pub fn update_viewport(&mut self, viewport: &Viewport) -> RenderResult<PassSummary> {
        let LoadState::Loaded(session) = &self.state else {
            return Err(RenderError::NotLoaded);
        };

        session.worker.purge_pending();

        let worker = &session.worker;
        let mut rejected = 0usize;
        let summary = self.planner.plan(
            &session.layout,
            &session.order,
            viewport,
            &self.cache,
            &mut |request| {
                if worker.submit(request).is_err() {
                    rejected += 1;
                }
            },
        );
        if rejected > 0 {
            log::warn!("[PASS] worker stopped, {} requests not queued", rejected);
        }
        Ok(summary)
    }

    /// Tiles to draw, thumbnails first.
    pub fn snapshot_for_draw(&self) -> Vec<Tile> {
        self.cache.snapshot_for_draw()
    }

    /// Shared handle to the cache for a drawing thread.
    pub fn cache(&self) -> Arc<TileCache> {
        Arc::clone(&self.cache)
    }

    /// Stop publishing rendered tiles. Anything finishing afterwards is
    /// released instead of cached.
    pub fn stop_rendering(&self) {
        if let Some(session) = self.session() {
            session.worker.stop();
        }
    }

    /// Resume rendering after `stop_rendering`.
    pub fn start_rendering(&self) {
        if let Some(session) = self.session() {
            session.worker.start();
        }
    }

    /// Tear down the current document: cancel any decode, stop and join the
    /// worker, release every cached buffer and close the document.
    pub fn close(&mut self) {
        self.loader.cancel();
        if let LoadState::Loaded(mut session) = std::mem::replace(&mut self.state, LoadState::Idle) {
            session.worker.shutdown();
            self.engine.close_document(&session.document.document);
        }
        self.cache.reset();
        log::debug!("[DECODE] closed");
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn reset_stats(&self) {
        self.cache.reset_stats();
    }

    fn session(&self) -> Option<&Session<E>> {
        match &self.state {
            LoadState::Loaded(session) => Some(session),
            _ => None,
        }
    }

    fn finish_decode(
        &mut self,
        result: RenderResult<DecodedDocument<E>>,
        surface: &mut dyn RenderSurface,
    ) {
        if !matches!(self.state, LoadState::Decoding { .. }) {
            if let Ok(decoded) = result {
                self.engine.close_document(&decoded.document);
            }
            return;
        }
        let LoadState::Decoding {
            user_pages,
            view_width,
            view_height,
        } = std::mem::replace(&mut self.state, LoadState::Idle)
        else {
            return;
        };

        let started = result.and_then(|decoded| {
            self.start_session(decoded, user_pages, view_width, view_height)
        });
        match started {
            Ok(session) => {
                let page_count = session.order.len();
                log::info!(
                    "[DECODE] loaded {} pages, page {}x{}",
                    page_count,
                    session.layout.page_width,
                    session.layout.page_height
                );
                self.state = LoadState::Loaded(session);
                surface.on_load_complete(page_count);
            }
            Err(e) => {
                log::error!("[DECODE] load failed: {}", e);
                self.state = LoadState::Failed;
                surface.on_load_error(&e);
            }
        }
    }

    fn start_session(
        &self,
        document: DecodedDocument<E>,
        user_pages: Vec<usize>,
        view_width: f32,
        view_height: f32,
    ) -> RenderResult<Session<E>> {
        let order = PageOrder::new(user_pages, document.page_count);
        let layout = PageLayout::fit(
            view_width,
            view_height,
            document.page_width,
            document.page_height,
            self.config.spacing_px,
            order.len(),
            self.config.swipe_axis,
        );
        let worker = layout.and_then(|layout| {
            RenderWorker::spawn(
                Arc::clone(&self.engine),
                Arc::clone(&document.document),
                &self.config,
            )
            .map(|worker| (layout, worker))
        });

        match worker {
            Ok((layout, worker)) => Ok(Session {
                document,
                order,
                layout,
                worker,
                first_render_pending: true,
            }),
            Err(e) => {
                self.engine.close_document(&document.document);
                Err(e)
            }
        }
    }

    fn handle_event(&mut self, event: WorkerEvent, surface: &mut dyn RenderSurface) {
        match event {
            WorkerEvent::TileReady(tile) => {
                let drawn = tile.clone();
                let stored = if tile.is_thumbnail {
                    self.cache.insert_thumbnail(tile)
                } else {
                    self.cache.insert(tile)
                };
                if !stored {
                    return;
                }
                surface.on_tile_ready(&drawn);

                if let LoadState::Loaded(session) = &mut self.state {
                    if session.first_render_pending {
                        session.first_render_pending = false;
                        surface.on_first_render();
                    }
                }
            }
            WorkerEvent::PageError { page, error } => surface.on_page_error(page, &error),
        }
    }
}

impl<E: DocumentEngine> Drop for TileScheduler<E> {
    fn drop(&mut self) {
        self.close();
    }
}
