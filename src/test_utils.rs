//! Shared test fixtures: a scripted engine and tile builders.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::document::{DocumentEngine, DocumentSource};
use crate::error::EngineError;
use crate::geometry::{DeviceRect, RelRect};
use crate::tile::{PixelBuffer, PixelFormat, Tile, TileKey};

/// Colour the fake engine paints rendered regions with.
pub const RENDERED_COLOR: u32 = 0xFF00_FF00;

#[derive(Debug)]
pub struct FakeDocument;

/// One `render_region` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderCall {
    pub page: usize,
    pub rect: DeviceRect,
    pub buffer_size: (u32, u32),
    pub annotations: bool,
}

/// In-memory engine with scripted failures and optional blocking points.
pub struct FakeEngine {
    page_count: usize,
    page_size: (f32, f32),
    failing_pages: HashSet<usize>,
    fail_open: bool,
    open_gate: Option<Receiver<()>>,
    render_gate: Option<(Receiver<()>, Sender<usize>)>,
    opened_pages: Mutex<Vec<usize>>,
    renders: Mutex<Vec<RenderCall>>,
    pub closed: AtomicUsize,
}

impl FakeEngine {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            page_size: (512.0, 512.0),
            failing_pages: HashSet::new(),
            fail_open: false,
            open_gate: None,
            render_gate: None,
            opened_pages: Mutex::new(Vec::new()),
            renders: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, width: f32, height: f32) -> Self {
        self.page_size = (width, height);
        self
    }

    pub fn with_failing_page(mut self, page: usize) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn with_failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// `open_document` blocks until a message arrives on `gate`.
    pub fn with_open_gate(mut self, gate: Receiver<()>) -> Self {
        self.open_gate = Some(gate);
        self
    }

    /// `render_region` reports its page on `started`, then blocks on `gate`.
    pub fn with_render_gate(mut self, gate: Receiver<()>, started: Sender<usize>) -> Self {
        self.render_gate = Some((gate, started));
        self
    }

    /// Every `open_page` call in order, failed ones included.
    pub fn opened_pages(&self) -> Vec<usize> {
        self.opened_pages.lock().clone()
    }

    pub fn renders(&self) -> Vec<RenderCall> {
        self.renders.lock().clone()
    }
}

impl DocumentEngine for FakeEngine {
    type Document = FakeDocument;

    fn open_document(
        &self,
        _source: &DocumentSource,
        _password: Option<&str>,
    ) -> Result<FakeDocument, EngineError> {
        if let Some(gate) = &self.open_gate {
            let _ = gate.recv();
        }
        if self.fail_open {
            return Err("incorrect password".into());
        }
        Ok(FakeDocument)
    }

    fn page_count(&self, _document: &FakeDocument) -> usize {
        self.page_count
    }

    fn page_size(&self, _document: &FakeDocument, _page: usize) -> Result<(f32, f32), EngineError> {
        Ok(self.page_size)
    }

    fn open_page(&self, _document: &FakeDocument, page: usize) -> Result<(), EngineError> {
        self.opened_pages.lock().push(page);
        if self.failing_pages.contains(&page) {
            return Err(format!("page {page} is damaged").into());
        }
        Ok(())
    }

    fn render_region(
        &self,
        _document: &FakeDocument,
        page: usize,
        target: &mut PixelBuffer,
        rect: DeviceRect,
        annotations: bool,
    ) -> Result<(), EngineError> {
        if let Some((gate, started)) = &self.render_gate {
            let _ = started.send(page);
            let _ = gate.recv();
        }
        self.renders.lock().push(RenderCall {
            page,
            rect,
            buffer_size: (target.width(), target.height()),
            annotations,
        });
        target.fill(RENDERED_COLOR);
        Ok(())
    }

    fn close_document(&self, _document: &FakeDocument) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A small tile key, distinct for each `(page, index)`.
pub fn tile_key(page: usize, index: u32) -> TileKey {
    let left = (index % 10) as f32 * 0.1;
    let top = (index / 10) as f32 * 0.1;
    TileKey::new(
        page,
        page,
        4.0,
        4.0,
        RelRect::from_origin_size(left, top, 0.1, 0.1),
    )
}

pub fn make_tile(key: TileKey, priority_order: u32) -> Tile {
    Tile::new(key, false, priority_order, pixels_for(&key))
}

pub fn make_thumbnail(key: TileKey) -> Tile {
    Tile::new(key, true, 0, pixels_for(&key))
}

fn pixels_for(key: &TileKey) -> crate::tile::TilePixels {
    let (width, height) = key.pixel_size();
    PixelBuffer::allocate(width.max(1), height.max(1), PixelFormat::Rgb565)
        .unwrap()
        .freeze()
}
