//! pagetile_core - tile scheduling for paginated document viewers.
//!
//! This crate provides:
//! - A two-generation tile cache with a thumbnail lane and min-order eviction
//! - Viewport-driven scheduling passes (visible cells, preload lines, thumbnails)
//! - A serial background render worker with sticky per-page open state
//! - Cancellable background document decoding
//!
//! The page rasterizer is supplied by the embedder through [`DocumentEngine`].
//!
//! ```ignore
//! let mut scheduler = TileScheduler::new(engine, RenderConfig::default())?;
//! scheduler.load(DocumentSource::File(path), None, Vec::new(), 1080.0, 1920.0)?;
//!
//! // On the UI thread, after every scroll or zoom:
//! scheduler.update_viewport(&viewport)?;
//! scheduler.poll(&mut surface);
//! for tile in scheduler.snapshot_for_draw() {
//!     draw(&tile);
//! }
//! ```

mod cache;
mod config;
mod document;
mod error;
mod geometry;
mod layout;
mod page_order;
mod prefetch;
mod scheduler;
mod tile;
mod worker;
#[cfg(test)]
pub(crate) mod test_utils;

pub use cache::{CacheStats, HitKind, TileCache};
pub use config::{render_timing_enabled, RenderConfig};
pub use document::{decode_document, DecodedDocument, DocumentEngine, DocumentLoader, DocumentSource};
pub use error::{EngineError, RenderError, RenderResult};
pub use geometry::{DeviceRect, RelRect, BOUNDS_EPSILON};
pub use layout::{PageLayout, ScrollDirection, SwipeAxis, Viewport};
pub use page_order::PageOrder;
pub use prefetch::{PassPlanner, PassSummary};
pub use scheduler::{RenderSurface, TileScheduler};
pub use tile::{PixelBuffer, PixelFormat, Tile, TileKey, TilePixels};
pub use worker::{RenderRequest, RenderWorker, WorkerEvent};
