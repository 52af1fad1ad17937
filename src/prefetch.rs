//! Viewport-driven tile enumeration.
//!
//! One call to [`PassPlanner::plan`] is one scheduling pass: it opens a new
//! cache generation, walks the visible cells of every page under the
//! viewport, then a few preload lines in the scroll direction, and finally
//! the thumbnails of the neighbouring pages. Cached cells are promoted,
//! missing ones are handed to the caller as [`RenderRequest`]s.
//!
//! A "line" is a row of cells when pages stack vertically and a column of
//! cells when they stack horizontally.

use std::collections::HashSet;

use crate::cache::{HitKind, TileCache};
use crate::config::RenderConfig;
use crate::geometry::RelRect;
use crate::layout::{PageLayout, ScrollDirection, SwipeAxis, Viewport};
use crate::page_order::PageOrder;
use crate::tile::{PixelFormat, TileKey};
use crate::worker::RenderRequest;

/// Result of one scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Cells that consumed a priority order (hits and misses).
    pub cells: usize,
    pub cache_hits: usize,
    pub tiles_requested: usize,
    pub thumbnails_requested: usize,
    /// The per-pass tile budget stopped enumeration early.
    pub budget_exhausted: bool,
}

/// Plans scheduling passes.
#[derive(Debug, Clone)]
pub struct PassPlanner {
    part_size: f32,
    thumbnail_ratio: f32,
    preload_count: usize,
    max_tiles: usize,
    format: PixelFormat,
    annotations: bool,
}

impl PassPlanner {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            part_size: config.part_size,
            thumbnail_ratio: config.thumbnail_ratio,
            preload_count: config.preload_count,
            max_tiles: config.max_tiles_per_pass,
            format: PixelFormat::for_quality(config.best_quality),
            annotations: config.annotation_rendering,
        }
    }

    /// Run one pass against `cache`, feeding every miss to `submit`.
    pub fn plan(
        &self,
        layout: &PageLayout,
        order: &PageOrder,
        viewport: &Viewport,
        cache: &TileCache,
        submit: &mut dyn FnMut(RenderRequest),
    ) -> PassSummary {
        cache.begin_new_generation();

        let Some(geometry) = PassGeometry::new(layout, viewport, self.part_size, self.thumbnail_ratio)
        else {
            return PassSummary::default();
        };

        let (offset, view_length) = viewport.along(layout.axis);
        let leading = (-offset).max(0.0);
        let first = geometry.locate(leading);
        let last = geometry.locate(leading + (view_length - 1.0).max(0.0));
        let page_count = order.len();

        let mut pass = Pass {
            planner: self,
            geometry: &geometry,
            order,
            cache,
            submit,
            next_order: 1,
            thumbnails_seen: HashSet::new(),
            summary: PassSummary::default(),
        };

        let mut cursor = first;
        while cursor.page < page_count && !pass.exhausted() {
            pass.load_line(cursor);
            if cursor == last {
                break;
            }
            cursor = geometry.next(cursor);
        }

        match viewport.direction {
            ScrollDirection::Forward => {
                let mut cursor = geometry.next(last);
                for _ in 0..self.preload_count {
                    if cursor.page >= page_count {
                        break;
                    }
                    pass.load_line(cursor);
                    cursor = geometry.next(cursor);
                }
            }
            ScrollDirection::Backward | ScrollDirection::None => {
                let mut cursor = geometry.prev(first);
                for _ in 0..self.preload_count {
                    let Some(current) = cursor else { break };
                    pass.load_line(current);
                    cursor = geometry.prev(current);
                }
            }
        }

        if let Some(before) = first.page.checked_sub(1) {
            pass.load_neighbour_thumbnail(before);
        }
        pass.load_neighbour_thumbnail(last.page + 1);

        let summary = pass.summary;
        log::debug!(
            "[PASS] pages {}..={} cells={} hits={} requested={} thumbs={} exhausted={}",
            first.page,
            last.page,
            summary.cells,
            summary.cache_hits,
            summary.tiles_requested,
            summary.thumbnails_requested,
            summary.budget_exhausted
        );
        summary
    }
}

/// A line within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LineCursor {
    page: usize,
    line: usize,
}

/// Cell grid for one pass, derived from the layout and the zoom.
struct PassGeometry {
    axis: SwipeAxis,
    lines_per_page: usize,
    /// Scaled distance between the leading edges of consecutive pages.
    stride: f32,
    /// Scaled length of one line along the swipe axis.
    line_length: f32,
    /// Cells across one line; every one of them is walked.
    cells_per_line: usize,
    /// Tile size as a page fraction.
    rel_width: f32,
    rel_height: f32,
    scaled_width: f32,
    scaled_height: f32,
    thumbnail_width: f32,
    thumbnail_height: f32,
}

impl PassGeometry {
    fn new(
        layout: &PageLayout,
        viewport: &Viewport,
        part_size: f32,
        thumbnail_ratio: f32,
    ) -> Option<Self> {
        let zoom = viewport.zoom;
        if !(zoom > 0.0) || layout.page_count == 0 {
            return None;
        }
        let scaled_width = layout.page_width * zoom;
        let scaled_height = layout.page_height * zoom;
        if !(scaled_width > 0.0 && scaled_height > 0.0) {
            return None;
        }

        let rel_width = (part_size / scaled_width).min(1.0);
        let rel_height = (part_size / scaled_height).min(1.0);
        let cols = ((1.0 / rel_width).ceil() as usize).max(1);
        let rows = ((1.0 / rel_height).ceil() as usize).max(1);

        let (lines_per_page, cells_per_line, line_length) = match layout.axis {
            SwipeAxis::Vertical => (rows, cols, rel_height * scaled_height),
            SwipeAxis::Horizontal => (cols, rows, rel_width * scaled_width),
        };

        Some(Self {
            axis: layout.axis,
            lines_per_page,
            stride: layout.stride(zoom),
            line_length,
            cells_per_line,
            rel_width,
            rel_height,
            scaled_width,
            scaled_height,
            thumbnail_width: (layout.page_width * thumbnail_ratio).trunc(),
            thumbnail_height: (layout.page_height * thumbnail_ratio).trunc(),
        })
    }

    /// Line under a swipe-axis position. A position inside the spacing gap
    /// belongs to the last line of the page before it.
    fn locate(&self, position: f32) -> LineCursor {
        let position = position.max(0.0);
        let page = (position / self.stride).floor() as usize;
        let within = position - page as f32 * self.stride;
        let line = ((within / self.line_length).floor() as usize).min(self.lines_per_page - 1);
        LineCursor { page, line }
    }

    fn next(&self, cursor: LineCursor) -> LineCursor {
        if cursor.line + 1 < self.lines_per_page {
            LineCursor {
                page: cursor.page,
                line: cursor.line + 1,
            }
        } else {
            LineCursor {
                page: cursor.page + 1,
                line: 0,
            }
        }
    }

    fn prev(&self, cursor: LineCursor) -> Option<LineCursor> {
        if cursor.line > 0 {
            Some(LineCursor {
                page: cursor.page,
                line: cursor.line - 1,
            })
        } else {
            cursor.page.checked_sub(1).map(|page| LineCursor {
                page,
                line: self.lines_per_page - 1,
            })
        }
    }

    /// `(row, col)` of a cell given its line and its index across the line.
    fn cell(&self, line: usize, cross: usize) -> (usize, usize) {
        match self.axis {
            SwipeAxis::Vertical => (line, cross),
            SwipeAxis::Horizontal => (cross, line),
        }
    }
}

/// Mutable state of a pass in progress.
struct Pass<'a> {
    planner: &'a PassPlanner,
    geometry: &'a PassGeometry,
    order: &'a PageOrder,
    cache: &'a TileCache,
    submit: &'a mut dyn FnMut(RenderRequest),
    next_order: u32,
    thumbnails_seen: HashSet<usize>,
    summary: PassSummary,
}

impl Pass<'_> {
    fn exhausted(&self) -> bool {
        self.summary.cells >= self.planner.max_tiles
    }

    fn load_line(&mut self, cursor: LineCursor) {
        if self.exhausted() {
            self.summary.budget_exhausted = true;
            return;
        }
        let Some(document_page) = self.order.document_page(cursor.page) else {
            return;
        };
        self.load_thumbnail(cursor.page, document_page);

        for cross in 0..self.geometry.cells_per_line {
            if self.exhausted() {
                self.summary.budget_exhausted = true;
                return;
            }
            let (row, col) = self.geometry.cell(cursor.line, cross);
            self.load_cell(cursor.page, document_page, row, col);
        }
    }

    /// Returns `false` for zero-size cells, which consume no priority.
    fn load_cell(&mut self, sequence_index: usize, document_page: usize, row: usize, col: usize) -> bool {
        let g = self.geometry;
        let rel_x = col as f32 * g.rel_width;
        let rel_y = row as f32 * g.rel_height;
        let width_fraction = g.rel_width.min(1.0 - rel_x);
        let height_fraction = g.rel_height.min(1.0 - rel_y);
        let render_width = width_fraction * g.scaled_width;
        let render_height = height_fraction * g.scaled_height;

        if render_width < 1.0 || render_height < 1.0 {
            return false;
        }

        let key = TileKey::new(
            sequence_index,
            document_page,
            render_width,
            render_height,
            RelRect::from_origin_size(rel_x, rel_y, width_fraction, height_fraction),
        );
        let priority_order = self.next_order;
        self.next_order += 1;
        self.summary.cells += 1;

        match self.cache.lookup_and_promote(&key, priority_order) {
            HitKind::Hit => self.summary.cache_hits += 1,
            HitKind::Miss => {
                let request = self.request(key, false, priority_order);
                (self.submit)(request);
                self.summary.tiles_requested += 1;
            }
        }
        true
    }

    fn load_thumbnail(&mut self, sequence_index: usize, document_page: usize) {
        if !self.thumbnails_seen.insert(sequence_index) {
            return;
        }
        let g = self.geometry;
        if g.thumbnail_width < 1.0 || g.thumbnail_height < 1.0 {
            return;
        }
        let key = TileKey::new(
            sequence_index,
            document_page,
            g.thumbnail_width,
            g.thumbnail_height,
            RelRect::FULL,
        );
        if !self.cache.thumbnail_contains(&key) {
            let request = self.request(key, true, 0);
            (self.submit)(request);
            self.summary.thumbnails_requested += 1;
        }
    }

    fn load_neighbour_thumbnail(&mut self, sequence_index: usize) {
        if let Some(document_page) = self.order.document_page(sequence_index) {
            self.load_thumbnail(sequence_index, document_page);
        }
    }

    fn request(&self, key: TileKey, is_thumbnail: bool, priority_order: u32) -> RenderRequest {
        RenderRequest {
            key,
            is_thumbnail,
            priority_order,
            format: self.planner.format,
            annotations: self.planner.annotations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_tile;

    fn square_layout(side: f32, page_count: usize, axis: SwipeAxis) -> PageLayout {
        PageLayout {
            page_width: side,
            page_height: side,
            spacing: 0.0,
            page_count,
            axis,
        }
    }

    fn run(
        planner: &PassPlanner,
        layout: &PageLayout,
        order: &PageOrder,
        viewport: &Viewport,
        cache: &TileCache,
    ) -> (PassSummary, Vec<RenderRequest>) {
        let mut requests = Vec::new();
        let summary = planner.plan(layout, order, viewport, cache, &mut |r| requests.push(r));
        (summary, requests)
    }

    fn tiles_for(requests: &[RenderRequest], page: usize) -> Vec<&RenderRequest> {
        requests
            .iter()
            .filter(|r| !r.is_thumbnail && r.key.sequence_index == page)
            .collect()
    }

    #[test]
    fn test_middle_page_of_three() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 3, SwipeAxis::Vertical);
        let order = PageOrder::identity(3);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0).with_offset(0.0, -512.0);

        let (summary, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let thumbnails: Vec<usize> = requests
            .iter()
            .filter(|r| r.is_thumbnail)
            .map(|r| r.key.sequence_index)
            .collect();
        assert!(thumbnails.contains(&0));
        assert!(thumbnails.contains(&2));

        let page_one = tiles_for(&requests, 1);
        assert_eq!(page_one.len(), 4);
        let orders: Vec<u32> = page_one.iter().map(|r| r.priority_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4]);
        assert!(page_one
            .iter()
            .all(|r| r.key.width == 256.0 && r.key.height == 256.0));

        // Direction None preloads the line above: the bottom row of page 0.
        let page_zero = tiles_for(&requests, 0);
        assert_eq!(page_zero.len(), 2);
        assert!(page_zero.iter().all(|r| r.key.bounds.top == 0.5));
        assert_eq!(summary.cells, 6);
    }

    #[test]
    fn test_forward_preloads_below() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 3, SwipeAxis::Vertical);
        let order = PageOrder::identity(3);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0)
            .with_offset(0.0, -512.0)
            .with_direction(ScrollDirection::Forward);

        let (_, requests) = run(&planner, &layout, &order, &viewport, &cache);

        assert!(tiles_for(&requests, 0).is_empty());
        let page_two = tiles_for(&requests, 2);
        assert_eq!(page_two.len(), 2);
        assert!(page_two.iter().all(|r| r.key.bounds.top == 0.0));
        assert!(page_two.iter().all(|r| r.priority_order > 4));
    }

    #[test]
    fn test_partial_cell_is_clamped() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(600.0, 1, SwipeAxis::Vertical);
        let order = PageOrder::identity(1);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(600.0, 600.0);

        let (_, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let tiles = tiles_for(&requests, 0);
        assert_eq!(tiles.len(), 9);
        for request in &tiles {
            let bounds = request.key.bounds;
            assert!(bounds.right <= 1.0 + 1e-6);
            let expected = bounds.width() * 600.0;
            assert!((request.key.width - expected).abs() < 1e-3);
        }
        let trailing = tiles
            .iter()
            .find(|r| r.key.bounds.left > 0.8)
            .map(|r| r.key)
            .unwrap();
        assert!((trailing.width - (1.0 - trailing.bounds.left) * 600.0).abs() < 1e-3);
        assert!(trailing.width < 256.0);
    }

    #[test]
    fn test_second_pass_promotes_instead_of_requesting() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 2, SwipeAxis::Vertical);
        let order = PageOrder::identity(2);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0);

        let (_, requests) = run(&planner, &layout, &order, &viewport, &cache);
        for request in requests.iter().filter(|r| !r.is_thumbnail) {
            cache.insert(make_tile(request.key, request.priority_order));
        }

        let (summary, requests) = run(&planner, &layout, &order, &viewport, &cache);
        assert!(requests.iter().all(|r| r.is_thumbnail));
        assert_eq!(summary.tiles_requested, 0);
        assert_eq!(summary.cache_hits, summary.cells);
        assert_eq!(cache.generation_sizes().1, 0);
    }

    #[test]
    fn test_budget_limits_cells() {
        let config = RenderConfig {
            max_tiles_per_pass: 3,
            ..Default::default()
        };
        let planner = PassPlanner::new(&config);
        let layout = square_layout(512.0, 3, SwipeAxis::Vertical);
        let order = PageOrder::identity(3);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0).with_offset(0.0, -512.0);

        let (summary, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let orders: Vec<u32> = requests
            .iter()
            .filter(|r| !r.is_thumbnail)
            .map(|r| r.priority_order)
            .collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert!(summary.budget_exhausted);
    }

    #[test]
    fn test_unresolved_page_consumes_no_priority() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 2, SwipeAxis::Vertical);
        let order = PageOrder::new(vec![9, 0], 3);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 1024.0);

        let (summary, requests) = run(&planner, &layout, &order, &viewport, &cache);

        assert!(tiles_for(&requests, 0).is_empty());
        let second = tiles_for(&requests, 1);
        assert_eq!(second.len(), 4);
        assert_eq!(second[0].priority_order, 1);
        assert!(second.iter().all(|r| r.key.document_page == 0));
        assert_eq!(summary.cells, 4);
    }

    #[test]
    fn test_zoom_increases_grid() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 1, SwipeAxis::Vertical);
        let order = PageOrder::identity(1);
        let cache = TileCache::new(120, 120);
        // Zoomed 2x, looking at the top-left quarter of the page.
        let viewport = Viewport::new(512.0, 512.0).with_zoom(2.0);

        let (_, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let tiles = tiles_for(&requests, 0);
        assert_eq!(tiles.len(), 8);
        assert!(tiles.iter().all(|r| r.key.bounds.width() == 0.25));
        assert!(tiles.iter().all(|r| r.key.bounds.bottom <= 0.5));
        let columns: HashSet<u32> = tiles
            .iter()
            .map(|r| (r.key.bounds.left * 4.0).round() as u32)
            .collect();
        assert_eq!(columns, (0..4).collect());
    }

    #[test]
    fn test_panned_pass_walks_whole_rows() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 1, SwipeAxis::Vertical);
        let order = PageOrder::identity(1);
        let cache = TileCache::new(120, 120);
        let centred = Viewport::new(512.0, 512.0).with_zoom(2.0);
        let panned = centred.with_offset(-600.0, 0.0);

        let (_, at_left) = run(&planner, &layout, &order, &centred, &cache);
        let cache = TileCache::new(120, 120);
        let (summary, at_right) = run(&planner, &layout, &order, &panned, &cache);

        let tiles = tiles_for(&at_right, 0);
        let cells: Vec<(u32, u32, u32)> = tiles
            .iter()
            .map(|r| {
                let row = (r.key.bounds.top * 4.0).round() as u32;
                let col = (r.key.bounds.left * 4.0).round() as u32;
                (r.priority_order, row, col)
            })
            .collect();
        let expected: Vec<(u32, u32, u32)> = (0..8).map(|i| (i + 1, i / 4, i % 4)).collect();
        assert_eq!(cells, expected);
        assert_eq!(summary.cells, 8);

        let left_keys: Vec<TileKey> = tiles_for(&at_left, 0).iter().map(|r| r.key).collect();
        let right_keys: Vec<TileKey> = tiles.iter().map(|r| r.key).collect();
        assert_eq!(left_keys, right_keys);
    }

    #[test]
    fn test_horizontal_axis_walks_columns() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 3, SwipeAxis::Horizontal);
        let order = PageOrder::identity(3);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0)
            .with_offset(-512.0, 0.0)
            .with_direction(ScrollDirection::Forward);

        let (_, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let page_one = tiles_for(&requests, 1);
        let lefts: Vec<f32> = page_one.iter().map(|r| r.key.bounds.left).collect();
        assert_eq!(lefts, vec![0.0, 0.0, 0.5, 0.5]);
        let page_two = tiles_for(&requests, 2);
        assert!(page_two.iter().all(|r| r.key.bounds.left == 0.0));
    }

    #[test]
    fn test_thumbnail_requested_once_per_pass() {
        let planner = PassPlanner::new(&RenderConfig::default());
        let layout = square_layout(512.0, 1, SwipeAxis::Vertical);
        let order = PageOrder::identity(1);
        let cache = TileCache::new(120, 120);
        let viewport = Viewport::new(512.0, 512.0);

        let (summary, requests) = run(&planner, &layout, &order, &viewport, &cache);

        let thumbs: Vec<&RenderRequest> = requests.iter().filter(|r| r.is_thumbnail).collect();
        assert_eq!(thumbs.len(), 1);
        assert_eq!(summary.thumbnails_requested, 1);
        assert_eq!(thumbs[0].priority_order, 0);
        assert_eq!(thumbs[0].key.width, (512.0f32 * 0.3).trunc());
        assert!(thumbs[0].key.bounds.approx_eq(&RelRect::FULL));
    }
}
