//! Page placement along the swipe axis.
//!
//! Offsets follow the content-translation convention: a document scrolled
//! down by 500px has `offset_y == -500.0`.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};

/// Axis along which consecutive pages are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwipeAxis {
    Vertical,
    Horizontal,
}

/// Direction of the last scroll along the swipe axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScrollDirection {
    /// Towards later pages.
    Forward,
    /// Towards earlier pages.
    Backward,
    #[default]
    None,
}

impl ScrollDirection {
    /// Direction implied by moving the swipe-axis offset from `old` to `new`.
    pub fn between(old: f32, new: f32) -> Self {
        if new < old {
            ScrollDirection::Forward
        } else if new > old {
            ScrollDirection::Backward
        } else {
            ScrollDirection::None
        }
    }
}

/// Viewport state for one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub offset_x: f32,
    pub offset_y: f32,
    pub width: f32,
    pub height: f32,
    pub zoom: f32,
    pub direction: ScrollDirection,
}

impl Viewport {
    /// Unscrolled, unzoomed viewport of the given size.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            width,
            height,
            zoom: 1.0,
            direction: ScrollDirection::None,
        }
    }

    pub fn with_offset(mut self, offset_x: f32, offset_y: f32) -> Self {
        self.offset_x = offset_x;
        self.offset_y = offset_y;
        self
    }

    pub fn with_zoom(mut self, zoom: f32) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_direction(mut self, direction: ScrollDirection) -> Self {
        self.direction = direction;
        self
    }

    /// `(offset, length)` along `axis`.
    pub fn along(&self, axis: SwipeAxis) -> (f32, f32) {
        match axis {
            SwipeAxis::Vertical => (self.offset_y, self.height),
            SwipeAxis::Horizontal => (self.offset_x, self.width),
        }
    }

    /// `(offset, length)` perpendicular to `axis`.
    pub fn across(&self, axis: SwipeAxis) -> (f32, f32) {
        match axis {
            SwipeAxis::Vertical => (self.offset_x, self.width),
            SwipeAxis::Horizontal => (self.offset_y, self.height),
        }
    }
}

/// Uniform page geometry for a loaded document.
///
/// Every page shares the size fitted from the first page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLayout {
    /// Fitted page width at zoom 1.
    pub page_width: f32,
    /// Fitted page height at zoom 1.
    pub page_height: f32,
    /// Gap between pages at zoom 1.
    pub spacing: f32,
    /// Number of pages in the user-visible sequence.
    pub page_count: usize,
    pub axis: SwipeAxis,
}

impl PageLayout {
    /// Fit a `page_width` x `page_height` page into the view.
    ///
    /// Width-fit first; if that makes the page taller than the view, fit to
    /// height instead. The derived dimension is floored to whole pixels.
    pub fn fit(
        view_width: f32,
        view_height: f32,
        page_width: f32,
        page_height: f32,
        spacing: f32,
        page_count: usize,
        axis: SwipeAxis,
    ) -> RenderResult<Self> {
        if !(page_width > 0.0 && page_height > 0.0) {
            return Err(RenderError::InvalidPageSize {
                width: page_width,
                height: page_height,
            });
        }
        if !(view_width > 0.0 && view_height > 0.0) {
            return Err(RenderError::InvalidPageSize {
                width: view_width,
                height: view_height,
            });
        }

        let ratio = page_width / page_height;
        let mut w = view_width;
        let mut h = (view_width / ratio).floor();
        if h > view_height {
            h = view_height;
            w = (view_height * ratio).floor();
        }

        Ok(Self {
            page_width: w,
            page_height: h,
            spacing,
            page_count,
            axis,
        })
    }

    /// Page extent along the swipe axis at zoom 1.
    pub fn extent_along(&self) -> f32 {
        match self.axis {
            SwipeAxis::Vertical => self.page_height,
            SwipeAxis::Horizontal => self.page_width,
        }
    }

    /// Page extent across the swipe axis at zoom 1.
    pub fn extent_across(&self) -> f32 {
        match self.axis {
            SwipeAxis::Vertical => self.page_width,
            SwipeAxis::Horizontal => self.page_height,
        }
    }

    /// Distance between the leading edges of consecutive pages.
    pub fn stride(&self, zoom: f32) -> f32 {
        (self.extent_along() + self.spacing) * zoom
    }

    /// Leading edge of `page`, as a positive distance from the document start.
    pub fn page_offset(&self, page: usize, zoom: f32) -> f32 {
        page as f32 * self.stride(zoom)
    }

    /// Length of the whole document along the swipe axis.
    pub fn doc_length(&self, zoom: f32) -> f32 {
        if self.page_count == 0 {
            return 0.0;
        }
        let n = self.page_count as f32;
        (n * self.extent_along() + (n - 1.0) * self.spacing) * zoom
    }

    /// Page under the centre of a viewport scrolled to `offset`. Overscroll
    /// past the leading edge (positive offsets) counts as offset zero.
    pub fn page_at_offset(&self, offset: f32, view_length: f32, zoom: f32) -> usize {
        if self.page_count == 0 {
            return 0;
        }
        let stride = self.stride(zoom);
        if stride <= 0.0 {
            return 0;
        }
        let centre = (-offset).max(0.0) + view_length / 2.0;
        let page = (centre / stride).floor() as usize;
        page.min(self.page_count - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_between() {
        assert_eq!(ScrollDirection::between(0.0, -10.0), ScrollDirection::Forward);
        assert_eq!(ScrollDirection::between(-10.0, 0.0), ScrollDirection::Backward);
        assert_eq!(ScrollDirection::between(-5.0, -5.0), ScrollDirection::None);
    }

    #[test]
    fn test_fit_width_first() {
        // A4-ish portrait page in a tall view: width-fit.
        let layout =
            PageLayout::fit(1080.0, 1920.0, 595.0, 842.0, 0.0, 4, SwipeAxis::Vertical).unwrap();
        assert_eq!(layout.page_width, 1080.0);
        assert_eq!(layout.page_height, (1080.0f32 / (595.0 / 842.0)).floor());
    }

    #[test]
    fn test_fit_falls_back_to_height() {
        // Landscape view, portrait page: height-fit.
        let layout =
            PageLayout::fit(1920.0, 1080.0, 595.0, 842.0, 0.0, 4, SwipeAxis::Vertical).unwrap();
        assert_eq!(layout.page_height, 1080.0);
        assert_eq!(layout.page_width, (1080.0f32 * (595.0 / 842.0)).floor());
    }

    #[test]
    fn test_fit_rejects_empty_page() {
        let result = PageLayout::fit(100.0, 100.0, 0.0, 10.0, 0.0, 1, SwipeAxis::Vertical);
        assert!(matches!(result, Err(RenderError::InvalidPageSize { .. })));
    }

    #[test]
    fn test_offsets_and_length_with_spacing() {
        let layout = PageLayout {
            page_width: 400.0,
            page_height: 500.0,
            spacing: 10.0,
            page_count: 3,
            axis: SwipeAxis::Vertical,
        };
        assert_eq!(layout.page_offset(2, 1.0), 1020.0);
        assert_eq!(layout.page_offset(1, 2.0), 1020.0);
        assert_eq!(layout.doc_length(1.0), 1520.0);

        let horizontal = PageLayout {
            axis: SwipeAxis::Horizontal,
            ..layout
        };
        assert_eq!(horizontal.page_offset(1, 1.0), 410.0);
    }

    #[test]
    fn test_page_at_offset_uses_centre() {
        let layout = PageLayout {
            page_width: 500.0,
            page_height: 500.0,
            spacing: 0.0,
            page_count: 3,
            axis: SwipeAxis::Vertical,
        };
        assert_eq!(layout.page_at_offset(0.0, 400.0, 1.0), 0);
        assert_eq!(layout.page_at_offset(-400.0, 400.0, 1.0), 1);
        assert_eq!(layout.page_at_offset(-5000.0, 400.0, 1.0), 2);
    }

    #[test]
    fn test_page_at_offset_ignores_overscroll() {
        let layout = PageLayout {
            page_width: 500.0,
            page_height: 500.0,
            spacing: 0.0,
            page_count: 3,
            axis: SwipeAxis::Vertical,
        };
        // Pulled 400px past the top: still the first page, not the second.
        assert_eq!(layout.page_at_offset(400.0, 400.0, 1.0), 0);
        assert_eq!(layout.page_at_offset(5000.0, 400.0, 1.0), 0);
    }

    #[test]
    fn test_viewport_axis_projection() {
        let viewport = Viewport::new(300.0, 600.0).with_offset(-10.0, -20.0);
        assert_eq!(viewport.along(SwipeAxis::Vertical), (-20.0, 600.0));
        assert_eq!(viewport.across(SwipeAxis::Vertical), (-10.0, 300.0));
        assert_eq!(viewport.along(SwipeAxis::Horizontal), (-10.0, 300.0));
    }
}
