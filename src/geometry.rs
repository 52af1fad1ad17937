//! Page-relative and device-space rectangles.

/// Tolerance for comparing page-fraction coordinates.
///
/// Bounds come out of continuous zoom/scroll math, so two requests for the
/// same slot can differ in the last few bits.
pub const BOUNDS_EPSILON: f32 = 1e-4;

/// Rectangle in [0,1]x[0,1] page-fraction space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RelRect {
    /// The whole page.
    pub const FULL: RelRect = RelRect {
        left: 0.0,
        top: 0.0,
        right: 1.0,
        bottom: 1.0,
    };

    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn from_origin_size(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// Edge-wise comparison within [`BOUNDS_EPSILON`].
    pub fn approx_eq(&self, other: &RelRect) -> bool {
        approx_eq(self.left, other.left)
            && approx_eq(self.top, other.top)
            && approx_eq(self.right, other.right)
            && approx_eq(self.bottom, other.bottom)
    }

    /// Map this slice onto a device buffer of `width` x `height` pixels.
    ///
    /// Returns the rectangle the whole page must be drawn into so that only
    /// this slice lands inside the buffer: translate by `-origin`, then scale
    /// by `1 / size`, then round each edge to the nearest pixel.
    pub fn to_device(&self, width: u32, height: u32) -> DeviceRect {
        let w = width as f32;
        let h = height as f32;
        let scale_x = 1.0 / self.width();
        let scale_y = 1.0 / self.height();

        let left = (0.0 - self.left * w) * scale_x;
        let top = (0.0 - self.top * h) * scale_y;
        let right = (w - self.left * w) * scale_x;
        let bottom = (h - self.top * h) * scale_y;

        DeviceRect::from_edges(
            round_half_up(left),
            round_half_up(top),
            round_half_up(right),
            round_half_up(bottom),
        )
    }
}

/// Integer pixel rectangle in device space. May start at negative offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl DeviceRect {
    pub fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub fn right(&self) -> i32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.top + self.height
    }
}

pub(crate) fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() <= BOUNDS_EPSILON
}

fn round_half_up(v: f32) -> i32 {
    (v + 0.5).floor() as i32
}
