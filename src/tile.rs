//! Tile identity and pixel storage.

use bytes::Bytes;

use crate::error::{RenderError, RenderResult};
use crate::geometry::{approx_eq, RelRect};

/// Colour depth of a rendered buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit ARGB, one little-endian `u32` per pixel.
    Argb8888,
    /// 16-bit RGB, one little-endian `u16` per pixel.
    Rgb565,
}

impl PixelFormat {
    pub fn for_quality(best_quality: bool) -> Self {
        if best_quality {
            PixelFormat::Argb8888
        } else {
            PixelFormat::Rgb565
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Argb8888 => 4,
            PixelFormat::Rgb565 => 2,
        }
    }

    /// Encode an ARGB colour as one pixel in this format.
    fn encode(self, argb: u32, out: &mut [u8]) {
        match self {
            PixelFormat::Argb8888 => out.copy_from_slice(&argb.to_le_bytes()),
            PixelFormat::Rgb565 => {
                let r = (argb >> 16) & 0xFF;
                let g = (argb >> 8) & 0xFF;
                let b = argb & 0xFF;
                let packed = (((r >> 3) << 11) | ((g >> 2) << 5) | (b >> 3)) as u16;
                out.copy_from_slice(&packed.to_le_bytes());
            }
        }
    }
}

/// Writable pixel buffer handed to the engine during a render.
#[derive(Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Allocate a zeroed buffer, reporting failure instead of aborting.
    pub fn allocate(width: u32, height: u32, format: PixelFormat) -> RenderResult<Self> {
        let alloc_error = || RenderError::BufferAllocation {
            width,
            height,
            format,
        };
        if width == 0 || height == 0 {
            return Err(alloc_error());
        }

        let len = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(alloc_error)?;

        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|_| alloc_error())?;
        data.resize(len, 0);

        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Paint every pixel with one ARGB colour.
    pub fn fill(&mut self, argb: u32) {
        let bpp = self.format.bytes_per_pixel();
        let mut pixel = [0u8; 4];
        self.format.encode(argb, &mut pixel[..bpp]);
        for chunk in self.data.chunks_exact_mut(bpp) {
            chunk.copy_from_slice(&pixel[..bpp]);
        }
    }

    /// Seal the buffer. The result is cheap to clone for drawing.
    pub fn freeze(self) -> TilePixels {
        TilePixels {
            width: self.width,
            height: self.height,
            format: self.format,
            data: Bytes::from(self.data),
        }
    }
}

/// Immutable rendered pixels owned by a [`Tile`].
#[derive(Debug, Clone)]
pub struct TilePixels {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl TilePixels {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Identity of a cache slot.
///
/// Two keys name the same slot when pages, sizes and bounds all match
/// within [`crate::geometry::BOUNDS_EPSILON`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileKey {
    /// Position in the user-visible page sequence.
    pub sequence_index: usize,
    /// Underlying document page.
    pub document_page: usize,
    /// Rendered size in device pixels.
    pub width: f32,
    pub height: f32,
    pub bounds: RelRect,
}

impl TileKey {
    pub fn new(
        sequence_index: usize,
        document_page: usize,
        width: f32,
        height: f32,
        bounds: RelRect,
    ) -> Self {
        Self {
            sequence_index,
            document_page,
            width,
            height,
            bounds,
        }
    }

    /// Same slot as `other`.
    pub fn matches(&self, other: &TileKey) -> bool {
        self.document_page == other.document_page
            && self.sequence_index == other.sequence_index
            && approx_eq(self.width, other.width)
            && approx_eq(self.height, other.height)
            && self.bounds.approx_eq(&other.bounds)
    }

    /// Buffer dimensions; fractional pixels are truncated.
    pub fn pixel_size(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

/// A rendered slice of one page.
#[derive(Debug, Clone)]
pub struct Tile {
    pub key: TileKey,
    pub is_thumbnail: bool,
    /// Request sequence number within its scheduling pass.
    pub priority_order: u32,
    pub pixels: TilePixels,
}

impl Tile {
    pub fn new(key: TileKey, is_thumbnail: bool, priority_order: u32, pixels: TilePixels) -> Self {
        Self {
            key,
            is_thumbnail,
            priority_order,
            pixels,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.pixels.size_bytes()
    }

    /// Give the buffer back. Returns the number of bytes released.
    pub fn release(self) -> usize {
        let released = self.pixels.size_bytes();
        drop(self.pixels);
        released
    }
}
