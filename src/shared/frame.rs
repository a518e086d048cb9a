// This is free and unencumbered software released into the public domain.

use bytes::Bytes;
use derive_more::Display;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum PixelFormat {
    /// Three planes: Y, U, V.
    #[display("yuv420")]
    Yuv420,
    /// One packed plane.
    #[display("rgb8")]
    Rgb8,
}

#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq)]
#[display("{width}x{height}")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Debug)]
pub struct Plane {
    pub data: Bytes,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl Plane {
    pub fn new(data: Bytes, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data,
            row_stride,
            pixel_stride,
        }
    }

    /// Number of readable bytes in this plane.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct Frame {
    pub planes: Vec<Plane>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub timestamp_ns: u64,
}

impl Frame {
    pub fn new_rgb8(data: Bytes, width: u32, height: u32, stride: u32) -> Self {
        Self {
            planes: vec![Plane::new(data, stride as usize, 3)],
            width,
            height,
            pixel_format: PixelFormat::Rgb8,
            timestamp_ns: 0,
        }
    }

    /// Builds an I420 frame from its three planes; chroma planes are
    /// subsampled by two in both directions.
    pub fn new_yuv420(y: Bytes, u: Bytes, v: Bytes, width: u32, height: u32) -> Self {
        let chroma_stride = width.div_ceil(2) as usize;
        Self {
            planes: vec![
                Plane::new(y, width as usize, 1),
                Plane::new(u, chroma_stride, 1),
                Plane::new(v, chroma_stride, 1),
            ],
            width,
            height,
            pixel_format: PixelFormat::Yuv420,
            timestamp_ns: 0,
        }
    }

    pub fn with_timestamp_ns(mut self, timestamp_ns: u64) -> Self {
        self.timestamp_ns = timestamp_ns;
        self
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}
