//! Video frame types and pixel format conversions.

use anyhow::{anyhow, Result};
use bytemuck::{Pod, Zeroable};
use image::{GrayImage, RgbImage};

/// Supported pixel formats for video frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single channel intensity, 8 bits per pixel
    Gray,
    /// RGB with 8 bits per channel (24 bits per pixel)
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel)
    Rgba,
}

impl PixelFormat {
    /// Returns the number of bytes per pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Gray => 1,
            PixelFormat::Rgb => 3,
            PixelFormat::Rgba => 4,
        }
    }
}

/// A video frame containing image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format of the frame data
    pub format: PixelFormat,
    /// Timestamp in microseconds (if available)
    pub timestamp_us: Option<u64>,
    /// Raw pixel data, rows packed without padding
    pub data: Vec<u8>,
}

impl VideoFrame {
    /// Creates a video frame from existing data.
    pub fn from_data(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            timestamp_us: None,
            data,
        }
    }

    /// Wraps an RGB image buffer.
    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_data(width, height, PixelFormat::Rgb, image.into_raw())
    }

    /// Wraps a single channel image buffer.
    pub fn from_gray_image(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_data(width, height, PixelFormat::Gray, image.into_raw())
    }

    /// Sets the capture timestamp.
    pub fn with_timestamp(mut self, timestamp_us: Option<u64>) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    /// Number of bytes the data buffer must hold for the declared size and format.
    pub fn expected_len(&self) -> usize {
        (self.width as usize) * (self.height as usize) * self.format.bytes_per_pixel()
    }

    /// Fails if the data buffer does not match the declared size and format.
    pub fn validate(&self) -> Result<()> {
        if self.data.len() != self.expected_len() {
            return Err(anyhow!(
                "{:?} frame {}x{} holds {} bytes, expected {}",
                self.format,
                self.width,
                self.height,
                self.data.len(),
                self.expected_len()
            ));
        }
        Ok(())
    }

    /// Copies this frame into an RGB image buffer, expanding gray and dropping alpha.
    pub fn to_rgb_image(&self) -> Result<RgbImage> {
        self.validate()?;
        let data = match self.format {
            PixelFormat::Rgb => self.data.clone(),
            PixelFormat::Gray => self.data.iter().flat_map(|&l| [l, l, l]).collect(),
            PixelFormat::Rgba => self
                .data
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        };
        RgbImage::from_raw(self.width, self.height, data)
            .ok_or_else(|| anyhow!("Failed to create RGB image from frame data"))
    }

    /// Converts this frame to a single channel luma image.
    pub fn to_gray_image(&self) -> Result<GrayImage> {
        if self.format == PixelFormat::Gray {
            self.validate()?;
            return GrayImage::from_raw(self.width, self.height, self.data.clone())
                .ok_or_else(|| anyhow!("Failed to create gray image from frame data"));
        }
        Ok(image::imageops::grayscale(&self.to_rgb_image()?))
    }

    /// Converts this frame to RGBA format.
    pub fn to_rgba(&self) -> Result<VideoFrame> {
        self.validate()?;
        let data: Vec<u8> = match self.format {
            PixelFormat::Rgba => return Ok(self.clone()),
            PixelFormat::Gray => self.data.iter().flat_map(|&l| [l, l, l, 255]).collect(),
            PixelFormat::Rgb => self
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[0], px[1], px[2], 255])
                .collect(),
        };

        Ok(VideoFrame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Rgba,
            timestamp_us: self.timestamp_us,
            data,
        })
    }
}

/// Vertex for rendering a full-screen quad.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct QuadVertex {
    pub position: [f32; 2],
    pub tex_coords: [f32; 2],
}

impl QuadVertex {
    /// Vertices for a full-screen quad.
    pub const VERTICES: &'static [QuadVertex] = &[
        QuadVertex { position: [-1.0, -1.0], tex_coords: [0.0, 1.0] },
        QuadVertex { position: [1.0, -1.0], tex_coords: [1.0, 1.0] },
        QuadVertex { position: [1.0, 1.0], tex_coords: [1.0, 0.0] },
        QuadVertex { position: [-1.0, 1.0], tex_coords: [0.0, 0.0] },
    ];

    /// Indices for the quad (two triangles).
    pub const INDICES: &'static [u16] = &[0, 1, 2, 2, 3, 0];

    /// Returns the vertex buffer layout.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x2,
                },
                wgpu::VertexAttribute {
                    offset: std::mem::size_of::<[f32; 2]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x2,
                },
            ],
        }
    }
}
