/*!
    Raw frame types submitted for encoding.
*/

use std::fmt;
use std::sync::Arc;

use crate::format::chroma_extent;
use crate::{Error, Result, Timestamp};

/**
    Column-major 4x4 texture coordinate transform.
*/
pub type TransformMatrix = [f32; 16];

const IDENTITY: TransformMatrix = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0, //
];

/**
    Clockwise rotation to apply when displaying a frame.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /**
        Returns the rotation in degrees.
    */
    pub const fn degrees(self) -> u32 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    /**
        Create a rotation from degrees, if it is a multiple of 90 in `0..360`.
    */
    pub const fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }
}

/**
    A planar YUV 4:2:0 frame in CPU memory.

    Each plane may carry row padding, described by its stride. Chroma planes
    are half the luma size in each dimension, rounded up.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct I420Buffer {
    width: u32,
    height: u32,
    data_y: Vec<u8>,
    stride_y: usize,
    data_u: Vec<u8>,
    stride_u: usize,
    data_v: Vec<u8>,
    stride_v: usize,
}

impl I420Buffer {
    /**
        Create a buffer from tightly packed planes.
    */
    pub fn new(width: u32, height: u32, data_y: Vec<u8>, data_u: Vec<u8>, data_v: Vec<u8>) -> Result<Self> {
        let stride_y = width as usize;
        let stride_uv = chroma_extent(width);
        Self::with_strides(
            width,
            height,
            (data_y, stride_y),
            (data_u, stride_uv),
            (data_v, stride_uv),
        )
    }

    /**
        Create a buffer from planes with explicit strides.

        Returns an error if a stride is narrower than its plane or a plane
        holds fewer bytes than its rows require.
    */
    pub fn with_strides(
        width: u32,
        height: u32,
        (data_y, stride_y): (Vec<u8>, usize),
        (data_u, stride_u): (Vec<u8>, usize),
        (data_v, stride_v): (Vec<u8>, usize),
    ) -> Result<Self> {
        let (cw, ch) = (chroma_extent(width), chroma_extent(height));
        check_plane("Y", &data_y, stride_y, width as usize, height as usize)?;
        check_plane("U", &data_u, stride_u, cw, ch)?;
        check_plane("V", &data_v, stride_v, cw, ch)?;
        Ok(Self {
            width,
            height,
            data_y,
            stride_y,
            data_u,
            stride_u,
            data_v,
            stride_v,
        })
    }

    /**
        Create a black frame of the given size.
    */
    pub fn black(width: u32, height: u32) -> Self {
        let (cw, ch) = (chroma_extent(width), chroma_extent(height));
        Self {
            width,
            height,
            data_y: vec![16; width as usize * height as usize],
            stride_y: width as usize,
            data_u: vec![128; cw * ch],
            stride_u: cw,
            data_v: vec![128; cw * ch],
            stride_v: cw,
        }
    }

    /**
        Returns the frame width in pixels.
    */
    pub fn width(&self) -> u32 {
        self.width
    }

    /**
        Returns the frame height in pixels.
    */
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data_y(&self) -> &[u8] {
        &self.data_y
    }

    pub fn data_u(&self) -> &[u8] {
        &self.data_u
    }

    pub fn data_v(&self) -> &[u8] {
        &self.data_v
    }

    pub fn stride_y(&self) -> usize {
        self.stride_y
    }

    pub fn stride_u(&self) -> usize {
        self.stride_u
    }

    pub fn stride_v(&self) -> usize {
        self.stride_v
    }

    /**
        Returns the width of the chroma planes.
    */
    pub fn chroma_width(&self) -> usize {
        chroma_extent(self.width)
    }

    /**
        Returns the height of the chroma planes.
    */
    pub fn chroma_height(&self) -> usize {
        chroma_extent(self.height)
    }

    /**
        Iterate the visible rows of the luma plane, without padding.
    */
    pub fn rows_y(&self) -> impl Iterator<Item = &[u8]> {
        plane_rows(&self.data_y, self.stride_y, self.width as usize, self.height as usize)
    }

    /**
        Iterate the visible rows of the Cb plane, without padding.
    */
    pub fn rows_u(&self) -> impl Iterator<Item = &[u8]> {
        plane_rows(&self.data_u, self.stride_u, self.chroma_width(), self.chroma_height())
    }

    /**
        Iterate the visible rows of the Cr plane, without padding.
    */
    pub fn rows_v(&self) -> impl Iterator<Item = &[u8]> {
        plane_rows(&self.data_v, self.stride_v, self.chroma_width(), self.chroma_height())
    }
}

fn check_plane(name: &str, data: &[u8], stride: usize, width: usize, rows: usize) -> Result<()> {
    if stride < width {
        return Err(Error::unsupported_input(format!(
            "{name} stride {stride} is narrower than plane width {width}"
        )));
    }
    let needed = if rows == 0 { 0 } else { stride * (rows - 1) + width };
    if data.len() < needed {
        return Err(Error::unsupported_input(format!(
            "{name} plane holds {} bytes, {needed} required",
            data.len()
        )));
    }
    Ok(())
}

fn plane_rows(data: &[u8], stride: usize, width: usize, rows: usize) -> impl Iterator<Item = &[u8]> {
    (0..rows).map(move |row| &data[row * stride..row * stride + width])
}

/**
    Kind of GPU texture, which decides the sampling path used to draw it.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureType {
    /// External (opaque) texture, sampled through the external image extension.
    Oes,
    /// Plain RGB texture.
    Rgb,
}

/**
    Reads a texture back into CPU memory.

    Needed only when a texture frame is submitted to an encoder running in
    buffer mode.
*/
pub trait TextureReadback: Send + Sync {
    /// Convert the texture's contents to an I420 buffer.
    fn to_i420(&self, texture: &TextureBuffer) -> Result<I420Buffer>;
}

/**
    A frame living in a GPU texture.
*/
#[derive(Clone)]
pub struct TextureBuffer {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Texture name in the shared GPU context.
    pub texture_id: u32,
    /// Sampling path for the texture.
    pub texture_type: TextureType,
    /// Texture coordinate transform applied while drawing.
    pub transform: TransformMatrix,
    readback: Option<Arc<dyn TextureReadback>>,
}

impl TextureBuffer {
    /**
        Create a texture buffer with an identity transform.
    */
    pub fn new(width: u32, height: u32, texture_id: u32, texture_type: TextureType) -> Self {
        Self {
            width,
            height,
            texture_id,
            texture_type,
            transform: IDENTITY,
            readback: None,
        }
    }

    /**
        Attach a readback used to convert the texture to CPU memory.
    */
    pub fn with_readback(mut self, readback: Arc<dyn TextureReadback>) -> Self {
        self.readback = Some(readback);
        self
    }

    /**
        Read the texture back into an I420 buffer.
    */
    pub fn to_i420(&self) -> Result<I420Buffer> {
        match &self.readback {
            Some(readback) => readback.to_i420(self),
            None => Err(Error::unsupported_input(
                "texture buffer has no readback to convert it to I420",
            )),
        }
    }
}

impl fmt::Debug for TextureBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("texture_id", &self.texture_id)
            .field("texture_type", &self.texture_type)
            .field("has_readback", &self.readback.is_some())
            .finish()
    }
}

/**
    Pixel storage of a frame.
*/
#[derive(Clone, Debug)]
pub enum FrameBuffer {
    /// Planar YUV in CPU memory.
    I420(I420Buffer),
    /// GPU texture.
    Texture(TextureBuffer),
}

impl FrameBuffer {
    /**
        Returns the frame width in pixels.
    */
    pub fn width(&self) -> u32 {
        match self {
            Self::I420(b) => b.width(),
            Self::Texture(t) => t.width,
        }
    }

    /**
        Returns the frame height in pixels.
    */
    pub fn height(&self) -> u32 {
        match self {
            Self::I420(b) => b.height(),
            Self::Texture(t) => t.height,
        }
    }

    /**
        Returns true if the frame lives in a GPU texture.
    */
    pub fn is_texture(&self) -> bool {
        matches!(self, Self::Texture(_))
    }
}

/**
    A raw frame submitted for encoding.
*/
#[derive(Clone, Debug)]
pub struct VideoFrame {
    /// Pixel storage.
    pub buffer: FrameBuffer,
    /// Rotation to apply when displaying the frame.
    pub rotation: Rotation,
    /// Capture timestamp.
    pub timestamp: Timestamp,
}

impl VideoFrame {
    /**
        Create a new video frame.
    */
    pub fn new(buffer: FrameBuffer, rotation: Rotation, timestamp: Timestamp) -> Self {
        Self {
            buffer,
            rotation,
            timestamp,
        }
    }

    /**
        Returns the frame width in pixels.
    */
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    /**
        Returns the frame height in pixels.
    */
    pub fn height(&self) -> u32 {
        self.buffer.height()
    }
}

// Frames are handed between caller contexts
static_assertions::assert_impl_all!(VideoFrame: Send, Sync);
static_assertions::assert_impl_all!(TextureBuffer: Send, Sync);
