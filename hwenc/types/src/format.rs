/*!
    Pixel format types.
*/

/**
    Raw 4:2:0 layouts hardware encoders accept as buffer input.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Planar YUV 4:2:0 (Y plane, then U, then V)
    I420,
    /// Semi-planar YUV 4:2:0 (Y plane, then interleaved UV)
    Nv12,
}

impl PixelFormat {
    /**
        Returns the number of bytes a tightly packed frame of the given size occupies.

        Chroma planes round odd dimensions up.
    */
    pub const fn frame_size(self, width: u32, height: u32) -> usize {
        let luma = width as usize * height as usize;
        let chroma = chroma_extent(width) * chroma_extent(height);
        match self {
            Self::I420 | Self::Nv12 => luma + 2 * chroma,
        }
    }
}

/**
    Returns the chroma plane extent for a luma extent in a 4:2:0 layout.
*/
pub(crate) const fn chroma_extent(luma: u32) -> usize {
    (luma as usize).div_ceil(2)
}
