/*!
    Conversion from caller pixel buffers to the layout the device expects.
*/

use hwenc_types::{Error, I420Buffer, PixelFormat, Result};

/// Device color format code for planar YUV 4:2:0.
pub const COLOR_FORMAT_YUV420_PLANAR: i32 = 19;
/// Device color format code for semi-planar YUV 4:2:0.
pub const COLOR_FORMAT_YUV420_SEMI_PLANAR: i32 = 21;
/// Vendor semi-planar code used by some Qualcomm encoders.
pub const COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR: i32 = 0x7FA3_0C00;
/// Vendor tiled semi-planar code used by some Qualcomm encoders.
pub const COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR_32M: i32 = 0x7FA3_0C04;

/**
    Layout a device accepts for buffer input.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// Y plane, then U plane, then V plane.
    I420,
    /// Y plane, then interleaved UV plane.
    Nv12,
}

impl ColorFormat {
    /**
        Decode a device color format code.

        Returns an error for codes that have no buffer input layout.
    */
    pub fn from_codec_color_format(code: i32) -> Result<Self> {
        match code {
            COLOR_FORMAT_YUV420_PLANAR => Ok(Self::I420),
            COLOR_FORMAT_YUV420_SEMI_PLANAR
            | COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR
            | COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR_32M => Ok(Self::Nv12),
            other => Err(Error::unsupported_format(format!(
                "unsupported color format code {other:#x}"
            ))),
        }
    }

    /**
        Returns the pixel format this layout corresponds to.
    */
    pub const fn pixel_format(self) -> PixelFormat {
        match self {
            Self::I420 => PixelFormat::I420,
            Self::Nv12 => PixelFormat::Nv12,
        }
    }

    /**
        Write `src` into `dst` as a tightly packed frame in this layout.

        `dst` is cleared first, so a scratch buffer can be reused between
        frames without reallocating.
    */
    pub fn fill_buffer(self, src: &I420Buffer, dst: &mut Vec<u8>) {
        dst.clear();
        dst.reserve(self.pixel_format().frame_size(src.width(), src.height()));

        for row in src.rows_y() {
            dst.extend_from_slice(row);
        }

        match self {
            Self::I420 => {
                for row in src.rows_u() {
                    dst.extend_from_slice(row);
                }
                for row in src.rows_v() {
                    dst.extend_from_slice(row);
                }
            }
            Self::Nv12 => {
                for (u, v) in src.rows_u().zip(src.rows_v()) {
                    dst.extend(u.iter().zip(v).flat_map(|(&u, &v)| [u, v]));
                }
            }
        }
    }
}
