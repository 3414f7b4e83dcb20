/*!
    Codec identification.
*/

use serde::{Deserialize, Serialize};

/**
    Video codecs a hardware encoder can be configured for.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum VideoCodecType {
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// AV1
    Av1,
}

impl VideoCodecType {
    /**
        Returns the MIME type hardware codecs use to identify this codec.
    */
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Vp8 => "video/x-vnd.on2.vp8",
            Self::Vp9 => "video/x-vnd.on2.vp9",
            Self::H264 => "video/avc",
            Self::H265 => "video/hevc",
            Self::Av1 => "video/av01",
        }
    }

    /**
        Returns true if the bitstream carries parameter sets out of band.

        Hardware encoders for these codecs emit the parameter sets as a
        separate configuration buffer, which must be prepended to every key
        frame so that each key frame can be decoded on its own.
    */
    pub const fn prepends_config_to_key_frames(self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }

    /**
        Returns a short human readable name.
    */
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vp8 => "VP8",
            Self::Vp9 => "VP9",
            Self::H264 => "H264",
            Self::H265 => "H265",
            Self::Av1 => "AV1",
        }
    }
}

impl std::fmt::Display for VideoCodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
