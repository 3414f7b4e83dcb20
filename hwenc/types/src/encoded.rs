/*!
    Encoded output delivered to callers.
*/

use bytes::Bytes;

use crate::Rotation;

/**
    Kind of an encoded frame.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Independently decodable frame.
    Key,
    /// Frame that depends on earlier frames.
    Delta,
}

/**
    A compressed frame, tagged with the metadata of the raw frame it came from.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    /// Compressed bitstream. For H.264/H.265 key frames the codec
    /// configuration headers are prepended.
    pub buffer: Bytes,
    /// Width of the raw frame that was encoded.
    pub encoded_width: u32,
    /// Height of the raw frame that was encoded.
    pub encoded_height: u32,
    /// Capture time of the raw frame, in milliseconds.
    pub capture_time_ms: i64,
    /// Key or delta frame.
    pub frame_type: FrameType,
    /// Rotation of the raw frame.
    pub rotation: Rotation,
    /// Whether the image holds a complete frame.
    pub complete_frame: bool,
}

impl EncodedImage {
    /**
        Returns true if this is a key frame.
    */
    pub fn is_key_frame(&self) -> bool {
        self.frame_type == FrameType::Key
    }

    /**
        Returns the size of the compressed bitstream in bytes.
    */
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /**
        Returns true if the compressed bitstream is empty.
    */
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

static_assertions::assert_impl_all!(EncodedImage: Send, Sync);
