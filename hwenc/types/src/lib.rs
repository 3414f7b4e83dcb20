/*!
    Shared types for the hardware encoding pipeline.

    This crate defines the vocabulary that crosses crate boundaries: the frames
    callers submit, the compressed images the pipeline delivers, and the status
    codes every public operation reports. It has no dependency on any hardware
    API, so bindings and consumers can depend on it without pulling in the
    pipeline itself.

    # Frames

    - [`VideoFrame`] - A frame submitted for encoding
    - [`FrameBuffer`] - Either an [`I420Buffer`] in CPU memory or a [`TextureBuffer`] on the GPU
    - [`Rotation`] - Clockwise rotation to apply when displaying the frame

    # Encoded Output

    - [`EncodedImage`] - A compressed frame delivered by the pipeline
    - [`FrameType`] - Key or delta frame

    # Codecs and Formats

    - [`VideoCodecType`] - Codec identifiers
    - [`PixelFormat`] - Raw pixel layouts

    # Timing

    - [`Timestamp`] - Capture timestamps with the rounding rules the encoder uses

    # Error Handling

    - [`Error`] and [`Result`] - Common error types
    - [`CodecStatus`] - Status code reported to callers
*/

mod codec;
mod encoded;
mod error;
mod format;
mod frame;
mod status;
mod timestamp;

pub use codec::VideoCodecType;
pub use encoded::{EncodedImage, FrameType};
pub use error::{Error, Result};
pub use format::PixelFormat;
pub use frame::{
    FrameBuffer, I420Buffer, Rotation, TextureBuffer, TextureReadback, TextureType,
    TransformMatrix, VideoFrame,
};
pub use status::CodecStatus;
pub use timestamp::Timestamp;
