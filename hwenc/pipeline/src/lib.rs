/*!
    Hardware video encoder pipeline.

    This crate feeds raw frames into a hardware codec device and turns the
    device's asynchronous output back into [`EncodedImage`]s, each paired
    with the metadata of the frame it came from.

    # Example

    ```ignore
    use std::sync::Arc;

    use hwenc_pipeline::{EncoderConfig, EncoderSettings, HardwareVideoEncoder};
    use hwenc_pipeline::sim::SimulatedCodecFactory;
    use hwenc_types::{EncodedImage, VideoCodecType};

    let factory = Arc::new(SimulatedCodecFactory::new());
    let config = EncoderConfig::new("sim.avc", VideoCodecType::H264);
    let mut encoder = HardwareVideoEncoder::new(factory, config, None)?;

    encoder.initialize(
        EncoderSettings::new(640, 480, 300, 30),
        |image: EncodedImage| println!("{} bytes", image.len()),
    )?;
    encoder.encode(&frame, &[FrameType::Key])?;
    encoder.release()?;
    ```

    # Input Modes

    An encoder constructed without a GPU context runs in buffer mode: I420
    frames are converted to the device's color format and copied into
    device input buffers. With a [`GpuContext`], it runs in texture mode:
    texture frames are drawn straight onto the device's input surface.

    # Threads

    Every session runs one output thread, which drains the device and
    invokes the callback. [`HardwareVideoEncoder::release`] stops that
    thread, which then releases the device itself.
*/

pub use hwenc_types::{CodecStatus, EncodedImage, Error, FrameType, Result, VideoFrame};

mod bitrate;
mod color;
mod config;
mod correlation;
mod device;
mod encoder;
mod gpu;
mod output;
mod shutdown;
mod stats;

pub mod sim;

pub use bitrate::{
    BaseBitrateAdjuster, BitrateAdjuster, BitrateAdjusterKind, DynamicBitrateAdjuster,
    FIXED_FRAMERATE, FramerateBitrateAdjuster,
};
pub use color::{
    COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR, COLOR_FORMAT_QCOM_YUV420_SEMI_PLANAR_32M,
    COLOR_FORMAT_YUV420_PLANAR, COLOR_FORMAT_YUV420_SEMI_PLANAR, ColorFormat,
};
pub use config::{EncoderConfig, EncoderSettings};
pub use correlation::{CorrelationQueue, PendingOutput};
pub use device::{
    BitrateMode, BufferFlags, COLOR_FORMAT_SURFACE, CodecFactory, HardwareCodec, InputSurface,
    MediaFormat, OutputBuffer,
};
pub use encoder::{DropReason, EncodeOutcome, HardwareVideoEncoder, SessionState};
pub use gpu::{GpuContext, RenderContext, TextureDrawer, TextureInput, Viewport};
pub use output::EncoderCallback;
pub use stats::EncoderStats;
