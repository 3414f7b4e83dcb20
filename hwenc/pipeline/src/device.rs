/*!
    Capability interface of a hardware codec device.

    Concrete hardware APIs bind to these traits. The pipeline only ever
    configures the device, feeds it input, drains its output, and stops and
    releases it.
*/

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use hwenc_types::{Result, VideoCodecType};

/// Color format code a device uses for surface (texture) input.
pub const COLOR_FORMAT_SURFACE: i32 = 0x7F00_0789;

/**
    Rate control mode requested from the device.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BitrateMode {
    /// Constant bitrate.
    Cbr,
}

/**
    Format the device is configured with at the start of a session.
*/
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaFormat {
    pub codec_type: VideoCodecType,
    pub width: u32,
    pub height: u32,
    pub bitrate_bps: u32,
    pub bitrate_mode: BitrateMode,
    /// Device color format code, [`COLOR_FORMAT_SURFACE`] for texture input.
    pub color_format: i32,
    pub frame_rate: u32,
    pub key_frame_interval_sec: u32,
}

impl MediaFormat {
    /**
        Returns the mime type of the configured codec.
    */
    pub fn mime_type(&self) -> &'static str {
        self.codec_type.mime_type()
    }
}

/**
    Flags attached to a device output buffer.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BufferFlags {
    /// The buffer holds codec configuration data, not a frame.
    pub codec_config: bool,
    /// The buffer holds a key frame.
    pub key_frame: bool,
}

/**
    A completed output buffer dequeued from the device.
*/
#[derive(Clone, Debug)]
pub struct OutputBuffer {
    /// Device slot, handed back through [`HardwareCodec::release_output_buffer`].
    pub index: usize,
    pub data: Bytes,
    pub flags: BufferFlags,
    pub presentation_time_us: i64,
}

/**
    Surface the device reads texture input from.
*/
pub trait InputSurface: Send + Sync {
    /**
        Called when a frame has been presented to the surface.
    */
    fn on_frame_presented(&self, _timestamp_ns: i64) {}

    /**
        Release the surface.
    */
    fn release(&self);
}

/**
    A hardware encoder device.

    Methods take `&self`: devices are internally synchronized, the input side
    is driven by the submitting thread and the output side by the output
    delivery thread.
*/
pub trait HardwareCodec: Send + Sync {
    /**
        Configure the device for encoding.
    */
    fn configure(&self, format: &MediaFormat) -> Result<()>;

    /**
        Create the surface texture input is drawn onto.

        Must be called after [`configure`](Self::configure) and before
        [`start`](Self::start).
    */
    fn create_input_surface(&self) -> Result<Arc<dyn InputSurface>>;

    /**
        Start the device.
    */
    fn start(&self) -> Result<()>;

    /**
        Take a free input slot, waiting at most `timeout`.

        Returns `Ok(None)` if no slot became free in time.
    */
    fn dequeue_input_buffer(&self, timeout: Duration) -> Result<Option<usize>>;

    /**
        Hand a filled input slot to the device.
    */
    fn queue_input_buffer(&self, index: usize, data: &[u8], presentation_time_us: i64)
    -> Result<()>;

    /**
        Take a completed output buffer, waiting at most `timeout`.

        Returns `Ok(None)` if nothing completed in time.
    */
    fn dequeue_output_buffer(&self, timeout: Duration) -> Result<Option<OutputBuffer>>;

    /**
        Return an output buffer to the device.
    */
    fn release_output_buffer(&self, index: usize) -> Result<()>;

    /**
        Ask for the next frame to be a key frame.
    */
    fn request_key_frame(&self) -> Result<()>;

    /**
        Change the target bitrate without restarting the stream.
    */
    fn set_bitrate(&self, bitrate_bps: u32) -> Result<()>;

    /**
        Stop encoding.
    */
    fn stop(&self) -> Result<()>;

    /**
        Release the device. No other method may be called afterwards.
    */
    fn release(&self) -> Result<()>;
}

/**
    Creates hardware codec devices by name.
*/
pub trait CodecFactory: Send + Sync {
    fn create_by_codec_name(&self, name: &str) -> Result<Arc<dyn HardwareCodec>>;
}

static_assertions::assert_obj_safe!(HardwareCodec, CodecFactory, InputSurface);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_format_mime_type() {
        let format = MediaFormat {
            codec_type: VideoCodecType::H264,
            width: 640,
            height: 480,
            bitrate_bps: 300_000,
            bitrate_mode: BitrateMode::Cbr,
            color_format: COLOR_FORMAT_SURFACE,
            frame_rate: 30,
            key_frame_interval_sec: 100,
        };
        assert_eq!(format.mime_type(), "video/avc");
    }

    #[test]
    fn buffer_flags_default_to_delta_frame() {
        let flags = BufferFlags::default();
        assert!(!flags.codec_config);
        assert!(!flags.key_frame);
    }
}
