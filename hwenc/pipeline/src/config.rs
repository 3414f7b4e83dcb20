/*!
    Encoder configuration types.
*/

use std::time::Duration;

use serde::{Deserialize, Serialize};

use hwenc_types::VideoCodecType;

use crate::bitrate::BitrateAdjusterKind;
use crate::color::COLOR_FORMAT_YUV420_SEMI_PLANAR;

/**
    Construction-time configuration of a hardware encoder.

    Fixed for the lifetime of the encoder, across every session it runs.
*/
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Device codec name, passed to the codec factory.
    pub codec_name: String,
    /// Codec the device encodes.
    pub codec_type: VideoCodecType,
    /// Device color format code for buffer input.
    pub color_format: i32,
    /// Interval between device generated key frames, in seconds.
    pub key_frame_interval_sec: u32,
    /// Interval after which a key frame is requested, in milliseconds (0 = never).
    pub forced_key_frame_interval_ms: i64,
    /// Frames allowed in flight before new frames are dropped.
    pub max_pending_outputs: usize,
    /// How long each output poll waits for the device, in milliseconds.
    pub output_poll_timeout_ms: u64,
    /// How long release waits for the output thread, in milliseconds.
    pub release_timeout_ms: u64,
    /// Framerate requested rates are clamped to.
    pub max_framerate: u32,
    /// Bitrate policy.
    pub bitrate_adjuster: BitrateAdjusterKind,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            codec_name: String::from("hw.encoder.avc"),
            codec_type: VideoCodecType::H264,
            color_format: COLOR_FORMAT_YUV420_SEMI_PLANAR,
            key_frame_interval_sec: 100,
            forced_key_frame_interval_ms: 0,
            max_pending_outputs: 3,
            output_poll_timeout_ms: 100,
            release_timeout_ms: 5000,
            max_framerate: 30,
            bitrate_adjuster: BitrateAdjusterKind::Base,
        }
    }
}

impl EncoderConfig {
    /**
        Create a config for the given device codec.
    */
    pub fn new(codec_name: impl Into<String>, codec_type: VideoCodecType) -> Self {
        Self {
            codec_name: codec_name.into(),
            codec_type,
            ..Self::default()
        }
    }

    pub fn with_color_format(mut self, color_format: i32) -> Self {
        self.color_format = color_format;
        self
    }

    pub fn with_key_frame_interval_sec(mut self, seconds: u32) -> Self {
        self.key_frame_interval_sec = seconds;
        self
    }

    pub fn with_forced_key_frame_interval_ms(mut self, millis: i64) -> Self {
        self.forced_key_frame_interval_ms = millis;
        self
    }

    pub fn with_max_pending_outputs(mut self, max: usize) -> Self {
        self.max_pending_outputs = max;
        self
    }

    pub fn with_output_poll_timeout(mut self, timeout: Duration) -> Self {
        self.output_poll_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_release_timeout(mut self, timeout: Duration) -> Self {
        self.release_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_bitrate_adjuster(mut self, kind: BitrateAdjusterKind) -> Self {
        self.bitrate_adjuster = kind;
        self
    }

    pub fn output_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.output_poll_timeout_ms)
    }

    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }
}

/**
    Per-session settings passed to [`initialize`](crate::HardwareVideoEncoder::initialize).
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub width: u32,
    pub height: u32,
    /// Starting bitrate in kbps. Zero keeps the current target.
    pub start_bitrate_kbps: u32,
    /// Starting framerate. Zero keeps the current target.
    pub max_framerate: u32,
}

impl EncoderSettings {
    pub fn new(width: u32, height: u32, start_bitrate_kbps: u32, max_framerate: u32) -> Self {
        Self {
            width,
            height,
            start_bitrate_kbps,
            max_framerate,
        }
    }
}
