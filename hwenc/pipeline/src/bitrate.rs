/*!
    Bitrate adjustment policies.

    Hardware encoders are often poor at hitting the bitrate they are asked
    for. An adjuster sits between the requested targets and the value pushed
    to the device, and may correct the requested bitrate based on the size of
    the frames the device actually produces.
*/

use serde::{Deserialize, Serialize};

use hwenc_types::Result;

use crate::device::HardwareCodec;

/// Framerate the [`FramerateBitrateAdjuster`] always encodes at.
pub const FIXED_FRAMERATE: u32 = 30;

const BITS_PER_BYTE: f64 = 8.0;

// Dynamic adjustment window, in seconds of media time
const ADJUSTMENT_SEC: f64 = 3.0;
// Largest correction factor in either direction
const ADJUSTMENT_MAX_SCALE: f64 = 4.0;
// Steps between no correction and the largest correction
const ADJUSTMENT_STEPS: i32 = 20;

/**
    Maps requested targets and observed output sizes to the bitrate and
    framerate the hardware device is configured with.
*/
pub trait BitrateAdjuster: Send {
    /**
        Set the requested bitrate and framerate.

        Resets any accounting window the adjuster keeps.
    */
    fn set_targets(&mut self, bitrate_bps: u32, framerate_fps: u32);

    /**
        Report the size of one frame produced by the device.
    */
    fn report_encoded_frame(&mut self, size: usize);

    /**
        Returns the bitrate to configure the device with.
    */
    fn adjusted_bitrate_bps(&self) -> u32;

    /**
        Returns the framerate to configure the device with.
    */
    fn adjusted_framerate_fps(&self) -> u32;
}

/**
    Bitrate policy, selectable from configuration.
*/
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitrateAdjusterKind {
    /// Pass targets through unchanged.
    #[default]
    Base,
    /// Encode at a fixed framerate and scale the bitrate to match.
    Framerate,
    /// Correct the bitrate based on observed output sizes.
    Dynamic,
}

impl BitrateAdjusterKind {
    /**
        Create a fresh adjuster of this kind.
    */
    pub fn build(self) -> Box<dyn BitrateAdjuster> {
        match self {
            Self::Base => Box::new(BaseBitrateAdjuster::default()),
            Self::Framerate => Box::new(FramerateBitrateAdjuster::default()),
            Self::Dynamic => Box::new(DynamicBitrateAdjuster::default()),
        }
    }
}

/**
    Passes the requested targets through unchanged.
*/
#[derive(Clone, Debug, Default)]
pub struct BaseBitrateAdjuster {
    target_bitrate_bps: u32,
    target_framerate_fps: u32,
}

impl BitrateAdjuster for BaseBitrateAdjuster {
    fn set_targets(&mut self, bitrate_bps: u32, framerate_fps: u32) {
        self.target_bitrate_bps = bitrate_bps;
        self.target_framerate_fps = framerate_fps;
    }

    fn report_encoded_frame(&mut self, _size: usize) {}

    fn adjusted_bitrate_bps(&self) -> u32 {
        self.target_bitrate_bps
    }

    fn adjusted_framerate_fps(&self) -> u32 {
        self.target_framerate_fps
    }
}

/**
    Configures the device at a fixed framerate and scales the bitrate so the
    per-frame budget matches the requested targets.

    Useful for devices that ignore the configured framerate and size frames
    as if they arrive at a fixed rate.
*/
#[derive(Clone, Debug, Default)]
pub struct FramerateBitrateAdjuster {
    target_bitrate_bps: u32,
}

impl BitrateAdjuster for FramerateBitrateAdjuster {
    fn set_targets(&mut self, bitrate_bps: u32, framerate_fps: u32) {
        let fps = if framerate_fps == 0 {
            FIXED_FRAMERATE
        } else {
            framerate_fps
        };
        let scaled = u64::from(bitrate_bps) * u64::from(FIXED_FRAMERATE) / u64::from(fps);
        self.target_bitrate_bps = u32::try_from(scaled).unwrap_or(u32::MAX);
    }

    fn report_encoded_frame(&mut self, _size: usize) {}

    fn adjusted_bitrate_bps(&self) -> u32 {
        self.target_bitrate_bps
    }

    fn adjusted_framerate_fps(&self) -> u32 {
        FIXED_FRAMERATE
    }
}

/**
    Corrects the requested bitrate based on observed output sizes.

    The adjuster accumulates the difference between each frame's size and the
    per-frame byte budget, capped at three seconds worth of target bytes.
    Once more than three seconds of media time have passed and the deviation
    exceeds one second worth of target bytes, a scale exponent moves against
    the deviation, the window resets, and the adjusted bitrate becomes
    `target * 4^(exp / 20)` with `exp` in `[-20, 20]`.

    Frames that exactly match the budget never move the exponent.
*/
#[derive(Clone, Debug, Default)]
pub struct DynamicBitrateAdjuster {
    target_bitrate_bps: u32,
    target_framerate_fps: u32,
    deviation_bytes: f64,
    time_since_adjustment_ms: f64,
    scale_exp: i32,
}

impl DynamicBitrateAdjuster {
    /**
        Returns the current scale exponent, in `[-20, 20]`.
    */
    pub fn scale_exp(&self) -> i32 {
        self.scale_exp
    }
}

impl BitrateAdjuster for DynamicBitrateAdjuster {
    fn set_targets(&mut self, bitrate_bps: u32, framerate_fps: u32) {
        self.target_bitrate_bps = bitrate_bps;
        self.target_framerate_fps = framerate_fps;
        self.deviation_bytes = 0.0;
        self.time_since_adjustment_ms = 0.0;
    }

    fn report_encoded_frame(&mut self, size: usize) {
        if self.target_framerate_fps == 0 || self.target_bitrate_bps == 0 {
            return;
        }

        let fps = f64::from(self.target_framerate_fps);
        let threshold = f64::from(self.target_bitrate_bps) / BITS_PER_BYTE;
        let expected = threshold / fps;

        self.deviation_bytes += size as f64 - expected;
        self.time_since_adjustment_ms += 1000.0 / fps;

        let cap = ADJUSTMENT_SEC * threshold;
        self.deviation_bytes = self.deviation_bytes.clamp(-cap, cap);

        if self.deviation_bytes.abs() <= threshold {
            return;
        }
        if self.time_since_adjustment_ms <= 1000.0 * ADJUSTMENT_SEC {
            return;
        }

        // Overshooting lowers the exponent, undershooting raises it
        let steps = (self.deviation_bytes.abs() / threshold).round() as i32;
        if self.deviation_bytes > 0.0 {
            self.scale_exp = (self.scale_exp - steps).max(-ADJUSTMENT_STEPS);
        } else {
            self.scale_exp = (self.scale_exp + steps).min(ADJUSTMENT_STEPS);
        }

        self.deviation_bytes = 0.0;
        self.time_since_adjustment_ms = 0.0;
    }

    fn adjusted_bitrate_bps(&self) -> u32 {
        let scale = ADJUSTMENT_MAX_SCALE
            .powf(f64::from(self.scale_exp) / f64::from(ADJUSTMENT_STEPS));
        (f64::from(self.target_bitrate_bps) * scale).round() as u32
    }

    fn adjusted_framerate_fps(&self) -> u32 {
        self.target_framerate_fps
    }
}

/**
    An adjuster plus the bitrate last pushed to the device.

    Shared between the submitting thread and the output thread.
*/
pub(crate) struct RateControl {
    adjuster: Box<dyn BitrateAdjuster>,
    adjusted_bitrate_bps: u32,
}

impl RateControl {
    pub(crate) fn new(adjuster: Box<dyn BitrateAdjuster>) -> Self {
        let adjusted_bitrate_bps = adjuster.adjusted_bitrate_bps();
        Self {
            adjuster,
            adjusted_bitrate_bps,
        }
    }

    pub(crate) fn set_targets(&mut self, bitrate_bps: u32, framerate_fps: u32) {
        self.adjuster.set_targets(bitrate_bps, framerate_fps);
    }

    /**
        Take the adjuster's current bitrate as the device bitrate, without
        telling the device. Used when configuring a new session.
    */
    pub(crate) fn refresh(&mut self) -> u32 {
        self.adjusted_bitrate_bps = self.adjuster.adjusted_bitrate_bps();
        self.adjusted_bitrate_bps
    }

    pub(crate) fn adjusted_framerate_fps(&self) -> u32 {
        self.adjuster.adjusted_framerate_fps()
    }

    /**
        Report an output size. Returns true if the device bitrate is stale.
    */
    pub(crate) fn report_encoded_frame(&mut self, size: usize) -> bool {
        self.adjuster.report_encoded_frame(size);
        self.adjuster.adjusted_bitrate_bps() != self.adjusted_bitrate_bps
    }

    /**
        Push the adjuster's current bitrate to the device.

        The value counts as pushed even if the device rejects it, so a
        rejected value is not retried on every frame.
    */
    pub(crate) fn update_bitrate(&mut self, codec: &dyn HardwareCodec) -> Result<u32> {
        let bitrate_bps = self.refresh();
        codec.set_bitrate(bitrate_bps)?;
        Ok(bitrate_bps)
    }
}
