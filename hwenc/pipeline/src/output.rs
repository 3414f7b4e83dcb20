/*!
    Output delivery loop.

    Runs on its own thread for the lifetime of a session. Drains the device,
    pairs each compressed frame with the oldest pending descriptor, feeds the
    frame size to the bitrate adjuster, and hands the result to the callback.
    Once the running flag clears, the loop stops and releases the device
    itself, so the device is never released while it is being drained.
*/

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use hwenc_types::{EncodedImage, Error, FrameType, Result, VideoCodecType};

use crate::bitrate::RateControl;
use crate::correlation::CorrelationQueue;
use crate::device::{HardwareCodec, OutputBuffer};
use crate::stats::StatsCounters;

/**
    Receives compressed frames.

    Called on the output thread, never on the thread that submitted the frame.
*/
pub trait EncoderCallback: Send + Sync {
    fn on_encoded_frame(&self, image: EncodedImage);
}

impl<F> EncoderCallback for F
where
    F: Fn(EncodedImage) + Send + Sync,
{
    fn on_encoded_frame(&self, image: EncodedImage) {
        self(image)
    }
}

/**
    State owned by the output thread of one session.
*/
pub(crate) struct OutputLoop {
    pub(crate) codec: Arc<dyn HardwareCodec>,
    pub(crate) codec_type: VideoCodecType,
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) queue: Arc<Mutex<CorrelationQueue>>,
    pub(crate) rate: Arc<Mutex<RateControl>>,
    pub(crate) callback: Arc<dyn EncoderCallback>,
    pub(crate) stats: Arc<StatsCounters>,
    pub(crate) poll_timeout: Duration,
    pub(crate) config_buffer: Option<Bytes>,
}

impl OutputLoop {
    /**
        Deliver output until the running flag clears, then release the device.

        A panicking callback ends delivery but the device is still released.
        Returns the outcome of the device release.
    */
    pub(crate) fn run(mut self) -> Result<()> {
        let delivery = panic::catch_unwind(AssertUnwindSafe(|| {
            while self.running.load(Ordering::Acquire) {
                self.deliver_encoded_image();
            }
        }));
        if delivery.is_err() {
            error!("output delivery panicked, stopping");
            self.running.store(false, Ordering::Release);
        }
        self.release_codec()
    }

    fn deliver_encoded_image(&mut self) {
        let output = match self.codec.dequeue_output_buffer(self.poll_timeout) {
            Ok(Some(output)) => output,
            Ok(None) => return,
            Err(e) => {
                error!("dequeue output buffer failed: {e}");
                return;
            }
        };

        let index = output.index;
        if output.flags.codec_config {
            debug!("config frame generated, size {}", output.data.len());
            self.config_buffer = Some(output.data);
        } else {
            self.deliver_frame(output);
        }

        if let Err(e) = self.codec.release_output_buffer(index) {
            error!("release output buffer failed: {e}");
        }
    }

    fn deliver_frame(&mut self, output: OutputBuffer) {
        {
            let mut rate = self.rate.lock();
            if rate.report_encoded_frame(output.data.len()) {
                match rate.update_bitrate(self.codec.as_ref()) {
                    Ok(bps) => {
                        debug!("adjusted bitrate to {bps} bps");
                        self.stats.record_bitrate_update();
                    }
                    Err(e) => error!("update bitrate failed: {e}"),
                }
            }
        }

        let key_frame = output.flags.key_frame;
        let frame_type = if key_frame {
            debug!("sync frame generated");
            FrameType::Key
        } else {
            FrameType::Delta
        };

        let payload = if key_frame && self.codec_type.prepends_config_to_key_frames() {
            self.prepend_config(output.data)
        } else {
            output.data
        };

        let Some(pending) = self.queue.lock().pop_front() else {
            warn!("dropping output with no pending frame");
            return;
        };

        let image = pending.into_encoded_image(payload, frame_type);
        self.stats.record_delivered(image.len(), key_frame);
        self.callback.on_encoded_frame(image);
    }

    fn prepend_config(&self, frame: Bytes) -> Bytes {
        let Some(config) = &self.config_buffer else {
            warn!("key frame without preceding config frame");
            return frame;
        };
        debug!(
            "prepending config frame of size {} to key frame of size {}",
            config.len(),
            frame.len()
        );
        let mut buffer = BytesMut::with_capacity(config.len() + frame.len());
        buffer.extend_from_slice(config);
        buffer.extend_from_slice(&frame);
        buffer.freeze()
    }

    fn release_codec(&self) -> Result<()> {
        debug!("releasing codec on output thread");
        if let Err(e) = self.codec.stop() {
            error!("codec stop failed: {e}");
        }
        let result = self.codec.release().map_err(|e| {
            error!("codec release failed: {e}");
            Error::shutdown(e.to_string())
        });
        debug!("release on output thread done");
        result
    }
}
