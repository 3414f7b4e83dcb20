/*!
    Hardware video encoder session state machine.
*/

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use hwenc_types::{
    Error, FrameBuffer, FrameType, I420Buffer, Result, TextureBuffer, VideoFrame,
};

use crate::bitrate::{BitrateAdjuster, RateControl};
use crate::color::ColorFormat;
use crate::config::{EncoderConfig, EncoderSettings};
use crate::correlation::{CorrelationQueue, PendingOutput};
use crate::device::{BitrateMode, COLOR_FORMAT_SURFACE, CodecFactory, HardwareCodec, MediaFormat};
use crate::gpu::{GpuContext, TextureInput};
use crate::output::{EncoderCallback, OutputLoop};
use crate::shutdown::OutputThread;
use crate::stats::{EncoderStats, StatsCounters};

/**
    Lifecycle state of an encoder.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No session, `initialize` has not succeeded yet.
    Uninitialized,
    /// A session is being set up.
    Configuring,
    /// A session is running and accepting frames.
    Running,
    /// The running session is being torn down.
    Releasing,
    /// The encoder was released by its owner.
    Released,
}

/**
    Why a submitted frame was dropped.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Too many frames are already in flight.
    QueueFull,
    /// The device had no free input buffer.
    NoInputBuffer,
}

/**
    Successful outcome of [`HardwareVideoEncoder::encode`].

    Both variants report status OK: dropping a frame is flow control, not
    an error.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EncodeOutcome {
    /// The frame was handed to the device.
    Queued,
    /// The frame was dropped.
    Dropped(DropReason),
}

/**
    How frames reach the device, fixed at construction.
*/
enum InputMode {
    Buffer(ColorFormat),
    Texture(Arc<dyn GpuContext>),
}

/**
    Input path of a running session.
*/
enum InputPath {
    Buffer {
        color_format: ColorFormat,
        scratch: Vec<u8>,
    },
    Texture(TextureInput),
}

impl InputPath {
    fn release(self) {
        if let Self::Texture(texture) = self {
            texture.release();
        }
    }
}

struct Session {
    codec: Arc<dyn HardwareCodec>,
    width: u32,
    height: u32,
    input: InputPath,
    output: OutputThread,
    last_key_frame_ms: Option<i64>,
}

impl Session {
    fn should_force_key_frame(&self, forced_interval_ms: i64, timestamp_ms: i64) -> bool {
        forced_interval_ms > 0
            && timestamp_ms > self.last_key_frame_ms.unwrap_or(-1) + forced_interval_ms
    }

    /**
        Ask the device for a key frame soon.

        Devices ignore per-input sync flags, so the next frame the device
        produces after this request is the earliest possible key frame.
    */
    fn request_key_frame(&mut self, timestamp_ms: i64) {
        match self.codec.request_key_frame() {
            Ok(()) => self.last_key_frame_ms = Some(timestamp_ms),
            Err(e) => error!("request key frame failed: {e}"),
        }
    }
}

/**
    A video encoder driving a hardware codec device.

    Frames are submitted with [`encode`](Self::encode) and come back
    compressed through the callback given to
    [`initialize`](Self::initialize), on a dedicated output thread.

    A frame with different dimensions than the running session restarts
    the session at the new size, keeping the bitrate and framerate targets.
*/
pub struct HardwareVideoEncoder {
    factory: Arc<dyn CodecFactory>,
    config: EncoderConfig,
    mode: InputMode,
    rate: Arc<Mutex<RateControl>>,
    queue: Arc<Mutex<CorrelationQueue>>,
    stats: Arc<StatsCounters>,
    callback: Option<Arc<dyn EncoderCallback>>,
    session: Option<Session>,
    state: SessionState,
}

impl HardwareVideoEncoder {
    /**
        Create an encoder.

        With a `texture_context`, the encoder runs in texture mode and only
        accepts texture frames. Without one, it runs in buffer mode and the
        device color format in `config` must be a supported buffer layout.
    */
    pub fn new(
        factory: Arc<dyn CodecFactory>,
        config: EncoderConfig,
        texture_context: Option<Arc<dyn GpuContext>>,
    ) -> Result<Self> {
        let mode = match texture_context {
            Some(context) => InputMode::Texture(context),
            None => InputMode::Buffer(ColorFormat::from_codec_color_format(config.color_format)?),
        };
        let adjuster = config.bitrate_adjuster.build();

        Ok(Self {
            factory,
            config,
            mode,
            rate: Arc::new(Mutex::new(RateControl::new(adjuster))),
            queue: Arc::new(Mutex::new(CorrelationQueue::new())),
            stats: Arc::new(StatsCounters::default()),
            callback: None,
            session: None,
            state: SessionState::Uninitialized,
        })
    }

    /**
        Replace the bitrate adjuster chosen by the configuration.

        Only valid before the first session starts.
    */
    pub fn with_bitrate_adjuster(mut self, adjuster: Box<dyn BitrateAdjuster>) -> Self {
        self.rate = Arc::new(Mutex::new(RateControl::new(adjuster)));
        self
    }

    /**
        Start a session with the given settings.

        Fails if a session is already running. On failure, everything
        acquired for the session is released again.
    */
    pub fn initialize<C>(&mut self, settings: EncoderSettings, callback: C) -> Result<()>
    where
        C: EncoderCallback + 'static,
    {
        if self.session.is_some() {
            return Err(Error::invalid_state("encoder is already initialized"));
        }
        self.callback = Some(Arc::new(callback));
        self.init_session(
            settings.width,
            settings.height,
            settings.start_bitrate_kbps,
            settings.max_framerate,
        )
    }

    fn init_session(&mut self, width: u32, height: u32, bitrate_kbps: u32, fps: u32) -> Result<()> {
        debug!("initializing encoder: {width}x{height} @ {bitrate_kbps} kbps, {fps} fps");
        self.state = SessionState::Configuring;

        let result = self.start_session(width, height, bitrate_kbps, fps);
        match result {
            Ok(session) => {
                self.session = Some(session);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                error!("initializing encoder failed: {e}");
                self.state = SessionState::Uninitialized;
                Err(e)
            }
        }
    }

    fn start_session(&mut self, width: u32, height: u32, bitrate_kbps: u32, fps: u32) -> Result<Session> {
        let callback = self
            .callback
            .clone()
            .ok_or_else(|| Error::invalid_state("no callback registered"))?;

        let format = {
            let mut rate = self.rate.lock();
            // Zero keeps the current targets across a restart
            if bitrate_kbps != 0 && fps != 0 {
                rate.set_targets(bitrate_kbps.saturating_mul(1000), fps);
            }
            MediaFormat {
                codec_type: self.config.codec_type,
                width,
                height,
                bitrate_bps: rate.refresh(),
                bitrate_mode: BitrateMode::Cbr,
                color_format: match self.mode {
                    InputMode::Buffer(_) => self.config.color_format,
                    InputMode::Texture(_) => COLOR_FORMAT_SURFACE,
                },
                frame_rate: rate.adjusted_framerate_fps(),
                key_frame_interval_sec: self.config.key_frame_interval_sec,
            }
        };
        debug!("device format: {format:?}");

        let codec = self.factory.create_by_codec_name(&self.config.codec_name)?;
        let input = match self.start_codec(codec.as_ref(), &format) {
            Ok(input) => input,
            Err(e) => {
                // No output thread exists yet, so the device is released here
                if let Err(e) = codec.release() {
                    error!("codec release after failed start failed: {e}");
                }
                return Err(e);
            }
        };

        self.queue.lock().clear();
        let output = OutputLoop {
            codec: Arc::clone(&codec),
            codec_type: self.config.codec_type,
            running: Arc::new(AtomicBool::new(true)),
            queue: Arc::clone(&self.queue),
            rate: Arc::clone(&self.rate),
            callback,
            stats: Arc::clone(&self.stats),
            poll_timeout: self.config.output_poll_timeout(),
            config_buffer: None,
        };
        let output = match OutputThread::spawn(output) {
            Ok(output) => output,
            Err(e) => {
                input.release();
                if let Err(e) = codec.stop().and_then(|()| codec.release()) {
                    error!("codec release after failed spawn failed: {e}");
                }
                return Err(e);
            }
        };

        Ok(Session {
            codec,
            width,
            height,
            input,
            output,
            last_key_frame_ms: None,
        })
    }

    fn start_codec(&self, codec: &dyn HardwareCodec, format: &MediaFormat) -> Result<InputPath> {
        codec.configure(format)?;

        let input = match &self.mode {
            InputMode::Buffer(color_format) => InputPath::Buffer {
                color_format: *color_format,
                scratch: Vec::new(),
            },
            InputMode::Texture(context) => InputPath::Texture(TextureInput::new(context.as_ref(), codec)?),
        };

        if let Err(e) = codec.start() {
            input.release();
            return Err(e);
        }
        Ok(input)
    }

    /**
        Submit a frame for encoding.

        A key frame is requested from the device if `frame_types` asks for
        one, or if the forced key frame interval has elapsed.
    */
    pub fn encode(&mut self, frame: &VideoFrame, frame_types: &[FrameType]) -> Result<EncodeOutcome> {
        let Some(session) = &self.session else {
            return Err(Error::Uninitialized);
        };
        let (width, height) = (frame.width(), frame.height());
        let resized = width != session.width || height != session.height;

        // Rejected input must leave the session untouched
        let i420 = match (&self.mode, &frame.buffer) {
            (InputMode::Texture(_), FrameBuffer::I420(_)) => {
                error!("cannot encode non-texture buffer in texture mode");
                return Err(Error::unsupported_input(
                    "texture mode encoder received a non-texture buffer",
                ));
            }
            (InputMode::Texture(_), FrameBuffer::Texture(_)) => None,
            (InputMode::Buffer(_), buffer) => Some(i420_for_buffer_mode(buffer)?),
        };

        if resized {
            self.reset_session(width, height)?;
        }

        let Some(session) = self.session.as_mut() else {
            return Err(Error::Uninitialized);
        };
        self.stats.record_submitted();

        if self.queue.lock().len() >= self.config.max_pending_outputs {
            warn!("dropped frame, encoder queue full");
            self.stats.record_dropped();
            return Ok(EncodeOutcome::Dropped(DropReason::QueueFull));
        }

        let timestamp_us = frame.timestamp.rounded_micros();
        let timestamp_ms = frame.timestamp.rounded_millis();
        let requested_key_frame = frame_types.contains(&FrameType::Key);
        if requested_key_frame
            || session.should_force_key_frame(self.config.forced_key_frame_interval_ms, timestamp_ms)
        {
            session.request_key_frame(timestamp_ms);
        }

        let pending = PendingOutput {
            capture_time_ms: timestamp_ms,
            rotation: frame.rotation,
            encoded_width: width,
            encoded_height: height,
            complete_frame: true,
        };

        match (&mut session.input, &frame.buffer, i420) {
            (InputPath::Texture(input), FrameBuffer::Texture(texture), _) => {
                self.queue.lock().push(pending);
                encode_texture(input, texture, frame.timestamp.as_nanos(), &self.queue)
            }
            (InputPath::Buffer { color_format, scratch }, _, Some(i420)) => {
                self.queue.lock().push(pending);
                let outcome = encode_buffer(
                    session.codec.as_ref(),
                    *color_format,
                    scratch,
                    &i420,
                    timestamp_us,
                    &self.queue,
                )?;
                if outcome != EncodeOutcome::Queued {
                    self.stats.record_dropped();
                }
                Ok(outcome)
            }
            _ => Err(Error::invalid_state("session input path does not match the input mode")),
        }
    }

    fn reset_session(&mut self, width: u32, height: u32) -> Result<()> {
        debug!("input resolution changed to {width}x{height}, restarting session");
        self.release_session()?;
        self.init_session(width, height, 0, 0)
    }

    /**
        Set new bitrate and framerate targets.

        The framerate is clamped to the configured maximum. While a session
        is running, the adjusted bitrate is pushed to the device right away.
    */
    pub fn set_rate_allocation(&mut self, bitrate_bps: u32, framerate: u32) -> Result<()> {
        let framerate = framerate.min(self.config.max_framerate);

        let mut rate = self.rate.lock();
        rate.set_targets(bitrate_bps, framerate);

        let Some(session) = &self.session else {
            return Ok(());
        };
        match rate.update_bitrate(session.codec.as_ref()) {
            Ok(_) => {
                self.stats.record_bitrate_update();
                Ok(())
            }
            Err(e) => {
                error!("update bitrate failed: {e}");
                Err(e)
            }
        }
    }

    /**
        Stop the running session and release the device.

        Returns OK if no session is running. Blocks up to the configured
        release timeout while the output thread releases the device.
    */
    pub fn release(&mut self) -> Result<()> {
        if self.session.is_none() {
            return Ok(());
        }
        let result = self.release_session();
        self.state = SessionState::Released;
        result
    }

    fn release_session(&mut self) -> Result<()> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        self.state = SessionState::Releasing;

        let Session {
            codec,
            input,
            output,
            ..
        } = session;

        let result = output.shutdown(self.config.release_timeout());

        drop(codec);
        self.queue.lock().clear();

        match result {
            Err(Error::Timeout { .. }) => {
                // The output thread may still hold the device
                warn!("leaving input resources unreleased after release timeout");
                drop(input);
            }
            _ => input.release(),
        }

        self.state = SessionState::Uninitialized;
        result
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats.snapshot()
    }

    /**
        Returns the number of submitted frames awaiting output.
    */
    pub fn pending_outputs(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn implementation_name(&self) -> String {
        format!("HardwareVideoEncoder: {}", self.config.codec_name)
    }
}

impl Drop for HardwareVideoEncoder {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!("release on drop failed: {e}");
        }
    }
}

fn i420_for_buffer_mode(buffer: &FrameBuffer) -> Result<Cow<'_, I420Buffer>> {
    match buffer {
        FrameBuffer::I420(i420) => Ok(Cow::Borrowed(i420)),
        FrameBuffer::Texture(texture) => {
            warn!("encoding texture buffer in buffer mode, this may be inefficient");
            let i420 = texture.to_i420()?;
            if (i420.width(), i420.height()) != (texture.width, texture.height) {
                return Err(Error::unsupported_input(format!(
                    "texture readback produced {}x{} for a {}x{} texture",
                    i420.width(),
                    i420.height(),
                    texture.width,
                    texture.height
                )));
            }
            Ok(Cow::Owned(i420))
        }
    }
}

fn encode_texture(
    input: &mut TextureInput,
    texture: &TextureBuffer,
    timestamp_ns: i64,
    queue: &Mutex<CorrelationQueue>,
) -> Result<EncodeOutcome> {
    if let Err(e) = input.draw(texture, timestamp_ns) {
        error!("encode texture failed: {e}");
        queue.lock().pop_last();
        return Err(Error::codec(format!("texture draw failed: {e}")));
    }
    Ok(EncodeOutcome::Queued)
}

fn encode_buffer(
    codec: &dyn HardwareCodec,
    color_format: ColorFormat,
    scratch: &mut Vec<u8>,
    i420: &I420Buffer,
    timestamp_us: i64,
    queue: &Mutex<CorrelationQueue>,
) -> Result<EncodeOutcome> {
    // Never block for an input buffer, drop frames if the device falls behind
    let index = match codec.dequeue_input_buffer(Duration::ZERO) {
        Ok(Some(index)) => index,
        Ok(None) => {
            warn!("dropped frame, no input buffers available");
            queue.lock().pop_last();
            return Ok(EncodeOutcome::Dropped(DropReason::NoInputBuffer));
        }
        Err(e) => {
            error!("dequeue input buffer failed: {e}");
            queue.lock().pop_last();
            return Err(Error::fallback_software(e.to_string()));
        }
    };

    color_format.fill_buffer(i420, scratch);

    if let Err(e) = codec.queue_input_buffer(index, scratch, timestamp_us) {
        error!("queue input buffer failed: {e}");
        queue.lock().pop_last();
        return Err(Error::codec(e.to_string()));
    }
    Ok(EncodeOutcome::Queued)
}

static_assertions::assert_impl_all!(HardwareVideoEncoder: Send);

#[cfg(test)]
mod tests {
    use super::*;

    use std::thread;
    use std::time::Instant;

    use hwenc_types::{
        CodecStatus, EncodedImage, Rotation, TextureReadback, TextureType, Timestamp, VideoCodecType,
    };

    use crate::bitrate::BitrateAdjusterKind;
    use crate::gpu::Viewport;
    use crate::sim::{
        CONFIG_DATA, SimulatedCodec, SimulatedCodecFactory, SimulatedCodecOptions,
        SimulatedGpuContext, SimulatedReadback,
    };

    type Delivered = Arc<Mutex<Vec<EncodedImage>>>;

    fn config(codec_type: VideoCodecType) -> EncoderConfig {
        EncoderConfig::new("sim.encoder", codec_type)
            .with_output_poll_timeout(Duration::from_millis(5))
            .with_release_timeout(Duration::from_secs(2))
    }

    fn start(
        factory: &Arc<SimulatedCodecFactory>,
        config: EncoderConfig,
        gpu: Option<&SimulatedGpuContext>,
    ) -> (HardwareVideoEncoder, Delivered) {
        let context = gpu.map(|gpu| Arc::new(gpu.clone()) as Arc<dyn GpuContext>);
        let mut encoder = HardwareVideoEncoder::new(factory.clone(), config, context).unwrap();
        let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&delivered);
        encoder
            .initialize(
                EncoderSettings::new(640, 480, 300, 30),
                move |image: EncodedImage| sink.lock().push(image),
            )
            .unwrap();
        (encoder, delivered)
    }

    fn codec(factory: &SimulatedCodecFactory) -> Arc<SimulatedCodec> {
        factory.last_codec().unwrap()
    }

    fn i420_frame(width: u32, height: u32, timestamp_us: i64) -> VideoFrame {
        VideoFrame::new(
            FrameBuffer::I420(I420Buffer::black(width, height)),
            Rotation::Deg0,
            Timestamp::from_micros(timestamp_us),
        )
    }

    fn texture_frame(width: u32, height: u32, timestamp_us: i64) -> VideoFrame {
        VideoFrame::new(
            FrameBuffer::Texture(TextureBuffer::new(width, height, 3, TextureType::Oes)),
            Rotation::Deg0,
            Timestamp::from_micros(timestamp_us),
        )
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        condition()
    }

    #[test]
    fn key_frame_request_is_delivered_with_frame_metadata() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::H264), None);

        let mut frame = i420_frame(640, 480, 20_000);
        frame.rotation = Rotation::Deg270;
        let outcome = encoder.encode(&frame, &[FrameType::Key]).unwrap();
        assert_eq!(outcome, EncodeOutcome::Queued);

        assert!(wait_until(|| delivered.lock().len() == 1));
        let image = delivered.lock()[0].clone();
        assert!(image.is_key_frame());
        assert_eq!((image.encoded_width, image.encoded_height), (640, 480));
        assert_eq!(image.rotation, Rotation::Deg270);
        assert_eq!(image.capture_time_ms, 20);
        assert!(image.complete_frame);
        // Parameter sets lead every H.264 key frame
        assert!(image.buffer.starts_with(CONFIG_DATA));
        assert_eq!(image.len(), CONFIG_DATA.len() + 1250);

        assert_eq!(codec(&factory).stats().key_frame_requests, 1);
        assert!(encoder.release().is_ok());
    }

    #[test]
    fn device_is_configured_from_settings() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8).with_key_frame_interval_sec(20),
            None,
        );
        let format = codec(&factory).stats().last_format.unwrap();
        assert_eq!(format.mime_type(), "video/x-vnd.on2.vp8");
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!(format.bitrate_bps, 300_000);
        assert_eq!(format.bitrate_mode, BitrateMode::Cbr);
        assert_eq!(format.color_format, crate::color::COLOR_FORMAT_YUV420_SEMI_PLANAR);
        assert_eq!(format.frame_rate, 30);
        assert_eq!(format.key_frame_interval_sec, 20);
        assert_eq!(encoder.state(), SessionState::Running);
    }

    #[test]
    fn outputs_arrive_in_submission_order() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(
            &factory,
            config(VideoCodecType::H264).with_max_pending_outputs(100),
            None,
        );

        for i in 0..10 {
            let outcome = encoder.encode(&i420_frame(640, 480, i * 33_333), &[]).unwrap();
            assert_eq!(outcome, EncodeOutcome::Queued);
        }

        assert!(wait_until(|| delivered.lock().len() == 10));
        let times: Vec<i64> = delivered.lock().iter().map(|i| i.capture_time_ms).collect();
        let expected: Vec<i64> = (0..10).map(|i| (i * 33_333 + 500) / 1000).collect();
        assert_eq!(times, expected);
        assert_eq!(encoder.pending_outputs(), 0);

        let stats = encoder.stats();
        assert_eq!(stats.frames_submitted, 10);
        assert_eq!(stats.frames_delivered, 10);
        assert_eq!(stats.key_frames_delivered, 1);
    }

    #[test]
    fn burst_beyond_bound_is_dropped() {
        let factory = Arc::new(SimulatedCodecFactory::with_options(SimulatedCodecOptions {
            paused: true,
            ..SimulatedCodecOptions::default()
        }));
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::H264), None);

        let outcomes: Vec<EncodeOutcome> = (0..5)
            .map(|i| encoder.encode(&i420_frame(640, 480, i * 33_333), &[]).unwrap())
            .collect();
        assert_eq!(
            outcomes,
            vec![
                EncodeOutcome::Queued,
                EncodeOutcome::Queued,
                EncodeOutcome::Queued,
                EncodeOutcome::Dropped(DropReason::QueueFull),
                EncodeOutcome::Dropped(DropReason::QueueFull),
            ]
        );
        assert_eq!(encoder.pending_outputs(), 3);

        codec(&factory).resume_output();
        assert!(wait_until(|| delivered.lock().len() == 3));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(delivered.lock().len(), 3);
        assert_eq!(encoder.stats().frames_dropped, 2);
    }

    #[test]
    fn release_before_any_frame() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::Vp9), None);

        assert!(encoder.release().is_ok());
        assert_eq!(encoder.state(), SessionState::Released);
        assert!(delivered.lock().is_empty());

        let stats = codec(&factory).stats();
        assert_eq!(stats.stops, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn release_twice_is_ok_and_idempotent() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::H264), None);

        assert!(encoder.release().is_ok());
        assert!(encoder.release().is_ok());
        let stats = codec(&factory).stats();
        assert_eq!(stats.stops, 1);
        assert_eq!(stats.releases, 1);
    }

    #[test]
    fn encode_without_session_is_uninitialized() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let mut encoder =
            HardwareVideoEncoder::new(factory.clone(), config(VideoCodecType::H264), None).unwrap();
        let result = encoder.encode(&i420_frame(640, 480, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Uninitialized);

        let (mut encoder, _) = start(&factory, config(VideoCodecType::H264), None);
        encoder.release().unwrap();
        let result = encoder.encode(&i420_frame(640, 480, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Uninitialized);
    }

    #[test]
    fn resolution_change_restarts_session() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::H264), None);

        encoder.encode(&i420_frame(640, 480, 0), &[]).unwrap();
        assert!(wait_until(|| delivered.lock().len() == 1));

        let outcome = encoder.encode(&i420_frame(320, 240, 33_333), &[]).unwrap();
        assert_eq!(outcome, EncodeOutcome::Queued);
        assert!(wait_until(|| delivered.lock().len() == 2));

        let second = delivered.lock()[1].clone();
        assert_eq!((second.encoded_width, second.encoded_height), (320, 240));
        assert!(second.is_key_frame());

        let codecs = factory.codecs();
        assert_eq!(codecs.len(), 2);
        assert_eq!(codecs[0].stats().releases, 1);
        let format = codecs[1].stats().last_format.unwrap();
        assert_eq!((format.width, format.height), (320, 240));
        // Targets survive the restart
        assert_eq!(format.bitrate_bps, 300_000);
        assert_eq!(format.frame_rate, 30);
        assert_eq!(encoder.state(), SessionState::Running);
    }

    #[test]
    fn failed_restart_reports_error() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::H264), None);

        factory.set_fail_create(true);
        let result = encoder.encode(&i420_frame(320, 240, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert_eq!(encoder.state(), SessionState::Uninitialized);
        assert_eq!(encoder.pending_outputs(), 0);
    }

    #[test]
    fn rate_change_updates_device_once() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::Vp8), None);

        encoder.encode(&i420_frame(640, 480, 0), &[]).unwrap();
        assert!(wait_until(|| delivered.lock().len() == 1));

        encoder.set_rate_allocation(150_000, 30).unwrap();
        for i in 1..6 {
            encoder.encode(&i420_frame(640, 480, i * 33_333), &[]).unwrap();
        }
        assert!(wait_until(|| delivered.lock().len() == 6));

        let device = codec(&factory);
        assert_eq!(device.stats().bitrate_updates, vec![150_000]);
        assert_eq!(device.bitrate_bps(), 150_000);
        assert_eq!(encoder.stats().bitrate_updates, 1);
        // 150 kbps at 30 fps
        assert_eq!(delivered.lock()[5].len(), 625);
    }

    #[test]
    fn rate_change_clamps_framerate() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8).with_bitrate_adjuster(BitrateAdjusterKind::Framerate),
            None,
        );

        // 60 fps is clamped to 30, so no scaling applies
        encoder.set_rate_allocation(300_000, 60).unwrap();
        encoder.set_rate_allocation(300_000, 15).unwrap();
        assert_eq!(codec(&factory).stats().bitrate_updates, vec![300_000, 600_000]);
    }

    #[test]
    fn rate_change_before_initialize_sets_targets() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let mut encoder =
            HardwareVideoEncoder::new(factory.clone(), config(VideoCodecType::Vp8), None).unwrap();
        encoder.set_rate_allocation(500_000, 30).unwrap();
        encoder
            .initialize(EncoderSettings::new(640, 480, 0, 0), |_: EncodedImage| {})
            .unwrap();
        assert_eq!(codec(&factory).stats().last_format.unwrap().bitrate_bps, 500_000);
    }

    #[test]
    fn dynamic_adjuster_corrects_overshooting_device() {
        let factory = Arc::new(SimulatedCodecFactory::with_options(SimulatedCodecOptions {
            overshoot: 2.0,
            ..SimulatedCodecOptions::default()
        }));
        let (mut encoder, delivered) = start(
            &factory,
            config(VideoCodecType::Vp8)
                .with_bitrate_adjuster(BitrateAdjusterKind::Dynamic)
                .with_max_pending_outputs(1000),
            None,
        );

        for i in 0..120 {
            encoder.encode(&i420_frame(640, 480, i * 33_333), &[]).unwrap();
        }
        assert!(wait_until(|| delivered.lock().len() == 120));

        let updates = codec(&factory).stats().bitrate_updates;
        assert_eq!(updates.len(), 1);
        assert!(updates[0] < 300_000);
        assert_eq!(encoder.stats().bitrate_updates, 1);
    }

    #[test]
    fn forced_key_frame_interval() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8)
                .with_forced_key_frame_interval_ms(100)
                .with_max_pending_outputs(100),
            None,
        );

        for ms in [0, 50, 120, 150, 250] {
            encoder.encode(&i420_frame(640, 480, ms * 1000), &[]).unwrap();
        }
        assert_eq!(codec(&factory).stats().key_frame_requests, 2);
    }

    #[test]
    fn failed_key_frame_request_is_retried() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8)
                .with_forced_key_frame_interval_ms(100)
                .with_max_pending_outputs(100),
            None,
        );
        let device = codec(&factory);

        device.set_fail_key_frame_request(true);
        encoder.encode(&i420_frame(640, 480, 120_000), &[]).unwrap();
        device.set_fail_key_frame_request(false);
        encoder.encode(&i420_frame(640, 480, 130_000), &[]).unwrap();
        assert_eq!(device.stats().key_frame_requests, 1);
    }

    #[test]
    fn no_input_buffer_drops_frame() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), None);
        codec(&factory).set_input_slots(0);

        let outcome = encoder.encode(&i420_frame(640, 480, 0), &[]).unwrap();
        assert_eq!(outcome, EncodeOutcome::Dropped(DropReason::NoInputBuffer));
        assert_eq!(encoder.pending_outputs(), 0);
        assert_eq!(encoder.stats().frames_dropped, 1);
    }

    #[test]
    fn input_dequeue_failure_falls_back_to_software() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), None);
        codec(&factory).set_fail_input_dequeue(true);

        let result = encoder.encode(&i420_frame(640, 480, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::FallbackSoftware);
        assert_eq!(encoder.pending_outputs(), 0);
    }

    #[test]
    fn queue_input_failure_is_an_error() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), None);
        codec(&factory).set_fail_queue_input(true);

        let result = encoder.encode(&i420_frame(640, 480, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert_eq!(encoder.pending_outputs(), 0);
    }

    #[test]
    fn buffer_mode_converts_to_device_layout() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8).with_color_format(crate::color::COLOR_FORMAT_YUV420_PLANAR),
            None,
        );
        encoder.encode(&i420_frame(640, 480, 0), &[]).unwrap();
        assert_eq!(codec(&factory).stats().last_input_len, 640 * 480 * 3 / 2);
    }

    #[test]
    fn texture_in_buffer_mode_is_read_back() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::Vp8), None);

        let mut frame = texture_frame(640, 480, 0);
        if let FrameBuffer::Texture(texture) = &mut frame.buffer {
            *texture = texture.clone().with_readback(Arc::new(SimulatedReadback));
        }
        assert_eq!(encoder.encode(&frame, &[]).unwrap(), EncodeOutcome::Queued);
        assert!(wait_until(|| delivered.lock().len() == 1));
        assert_eq!(codec(&factory).stats().last_input_len, 640 * 480 * 3 / 2);

        // Without a readback the frame cannot reach the device
        let result = encoder.encode(&texture_frame(640, 480, 33_333), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert_eq!(encoder.pending_outputs(), 0);
    }

    #[test]
    fn unsupported_color_format_is_rejected() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let result = HardwareVideoEncoder::new(
            factory.clone(),
            config(VideoCodecType::Vp8).with_color_format(0x1234),
            None,
        );
        assert!(matches!(result, Err(Error::UnsupportedFormat { .. })));

        // Texture mode never copies buffers, any code is fine
        let gpu: Arc<dyn GpuContext> = Arc::new(SimulatedGpuContext::new());
        let result = HardwareVideoEncoder::new(
            factory,
            config(VideoCodecType::Vp8).with_color_format(0x1234),
            Some(gpu),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn texture_mode_draws_frames() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let gpu = SimulatedGpuContext::new();
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::Vp8), Some(&gpu));

        let outcome = encoder.encode(&texture_frame(640, 480, 20_000), &[]).unwrap();
        assert_eq!(outcome, EncodeOutcome::Queued);
        assert!(wait_until(|| delivered.lock().len() == 1));
        assert_eq!(delivered.lock()[0].capture_time_ms, 20);

        let stats = gpu.stats();
        assert_eq!(stats.external_draws, 1);
        assert_eq!(stats.presented, 1);
        assert_eq!(stats.last_viewport, Some(Viewport::full(640, 480)));
        assert_eq!(stats.last_texture_id, Some(3));

        let format = codec(&factory).stats().last_format.unwrap();
        assert_eq!(format.color_format, COLOR_FORMAT_SURFACE);

        encoder.release().unwrap();
        let stats = gpu.stats();
        assert_eq!(stats.drawers_released, 1);
        assert_eq!(stats.render_contexts_released, 1);
        assert_eq!(codec(&factory).stats().surfaces_released, 1);
    }

    #[test]
    fn texture_draw_failure_keeps_queue_consistent() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let gpu = SimulatedGpuContext::new();
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), Some(&gpu));

        gpu.set_fail_draw(true);
        let result = encoder.encode(&texture_frame(640, 480, 0), &[]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert_eq!(encoder.pending_outputs(), 0);
    }

    #[test]
    fn texture_mode_rejects_cpu_buffers() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let gpu = SimulatedGpuContext::new();
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), Some(&gpu));

        let result = encoder.encode(&i420_frame(640, 480, 0), &[FrameType::Key]);
        assert!(matches!(result, Err(Error::UnsupportedInput { .. })));
        assert_eq!(encoder.pending_outputs(), 0);
        assert_eq!(codec(&factory).stats().key_frame_requests, 0);
        assert_eq!(encoder.state(), SessionState::Running);
    }

    #[test]
    fn wrong_input_kind_does_not_restart_session() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let gpu = SimulatedGpuContext::new();
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), Some(&gpu));

        // Different size and wrong kind, the size change must not be applied
        let result = encoder.encode(&i420_frame(320, 240, 0), &[]);
        assert!(matches!(result, Err(Error::UnsupportedInput { .. })));
        assert_eq!(factory.codecs().len(), 1);
        let device = codec(&factory);
        assert_eq!(device.stats().releases, 0);
        assert_eq!(device.stats().stops, 0);
        assert_eq!(encoder.state(), SessionState::Running);
        assert_eq!(encoder.stats().frames_submitted, 0);

        // The original session still encodes
        let outcome = encoder.encode(&texture_frame(640, 480, 33_333), &[]).unwrap();
        assert_eq!(outcome, EncodeOutcome::Queued);
        assert_eq!(encoder.stats().frames_submitted, 1);
    }

    #[test]
    fn failed_readback_does_not_request_key_frame() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), None);

        let result = encoder.encode(&texture_frame(640, 480, 0), &[FrameType::Key]);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        let stats = codec(&factory).stats();
        assert_eq!(stats.key_frame_requests, 0);
        assert_eq!(stats.inputs_queued, 0);
        assert_eq!(encoder.pending_outputs(), 0);
        assert_eq!(encoder.stats().frames_submitted, 0);
    }

    struct WrongSizeReadback;

    impl TextureReadback for WrongSizeReadback {
        fn to_i420(&self, _texture: &TextureBuffer) -> Result<I420Buffer> {
            Ok(I420Buffer::black(320, 240))
        }
    }

    #[test]
    fn readback_with_wrong_dimensions_is_rejected() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, delivered) = start(&factory, config(VideoCodecType::Vp8), None);

        let mut frame = texture_frame(640, 480, 0);
        if let FrameBuffer::Texture(texture) = &mut frame.buffer {
            *texture = texture.clone().with_readback(Arc::new(WrongSizeReadback));
        }
        let result = encoder.encode(&frame, &[FrameType::Key]);
        assert!(matches!(result, Err(Error::UnsupportedInput { .. })));
        assert_eq!(encoder.pending_outputs(), 0);
        let stats = codec(&factory).stats();
        assert_eq!(stats.inputs_queued, 0);
        assert_eq!(stats.key_frame_requests, 0);

        // A well-formed frame afterwards is delivered with its own metadata
        encoder.encode(&i420_frame(640, 480, 33_333), &[]).unwrap();
        assert!(wait_until(|| delivered.lock().len() == 1));
        assert_eq!(delivered.lock()[0].capture_time_ms, 33);
    }

    #[test]
    fn rejected_rate_change_reports_error() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::Vp8), None);
        let device = codec(&factory);
        device.set_fail_set_bitrate(true);

        let result = encoder.set_rate_allocation(150_000, 30);
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert!(device.stats().bitrate_updates.is_empty());
        assert_eq!(device.stats().rejected_bitrate_updates, 1);
        assert_eq!(device.bitrate_bps(), 300_000);
        assert_eq!(encoder.stats().bitrate_updates, 0);
        assert_eq!(encoder.state(), SessionState::Running);
    }

    #[test]
    fn release_failure_is_reported() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::H264), None);
        codec(&factory).set_fail_release(true);

        let result = encoder.release();
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert!(encoder.release().is_ok());
    }

    #[test]
    fn release_timeout_leaves_gpu_resources() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let gpu = SimulatedGpuContext::new();
        let (mut encoder, _) = start(
            &factory,
            config(VideoCodecType::Vp8).with_release_timeout(Duration::from_millis(50)),
            Some(&gpu),
        );
        let device = codec(&factory);
        device.set_release_delay(Duration::from_millis(400));

        let result = encoder.release();
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Timeout);
        assert_eq!(encoder.state(), SessionState::Released);

        let stats = gpu.stats();
        assert_eq!(stats.drawers_released, 0);
        assert_eq!(stats.render_contexts_released, 0);
        assert_eq!(device.stats().surfaces_released, 0);

        // Nothing left to wait for
        assert!(encoder.release().is_ok());
        assert!(wait_until(|| device.stats().releases == 1));
    }

    #[test]
    fn configure_failure_releases_codec() {
        let factory = Arc::new(SimulatedCodecFactory::with_options(SimulatedCodecOptions {
            fail_configure: true,
            ..SimulatedCodecOptions::default()
        }));
        let mut encoder =
            HardwareVideoEncoder::new(factory.clone(), config(VideoCodecType::H264), None).unwrap();
        let result = encoder.initialize(EncoderSettings::new(640, 480, 300, 30), |_: EncodedImage| {});
        assert_eq!(CodecStatus::from_result(&result), CodecStatus::Error);
        assert_eq!(encoder.state(), SessionState::Uninitialized);
        assert_eq!(codec(&factory).stats().releases, 1);
    }

    #[test]
    fn start_failure_releases_texture_resources() {
        let factory = Arc::new(SimulatedCodecFactory::with_options(SimulatedCodecOptions {
            fail_start: true,
            ..SimulatedCodecOptions::default()
        }));
        let gpu = SimulatedGpuContext::new();
        let mut encoder = HardwareVideoEncoder::new(
            factory.clone(),
            config(VideoCodecType::Vp8),
            Some(Arc::new(gpu.clone())),
        )
        .unwrap();
        let result = encoder.initialize(EncoderSettings::new(640, 480, 300, 30), |_: EncodedImage| {});
        assert!(result.is_err());

        let stats = gpu.stats();
        assert_eq!(stats.drawers_released, 1);
        assert_eq!(stats.render_contexts_released, 1);
        let device = codec(&factory).stats();
        assert_eq!(device.surfaces_released, 1);
        assert_eq!(device.releases, 1);
    }

    #[test]
    fn missing_codec_fails_initialize() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        factory.set_fail_create(true);
        let mut encoder =
            HardwareVideoEncoder::new(factory.clone(), config(VideoCodecType::H264), None).unwrap();
        let result = encoder.initialize(EncoderSettings::new(640, 480, 300, 30), |_: EncodedImage| {});
        assert!(matches!(result, Err(Error::Config { .. })));
        assert_eq!(encoder.state(), SessionState::Uninitialized);
    }

    #[test]
    fn initialize_twice_is_rejected_until_released() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (mut encoder, _) = start(&factory, config(VideoCodecType::H264), None);

        let settings = EncoderSettings::new(640, 480, 300, 30);
        let result = encoder.initialize(settings, |_: EncodedImage| {});
        assert!(matches!(result, Err(Error::InvalidState { .. })));

        encoder.release().unwrap();
        encoder.initialize(settings, |_: EncodedImage| {}).unwrap();
        assert_eq!(encoder.state(), SessionState::Running);
        assert_eq!(factory.codecs().len(), 2);
    }

    #[test]
    fn drop_releases_session() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let (encoder, _) = start(&factory, config(VideoCodecType::H264), None);
        let device = codec(&factory);
        drop(encoder);
        assert_eq!(device.stats().releases, 1);
    }

    #[test]
    fn implementation_name_names_codec() {
        let factory = Arc::new(SimulatedCodecFactory::new());
        let encoder =
            HardwareVideoEncoder::new(factory, config(VideoCodecType::H264), None).unwrap();
        assert_eq!(encoder.implementation_name(), "HardwareVideoEncoder: sim.encoder");
    }
}
