/*!
    Simulated hardware codec and GPU.

    A deterministic stand-in for a real device, used by tests and by the
    command line driver. The codec "encodes" every input immediately into a
    payload sized from its current bitrate, emits a configuration buffer on
    start for codecs that carry parameter sets out of band, and honors key
    frame requests on the next frame. Output can be held back, and most
    operations can be made to fail.
*/

use std::collections::VecDeque;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use hwenc_types::{Error, I420Buffer, Result, TextureBuffer, TextureReadback, TransformMatrix};

use crate::device::{
    BufferFlags, CodecFactory, HardwareCodec, InputSurface, MediaFormat, OutputBuffer,
};
use crate::gpu::{GpuContext, RenderContext, TextureDrawer, Viewport};

/// Byte every key frame payload is filled with.
pub const KEY_FRAME_MARKER: u8 = 0x65;
/// Byte every delta frame payload is filled with.
pub const DELTA_FRAME_MARKER: u8 = 0x41;
/// Configuration buffer emitted on start for H.264/H.265.
pub const CONFIG_DATA: &[u8] = &[
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1f, // SPS
    0x00, 0x00, 0x00, 0x01, 0x68, 0xce, 0x3c, 0x80, // PPS
];

const DEFAULT_FRAME_RATE: u32 = 30;

/**
    Behavior of a simulated codec at creation.
*/
#[derive(Clone, Debug)]
pub struct SimulatedCodecOptions {
    /// Input buffers available to buffer mode at once.
    pub input_slots: usize,
    /// Output size relative to the configured bitrate.
    pub overshoot: f64,
    /// Hold all output until resumed.
    pub paused: bool,
    /// Fail `configure`.
    pub fail_configure: bool,
    /// Fail `start`.
    pub fail_start: bool,
}

impl Default for SimulatedCodecOptions {
    fn default() -> Self {
        Self {
            input_slots: 4,
            overshoot: 1.0,
            paused: false,
            fail_configure: false,
            fail_start: false,
        }
    }
}

/**
    Counters of the calls a simulated codec received.
*/
#[derive(Clone, Debug, Default)]
pub struct SimulatedCodecStats {
    pub configures: usize,
    pub starts: usize,
    pub stops: usize,
    pub releases: usize,
    pub inputs_queued: usize,
    pub last_input_len: usize,
    pub outputs_released: usize,
    pub key_frame_requests: usize,
    /// Every bitrate pushed with `set_bitrate`, in order.
    pub bitrate_updates: Vec<u32>,
    /// `set_bitrate` calls that failed.
    pub rejected_bitrate_updates: usize,
    pub surfaces_created: usize,
    pub surfaces_released: usize,
    pub last_format: Option<MediaFormat>,
}

#[derive(Default)]
struct FailureFlags {
    input_dequeue: bool,
    queue_input: bool,
    next_output_dequeue: bool,
    key_frame_request: bool,
    set_bitrate: bool,
    release: bool,
}

struct SimState {
    options: SimulatedCodecOptions,
    format: Option<MediaFormat>,
    started: bool,
    bitrate_bps: u32,
    key_frame_requested: bool,
    frames_encoded: u64,
    free_input_slots: usize,
    next_input_index: usize,
    next_output_index: usize,
    outputs: VecDeque<OutputBuffer>,
    fail: FailureFlags,
    release_delay: Duration,
    stats: SimulatedCodecStats,
}

impl SimState {
    fn encode_frame(&mut self, presentation_time_us: i64) {
        let key_frame = self.frames_encoded == 0 || mem::take(&mut self.key_frame_requested);
        let frame_rate = self
            .format
            .as_ref()
            .map_or(DEFAULT_FRAME_RATE, |f| f.frame_rate)
            .max(1);

        let budget = f64::from(self.bitrate_bps) / 8.0 / f64::from(frame_rate);
        let size = (budget * self.options.overshoot).round().max(1.0) as usize;
        let marker = if key_frame {
            KEY_FRAME_MARKER
        } else {
            DELTA_FRAME_MARKER
        };

        self.push_output(
            Bytes::from(vec![marker; size]),
            BufferFlags {
                codec_config: false,
                key_frame,
            },
            presentation_time_us,
        );
        self.frames_encoded += 1;
    }

    fn push_output(&mut self, data: Bytes, flags: BufferFlags, presentation_time_us: i64) {
        let index = self.next_output_index;
        self.next_output_index += 1;
        self.outputs.push_back(OutputBuffer {
            index,
            data,
            flags,
            presentation_time_us,
        });
    }
}

struct Shared {
    state: Mutex<SimState>,
    cond: Condvar,
}

impl Shared {
    fn update<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock();
        let result = f(&mut state);
        self.cond.notify_all();
        result
    }
}

/**
    A simulated hardware codec.
*/
pub struct SimulatedCodec {
    name: String,
    shared: Arc<Shared>,
}

impl SimulatedCodec {
    /**
        Create a codec with default options.
    */
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, SimulatedCodecOptions::default())
    }

    pub fn with_options(name: impl Into<String>, options: SimulatedCodecOptions) -> Self {
        let state = SimState {
            free_input_slots: options.input_slots,
            options,
            format: None,
            started: false,
            bitrate_bps: 0,
            key_frame_requested: false,
            frames_encoded: 0,
            next_input_index: 0,
            next_output_index: 0,
            outputs: VecDeque::new(),
            fail: FailureFlags::default(),
            release_delay: Duration::ZERO,
            stats: SimulatedCodecStats::default(),
        };
        Self {
            name: name.into(),
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> SimulatedCodecStats {
        self.shared.state.lock().stats.clone()
    }

    /**
        Returns the bitrate the codec currently encodes at.
    */
    pub fn bitrate_bps(&self) -> u32 {
        self.shared.state.lock().bitrate_bps
    }

    /**
        Returns the number of outputs waiting to be dequeued.
    */
    pub fn queued_outputs(&self) -> usize {
        self.shared.state.lock().outputs.len()
    }

    /**
        Hold all output until [`resume_output`](Self::resume_output).
    */
    pub fn pause_output(&self) {
        self.shared.update(|s| s.options.paused = true);
    }

    pub fn resume_output(&self) {
        self.shared.update(|s| s.options.paused = false);
    }

    pub fn set_input_slots(&self, slots: usize) {
        self.shared.update(|s| s.free_input_slots = slots);
    }

    pub fn set_overshoot(&self, overshoot: f64) {
        self.shared.update(|s| s.options.overshoot = overshoot);
    }

    pub fn set_fail_input_dequeue(&self, fail: bool) {
        self.shared.update(|s| s.fail.input_dequeue = fail);
    }

    pub fn set_fail_queue_input(&self, fail: bool) {
        self.shared.update(|s| s.fail.queue_input = fail);
    }

    /**
        Make the next output dequeue fail once.
    */
    pub fn fail_next_output_dequeue(&self) {
        self.shared.update(|s| s.fail.next_output_dequeue = true);
    }

    pub fn set_fail_key_frame_request(&self, fail: bool) {
        self.shared.update(|s| s.fail.key_frame_request = fail);
    }

    pub fn set_fail_set_bitrate(&self, fail: bool) {
        self.shared.update(|s| s.fail.set_bitrate = fail);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.shared.update(|s| s.fail.release = fail);
    }

    /**
        Make `release` block for `delay` before returning.
    */
    pub fn set_release_delay(&self, delay: Duration) {
        self.shared.update(|s| s.release_delay = delay);
    }

    /**
        Queue a raw output buffer, bypassing the encoder model.
    */
    pub fn inject_output(&self, output: OutputBuffer) {
        self.shared.update(|s| s.outputs.push_back(output));
    }
}

impl HardwareCodec for SimulatedCodec {
    fn configure(&self, format: &MediaFormat) -> Result<()> {
        self.shared.update(|s| {
            s.stats.configures += 1;
            if s.options.fail_configure {
                return Err(Error::config(format!("{} rejected the format", self.name)));
            }
            s.bitrate_bps = format.bitrate_bps;
            s.format = Some(format.clone());
            s.stats.last_format = Some(format.clone());
            Ok(())
        })
    }

    fn create_input_surface(&self) -> Result<Arc<dyn InputSurface>> {
        self.shared.update(|s| s.stats.surfaces_created += 1);
        Ok(Arc::new(SimulatedSurface {
            shared: Arc::clone(&self.shared),
        }))
    }

    fn start(&self) -> Result<()> {
        self.shared.update(|s| {
            s.stats.starts += 1;
            if s.options.fail_start {
                return Err(Error::codec(format!("{} failed to start", self.name)));
            }
            let Some(format) = &s.format else {
                return Err(Error::invalid_state("codec started before configure"));
            };
            if format.codec_type.prepends_config_to_key_frames() {
                let flags = BufferFlags {
                    codec_config: true,
                    key_frame: false,
                };
                s.push_output(Bytes::from_static(CONFIG_DATA), flags, 0);
            }
            s.started = true;
            Ok(())
        })
    }

    fn dequeue_input_buffer(&self, _timeout: Duration) -> Result<Option<usize>> {
        self.shared.update(|s| {
            if s.fail.input_dequeue {
                return Err(Error::codec("simulated input dequeue failure"));
            }
            if !s.started {
                return Err(Error::invalid_state("codec is not started"));
            }
            if s.free_input_slots == 0 {
                return Ok(None);
            }
            s.free_input_slots -= 1;
            let index = s.next_input_index;
            s.next_input_index += 1;
            Ok(Some(index))
        })
    }

    fn queue_input_buffer(
        &self,
        _index: usize,
        data: &[u8],
        presentation_time_us: i64,
    ) -> Result<()> {
        self.shared.update(|s| {
            s.free_input_slots += 1;
            if s.fail.queue_input {
                return Err(Error::codec("simulated queue input failure"));
            }
            s.stats.inputs_queued += 1;
            s.stats.last_input_len = data.len();
            s.encode_frame(presentation_time_us);
            Ok(())
        })
    }

    fn dequeue_output_buffer(&self, timeout: Duration) -> Result<Option<OutputBuffer>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        if mem::take(&mut state.fail.next_output_dequeue) {
            return Err(Error::codec("simulated output dequeue failure"));
        }
        loop {
            if !state.options.paused {
                if let Some(output) = state.outputs.pop_front() {
                    return Ok(Some(output));
                }
            }
            if self.shared.cond.wait_until(&mut state, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn release_output_buffer(&self, _index: usize) -> Result<()> {
        self.shared.update(|s| s.stats.outputs_released += 1);
        Ok(())
    }

    fn request_key_frame(&self) -> Result<()> {
        self.shared.update(|s| {
            if s.fail.key_frame_request {
                return Err(Error::codec("simulated key frame request failure"));
            }
            s.stats.key_frame_requests += 1;
            s.key_frame_requested = true;
            Ok(())
        })
    }

    fn set_bitrate(&self, bitrate_bps: u32) -> Result<()> {
        self.shared.update(|s| {
            if s.fail.set_bitrate {
                s.stats.rejected_bitrate_updates += 1;
                return Err(Error::codec("simulated bitrate update failure"));
            }
            s.bitrate_bps = bitrate_bps;
            s.stats.bitrate_updates.push(bitrate_bps);
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.shared.update(|s| {
            s.started = false;
            s.stats.stops += 1;
        });
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let delay = self.shared.state.lock().release_delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        self.shared.update(|s| {
            s.stats.releases += 1;
            s.outputs.clear();
            if s.fail.release {
                return Err(Error::codec("simulated release failure"));
            }
            Ok(())
        })
    }
}

/**
    Input surface of a simulated codec. Every presented frame is encoded.
*/
struct SimulatedSurface {
    shared: Arc<Shared>,
}

impl InputSurface for SimulatedSurface {
    fn on_frame_presented(&self, timestamp_ns: i64) {
        self.shared.update(|s| {
            if s.started {
                s.encode_frame((timestamp_ns + 500) / 1000);
            }
        });
    }

    fn release(&self) {
        self.shared.update(|s| s.stats.surfaces_released += 1);
    }
}

/**
    Creates simulated codecs and keeps a handle to each one.
*/
#[derive(Default)]
pub struct SimulatedCodecFactory {
    options: Mutex<SimulatedCodecOptions>,
    codecs: Mutex<Vec<Arc<SimulatedCodec>>>,
    fail_create: AtomicBool,
}

impl SimulatedCodecFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: SimulatedCodecOptions) -> Self {
        Self {
            options: Mutex::new(options),
            ..Self::default()
        }
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::Relaxed);
    }

    /**
        Returns every codec created so far, oldest first.
    */
    pub fn codecs(&self) -> Vec<Arc<SimulatedCodec>> {
        self.codecs.lock().clone()
    }

    pub fn last_codec(&self) -> Option<Arc<SimulatedCodec>> {
        self.codecs.lock().last().cloned()
    }
}

impl CodecFactory for SimulatedCodecFactory {
    fn create_by_codec_name(&self, name: &str) -> Result<Arc<dyn HardwareCodec>> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(Error::config(format!("cannot create codec {name}")));
        }
        let options = self.options.lock().clone();
        let codec = Arc::new(SimulatedCodec::with_options(name, options));
        self.codecs.lock().push(Arc::clone(&codec));
        Ok(codec)
    }
}

/**
    Counters of the calls a simulated GPU received.
*/
#[derive(Clone, Debug, Default)]
pub struct SimulatedGpuStats {
    pub render_contexts_created: usize,
    pub render_contexts_released: usize,
    pub drawers_created: usize,
    pub drawers_released: usize,
    pub clears: usize,
    pub external_draws: usize,
    pub rgb_draws: usize,
    pub presented: usize,
    pub last_viewport: Option<Viewport>,
    pub last_texture_id: Option<u32>,
}

#[derive(Default)]
struct GpuState {
    fail_draw: bool,
    fail_create_drawer: bool,
    stats: SimulatedGpuStats,
}

/**
    A simulated shared GPU context.

    Clones share state, so a test can keep one clone to inspect what the
    encoder drew.
*/
#[derive(Clone, Default)]
pub struct SimulatedGpuContext {
    state: Arc<Mutex<GpuState>>,
}

impl SimulatedGpuContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> SimulatedGpuStats {
        self.state.lock().stats.clone()
    }

    pub fn set_fail_draw(&self, fail: bool) {
        self.state.lock().fail_draw = fail;
    }

    pub fn set_fail_create_drawer(&self, fail: bool) {
        self.state.lock().fail_create_drawer = fail;
    }
}

impl GpuContext for SimulatedGpuContext {
    fn create_render_context(&self) -> Result<Box<dyn RenderContext>> {
        self.state.lock().stats.render_contexts_created += 1;
        Ok(Box::new(SimulatedRenderContext {
            state: Arc::clone(&self.state),
            surface: None,
        }))
    }

    fn create_drawer(&self) -> Result<Box<dyn TextureDrawer>> {
        let mut state = self.state.lock();
        if state.fail_create_drawer {
            return Err(Error::codec("simulated drawer creation failure"));
        }
        state.stats.drawers_created += 1;
        Ok(Box::new(SimulatedDrawer {
            state: Arc::clone(&self.state),
        }))
    }
}

struct SimulatedRenderContext {
    state: Arc<Mutex<GpuState>>,
    surface: Option<Arc<dyn InputSurface>>,
}

impl RenderContext for SimulatedRenderContext {
    fn create_surface(&mut self, surface: Arc<dyn InputSurface>) -> Result<()> {
        if self.surface.is_some() {
            return Err(Error::invalid_state("render context already has a surface"));
        }
        self.surface = Some(surface);
        Ok(())
    }

    fn make_current(&mut self) -> Result<()> {
        match self.surface {
            Some(_) => Ok(()),
            None => Err(Error::invalid_state("no surface to make current")),
        }
    }

    fn clear(&mut self) -> Result<()> {
        self.state.lock().stats.clears += 1;
        Ok(())
    }

    fn swap_buffers(&mut self, timestamp_ns: i64) -> Result<()> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| Error::invalid_state("no surface to present"))?;
        self.state.lock().stats.presented += 1;
        surface.on_frame_presented(timestamp_ns);
        Ok(())
    }

    fn release(&mut self) {
        self.surface = None;
        self.state.lock().stats.render_contexts_released += 1;
    }
}

struct SimulatedDrawer {
    state: Arc<Mutex<GpuState>>,
}

impl SimulatedDrawer {
    fn draw(&mut self, texture_id: u32, viewport: Viewport, external: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.fail_draw {
            return Err(Error::codec("simulated draw failure"));
        }
        if external {
            state.stats.external_draws += 1;
        } else {
            state.stats.rgb_draws += 1;
        }
        state.stats.last_viewport = Some(viewport);
        state.stats.last_texture_id = Some(texture_id);
        Ok(())
    }
}

impl TextureDrawer for SimulatedDrawer {
    fn draw_external(
        &mut self,
        texture_id: u32,
        _transform: &TransformMatrix,
        _frame_width: u32,
        _frame_height: u32,
        viewport: Viewport,
    ) -> Result<()> {
        self.draw(texture_id, viewport, true)
    }

    fn draw_rgb(
        &mut self,
        texture_id: u32,
        _transform: &TransformMatrix,
        _frame_width: u32,
        _frame_height: u32,
        viewport: Viewport,
    ) -> Result<()> {
        self.draw(texture_id, viewport, false)
    }

    fn release(&mut self) {
        self.state.lock().stats.drawers_released += 1;
    }
}

/**
    Reads any texture back as a black frame.
*/
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedReadback;

impl TextureReadback for SimulatedReadback {
    fn to_i420(&self, texture: &TextureBuffer) -> Result<I420Buffer> {
        Ok(I420Buffer::black(texture.width, texture.height))
    }
}
