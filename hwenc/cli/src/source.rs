/*!
    Synthetic frame source.

    Produces a moving luma gradient at a fixed framerate, either as I420
    buffers or as textures that read back through the simulated GPU.
*/

use std::sync::Arc;

use hwenc_pipeline::sim::SimulatedReadback;
use hwenc_types::{
    FrameBuffer, I420Buffer, Result, Rotation, TextureBuffer, TextureType, Timestamp, VideoFrame,
};

const TEXTURE_ID: u32 = 1;

pub struct FrameSource {
    width: u32,
    height: u32,
    fps: u32,
    texture: bool,
    index: u64,
}

impl FrameSource {
    pub fn new(width: u32, height: u32, fps: u32, texture: bool) -> Self {
        Self {
            width,
            height,
            fps: fps.max(1),
            texture,
            index: 0,
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /**
        Capture timestamp of the next frame.
    */
    pub fn timestamp(&self) -> Timestamp {
        let nanos = self.index as i64 * 1_000_000_000 / i64::from(self.fps);
        Timestamp::from_nanos(nanos)
    }

    pub fn next_frame(&mut self) -> Result<VideoFrame> {
        let buffer = if self.texture {
            let texture = TextureBuffer::new(self.width, self.height, TEXTURE_ID, TextureType::Oes)
                .with_readback(Arc::new(SimulatedReadback));
            FrameBuffer::Texture(texture)
        } else {
            FrameBuffer::I420(self.gradient()?)
        };

        let frame = VideoFrame::new(buffer, Rotation::Deg0, self.timestamp());
        self.index += 1;
        Ok(frame)
    }

    fn gradient(&self) -> Result<I420Buffer> {
        let (width, height) = (self.width as usize, self.height as usize);
        let shift = self.index as usize;

        let mut data_y = Vec::with_capacity(width * height);
        for y in 0..height {
            data_y.extend((0..width).map(|x| ((x + y + shift) % 220 + 16) as u8));
        }

        let chroma = width.div_ceil(2) * height.div_ceil(2);
        I420Buffer::new(
            self.width,
            self.height,
            data_y,
            vec![128; chroma],
            vec![128; chroma],
        )
    }
}
