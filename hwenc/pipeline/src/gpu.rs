/*!
    GPU input path.

    In texture mode, frames never leave the GPU: each texture is drawn onto
    the device's input surface, and presenting the surface hands the frame to
    the device with the presentation time as its timestamp.
*/

use std::sync::Arc;

use tracing::debug;

use hwenc_types::{Result, TextureBuffer, TextureType, TransformMatrix};

use crate::device::{HardwareCodec, InputSurface};

/**
    Region of the target surface to draw into, in pixels.
*/
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /**
        A viewport covering a whole surface of the given size.
    */
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/**
    A shared GPU context that texture frames live in.
*/
pub trait GpuContext: Send + Sync {
    /**
        Create a render context sharing textures with this context.
    */
    fn create_render_context(&self) -> Result<Box<dyn RenderContext>>;

    /**
        Create a helper that draws textures as quads.
    */
    fn create_drawer(&self) -> Result<Box<dyn TextureDrawer>>;
}

/**
    A render context bound to a single window surface.
*/
pub trait RenderContext: Send {
    /**
        Attach the device's input surface as the draw target.
    */
    fn create_surface(&mut self, surface: Arc<dyn InputSurface>) -> Result<()>;

    fn make_current(&mut self) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    /**
        Present the drawn frame, stamped with `timestamp_ns`.
    */
    fn swap_buffers(&mut self, timestamp_ns: i64) -> Result<()>;

    fn release(&mut self);
}

/**
    Draws textures as full quads.
*/
pub trait TextureDrawer: Send {
    /**
        Draw an external (opaque) texture.
    */
    fn draw_external(
        &mut self,
        texture_id: u32,
        transform: &TransformMatrix,
        frame_width: u32,
        frame_height: u32,
        viewport: Viewport,
    ) -> Result<()>;

    /**
        Draw a plain RGB texture.
    */
    fn draw_rgb(
        &mut self,
        texture_id: u32,
        transform: &TransformMatrix,
        frame_width: u32,
        frame_height: u32,
        viewport: Viewport,
    ) -> Result<()>;

    fn release(&mut self);
}

/**
    GPU resources of a texture mode session.
*/
pub struct TextureInput {
    render: Box<dyn RenderContext>,
    drawer: Box<dyn TextureDrawer>,
    surface: Arc<dyn InputSurface>,
}

impl TextureInput {
    /**
        Acquire a render context, the device's input surface, and a drawer.

        Must be called after the device is configured and before it starts.
        Anything acquired before a failure is released before returning.
    */
    pub fn new(context: &dyn GpuContext, codec: &dyn HardwareCodec) -> Result<Self> {
        let mut render = context.create_render_context()?;

        let surface = match codec.create_input_surface() {
            Ok(surface) => surface,
            Err(e) => {
                render.release();
                return Err(e);
            }
        };

        if let Err(e) = render.create_surface(Arc::clone(&surface)) {
            render.release();
            surface.release();
            return Err(e);
        }

        let drawer = match context.create_drawer() {
            Ok(drawer) => drawer,
            Err(e) => {
                render.release();
                surface.release();
                return Err(e);
            }
        };

        Ok(Self {
            render,
            drawer,
            surface,
        })
    }

    /**
        Draw a texture frame onto the input surface and present it.
    */
    pub fn draw(&mut self, texture: &TextureBuffer, timestamp_ns: i64) -> Result<()> {
        let viewport = Viewport::full(texture.width, texture.height);

        self.render.make_current()?;
        self.render.clear()?;
        match texture.texture_type {
            TextureType::Oes => self.drawer.draw_external(
                texture.texture_id,
                &texture.transform,
                texture.width,
                texture.height,
                viewport,
            )?,
            TextureType::Rgb => self.drawer.draw_rgb(
                texture.texture_id,
                &texture.transform,
                texture.width,
                texture.height,
                viewport,
            )?,
        }
        self.render.swap_buffers(timestamp_ns)
    }

    /**
        Release the drawer, the render context, and the input surface.
    */
    pub fn release(mut self) {
        debug!("releasing texture input resources");
        self.drawer.release();
        self.render.release();
        self.surface.release();
    }
}
