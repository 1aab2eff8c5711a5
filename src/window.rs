// Window provider - the OS window the Vulkan surface is bound to

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::WindowConfig;

/// A single window plus the close flag the run loop watches
pub struct WindowProvider {
    window: Window,
    close_requested: bool,
}

impl WindowProvider {
    /// `None` (after logging the OS error) if the window cannot be created
    pub fn create(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Option<Self> {
        let attributes = WindowAttributes::default()
            .with_title(&config.title)
            .with_inner_size(PhysicalSize::new(config.width, config.height));

        match event_loop.create_window(attributes) {
            Ok(window) => {
                log::info!("Created window '{}' ({}x{})", config.title, config.width, config.height);
                Some(Self {
                    window,
                    close_requested: false,
                })
            }
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                None
            }
        }
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    /// Drawable size in pixels; zero while minimized on some platforms
    pub fn framebuffer_size(&self) -> vk::Extent2D {
        to_extent(self.window.inner_size())
    }

    pub fn should_close(&self) -> bool {
        self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn raw_display_handle(&self) -> RawDisplayHandle {
        self.window.raw_display_handle()
    }

    pub fn raw_window_handle(&self) -> RawWindowHandle {
        self.window.raw_window_handle()
    }
}

pub fn to_extent(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// Nothing can be presented to a zero-sized framebuffer
pub fn is_drawable(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}
