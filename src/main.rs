// =============================================================================
// LEIMU - Minimal Vulkan application shell
// =============================================================================
//
// Opens one window, brings up a Vulkan context for it and waits on OS events
// until the window is closed.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  App (winit event loop, config hot reload)                      │
// │    └── WindowProvider (OS window, close flag)                   │
// │    └── Context                                                  │
// │          └── Instance + debug channel + surface                 │
// │                └── Physical device → logical device + queues    │
// │                      └── Swapchain + image views                │
// └─────────────────────────────────────────────────────────────────┘
//
// =============================================================================

mod backend;
mod config;
mod window;

use anyhow::Result;
use backend::{Context, ContextState, DriverSettings};
use config::{AppEvent, Config};
use std::path::Path;
use window::WindowProvider;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::WindowId,
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let (config, load_error) = Config::load_or_default(config::CONFIG_PATH);

    init_logging(&config);
    log::info!("Starting {} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", config::CONFIG_PATH, e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!(
        "Window: {}x{} ({}), power saving: {}, validation: {}",
        config.window.width,
        config.window.height,
        config.window.title,
        config.graphics.power_saving,
        config.debug.validation_enabled()
    );

    let event_loop = EventLoop::<AppEvent>::with_user_event().build()?;
    event_loop.set_control_flow(ControlFlow::Wait);

    // Kept alive for the whole run; dropping it stops the watcher
    let _watcher = config::watch(Path::new(config::CONFIG_PATH), event_loop.create_proxy());

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(state) => anyhow::bail!("Vulkan context could not be created: {:?}", state),
        None => Ok(()),
    }
}

/// Initialize logging; `RUST_LOG` overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = config.debug.level_filter();

    let mut builder = Builder::new();
    builder.filter_level(level.unwrap_or(LevelFilter::Info));
    builder.parse_default_env();
    builder.init();

    if level.is_none() {
        log::warn!("Unknown log level '{}', using info", config.debug.log_level);
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Application state between events.
///
/// The context must be gone before the window it presents to; see `Drop`.
struct App {
    config: Config,
    settings: DriverSettings,
    context: Option<Context>,
    window: Option<WindowProvider>,
    /// Set when the context failed; reported as the process result
    failure: Option<ContextState>,
}

impl App {
    fn new(config: Config) -> Self {
        let settings = DriverSettings::new(config.debug.validation_enabled());
        Self {
            config,
            settings,
            context: None,
            window: None,
            failure: None,
        }
    }

    /// Stop the run loop because the context is unusable
    fn fail(&mut self, event_loop: &ActiveEventLoop) {
        self.failure = Some(
            self.context
                .as_ref()
                .map_or(ContextState::Uninitialized, Context::state),
        );
        event_loop.exit();
    }

    fn rebuild_swapchain(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(context), Some(window)) = (self.context.as_mut(), self.window.as_ref()) else {
            return;
        };

        let framebuffer = window.framebuffer_size();
        if !window::is_drawable(framebuffer) {
            log::debug!("Framebuffer is empty, keeping the current swapchain");
            return;
        }
        if !context.needs_rebuild(framebuffer) {
            return;
        }

        if let Err(e) = context.rebuild_swapchain(framebuffer) {
            log::error!("Failed to rebuild swapchain: {:#}", e);
            self.fail(event_loop);
        }
    }

    fn reload_config(&mut self, event_loop: &ActiveEventLoop) {
        let config = match Config::load_from_path(config::CONFIG_PATH) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Ignoring config change: {:#}", e);
                return;
            }
        };

        if config.window != self.config.window || config.debug != self.config.debug {
            log::info!("Window and debug settings take effect on restart");
        }
        let graphics = config.graphics;
        self.config = config;

        let (Some(context), Some(window)) = (self.context.as_mut(), self.window.as_ref()) else {
            return;
        };
        // Stored even while minimized; the swapchain follows on restore
        if let Err(e) = context.reconfigure(graphics, window.framebuffer_size()) {
            log::error!("Failed to apply graphics settings: {:#}", e);
            self.fail(event_loop);
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler<AppEvent> for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let Some(window) = WindowProvider::create(event_loop, &self.config.window) else {
            self.fail(event_loop);
            return;
        };

        let context = Context::new(&window, self.config.graphics, &self.settings);
        let valid = context.is_valid();
        self.window = Some(window);
        self.context = Some(context);

        if !valid {
            log::error!("Failed to initialize Vulkan, shutting down");
            self.fail(event_loop);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if self.window.as_ref().map(WindowProvider::id) != Some(id) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(window) = self.window.as_mut() {
                    window.request_close();
                }
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.rebuild_swapchain(event_loop);
            }

            _ => {}
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::ConfigChanged => {
                log::info!("Config file changed, reloading");
                self.reload_config(event_loop);
            }
        }
    }

    /// Called once the pending events are handled, before blocking again.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.as_ref().is_some_and(WindowProvider::should_close) {
            event_loop.exit();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        // Surface and swapchain reference the window
        self.context = None;
        self.window = None;
        log::info!("Shutdown complete");
    }
}
