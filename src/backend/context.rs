// Vulkan context - owns everything between the window and the first frame
//
// Construction runs a fixed sequence of stages. The first stage that fails
// stops the sequence and leaves the context permanently invalid; whatever was
// acquired before it is still released, newest first, when the context drops.

use anyhow::{Context as _, Result};
use ash::{vk, Entry};
use std::fmt;

use super::capabilities::{find_queue_families, DriverQuery, QueueFamilyIndices};
use super::device::{self, DeviceQueues};
use super::driver::DriverSettings;
use super::instance::{self, DebugChannel, PresentationSurface};
use super::shader::ShaderModule;
use super::swapchain::Swapchain;
use crate::config::GraphicsConfig;
use crate::window::WindowProvider;

/// Construction stages, in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Loader,
    Instance,
    DebugChannel,
    Surface,
    PhysicalDevice,
    QueueFamilies,
    LogicalDevice,
    Queues,
    Swapchain,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Loader => "Vulkan loader",
            Stage::Instance => "instance",
            Stage::DebugChannel => "debug messenger",
            Stage::Surface => "surface",
            Stage::PhysicalDevice => "physical device",
            Stage::QueueFamilies => "queue families",
            Stage::LogicalDevice => "logical device",
            Stage::Queues => "queues",
            Stage::Swapchain => "swapchain",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Uninitialized,
    Initializing,
    Ready,
    /// Stopped at this stage; later stages never ran
    Failed(Stage),
}

/// Stage bookkeeping: current state plus what has been acquired so far
#[derive(Debug)]
pub struct Lifecycle {
    state: ContextState,
    acquired: Vec<Stage>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: ContextState::Uninitialized,
            acquired: Vec::new(),
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ContextState::Ready
    }

    pub fn begin(&mut self) {
        if self.state == ContextState::Uninitialized {
            self.state = ContextState::Initializing;
        }
    }

    /// Run one stage. Skipped (returns `None`) unless initializing; an error
    /// is logged and moves the lifecycle to `Failed(stage)`.
    pub fn run<T>(&mut self, stage: Stage, f: impl FnOnce() -> Result<T>) -> Option<T> {
        if self.state != ContextState::Initializing {
            return None;
        }

        match f() {
            Ok(value) => {
                log::debug!("Stage complete: {}", stage);
                self.acquired.push(stage);
                Some(value)
            }
            Err(e) => {
                log::error!("Failed to create {}: {:#}", stage, e);
                self.state = ContextState::Failed(stage);
                None
            }
        }
    }

    /// `Ready` only if no stage failed
    pub fn finish(&mut self) {
        if self.state == ContextState::Initializing {
            self.state = ContextState::Ready;
        }
    }

    /// Mark a failure that happened after construction (e.g. a rebuild)
    pub fn fail(&mut self, stage: Stage) {
        log::error!("Vulkan context lost its {}", stage);
        self.state = ContextState::Failed(stage);
    }

    /// Acquired stages, newest first. Leaves nothing to release twice.
    pub fn take_teardown_order(&mut self) -> Vec<Stage> {
        let mut stages = std::mem::take(&mut self.acquired);
        stages.reverse();
        stages
    }
}

/// Graphics settings and whether the current swapchain was built with them.
///
/// A settings change while nothing can be presented (minimized window) is
/// kept as stale until the next rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsState {
    current: GraphicsConfig,
    stale: bool,
}

impl GraphicsState {
    pub fn new(current: GraphicsConfig) -> Self {
        Self {
            current,
            stale: false,
        }
    }

    pub fn current(&self) -> GraphicsConfig {
        self.current
    }

    /// Store new settings. Returns `false` if nothing changed.
    pub fn update(&mut self, graphics: GraphicsConfig) -> bool {
        if graphics == self.current {
            return false;
        }
        self.current = graphics;
        self.stale = true;
        true
    }

    /// The swapchain has to be rebuilt for `framebuffer`: it is missing, its
    /// size is off or the settings changed since. Never for an empty framebuffer.
    pub fn needs_rebuild(&self, swapchain_extent: Option<vk::Extent2D>, framebuffer: vk::Extent2D) -> bool {
        let drawable = framebuffer.width > 0 && framebuffer.height > 0;
        drawable && (self.stale || swapchain_extent != Some(framebuffer))
    }

    pub fn mark_built(&mut self) {
        self.stale = false;
    }
}

/// Instance, surface, device, queues and swapchain for one window.
///
/// Always check `is_valid` before using it; a context that failed to build
/// holds only the resources acquired before the failure.
pub struct Context {
    lifecycle: Lifecycle,
    graphics: GraphicsState,

    // Owned, released in reverse order by Drop
    entry: Option<Entry>,
    instance: Option<ash::Instance>,
    debug_channel: Option<DebugChannel>,
    surface: Option<PresentationSurface>,
    device: Option<ash::Device>,
    swapchain: Option<Swapchain>,

    // Not owned: driver handles that are never destroyed by us
    physical_device: Option<vk::PhysicalDevice>,
    queue_families: QueueFamilyIndices,
    queues: Option<DeviceQueues>,
}

impl Context {
    pub fn new(window: &WindowProvider, graphics: GraphicsConfig, settings: &DriverSettings) -> Self {
        log::info!("Initializing Vulkan...");

        let mut context = Self {
            lifecycle: Lifecycle::new(),
            graphics: GraphicsState::new(graphics),
            entry: None,
            instance: None,
            debug_channel: None,
            surface: None,
            device: None,
            swapchain: None,
            physical_device: None,
            queue_families: QueueFamilyIndices::default(),
            queues: None,
        };

        context.lifecycle.begin();
        context.initialize(window, settings);
        context.lifecycle.finish();

        match context.state() {
            ContextState::Ready => context.log_ready(),
            state => log::error!("Vulkan initialization stopped: {:?}", state),
        }

        context
    }

    fn initialize(&mut self, window: &WindowProvider, settings: &DriverSettings) {
        let lifecycle = &mut self.lifecycle;

        let Some(entry) = lifecycle.run(Stage::Loader, || {
            unsafe { Entry::load() }.context("Failed to load Vulkan library. Is Vulkan installed?")
        }) else {
            return;
        };
        let entry = &*self.entry.insert(entry);

        let Some(instance) = lifecycle.run(Stage::Instance, || {
            instance::create_instance(entry, env!("CARGO_PKG_NAME"), window.raw_display_handle(), settings)
        }) else {
            return;
        };
        let instance = &*self.instance.insert(instance);

        if settings.validation {
            let Some(channel) =
                lifecycle.run(Stage::DebugChannel, || DebugChannel::new(entry, instance))
            else {
                return;
            };
            self.debug_channel = Some(channel);
        }

        let Some(surface) = lifecycle.run(Stage::Surface, || {
            PresentationSurface::new(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
            )
        }) else {
            return;
        };
        let surface = &*self.surface.insert(surface);
        let query = DriverQuery::new(instance, &surface.loader, surface.surface);

        let Some(physical_device) = lifecycle.run(Stage::PhysicalDevice, || {
            let devices = unsafe { instance.enumerate_physical_devices() }
                .context("Failed to enumerate physical devices")?;
            device::select_physical_device(&query, &devices, &settings.device_extensions)
                .context("No suitable GPU found")
        }) else {
            return;
        };
        self.physical_device = Some(physical_device);

        let Some(queue_families) = lifecycle.run(Stage::QueueFamilies, || {
            let families = find_queue_families(&query, physical_device);
            anyhow::ensure!(
                families.is_complete(),
                "Selected GPU lacks a graphics or present queue family: {:?}",
                families
            );
            Ok(families)
        }) else {
            return;
        };
        self.queue_families = queue_families;

        let Some(device) = lifecycle.run(Stage::LogicalDevice, || {
            device::create_logical_device(instance, physical_device, &queue_families, settings)
        }) else {
            return;
        };
        let device = &*self.device.insert(device);

        let Some(queues) = lifecycle.run(Stage::Queues, || {
            Ok(DeviceQueues::get(device, &queue_families))
        }) else {
            return;
        };
        self.queues = Some(queues);

        let power_saving = self.graphics.current().power_saving;
        self.swapchain = lifecycle.run(Stage::Swapchain, || {
            let framebuffer = window.framebuffer_size();
            anyhow::ensure!(
                framebuffer.width > 0 && framebuffer.height > 0,
                "Window framebuffer is empty ({}x{})",
                framebuffer.width,
                framebuffer.height
            );
            Swapchain::new(
                &query,
                instance,
                device,
                physical_device,
                surface.surface,
                framebuffer,
                power_saving,
            )
        });
    }

    fn log_ready(&self) {
        if let (Some(swapchain), Some(queues)) = (&self.swapchain, &self.queues) {
            log::info!(
                "Vulkan initialized successfully! {} swapchain images {}x{} ({:?}), queue families {:?}/{:?}, {}",
                swapchain.images.len(),
                swapchain.extent.width,
                swapchain.extent.height,
                swapchain.present_mode,
                self.queue_families.graphics,
                self.queue_families.present,
                if queues.graphics == queues.present {
                    "shared queue"
                } else {
                    "separate queues"
                }
            );
        }
    }

    pub fn state(&self) -> ContextState {
        self.lifecycle.state()
    }

    /// Every stage succeeded; the only check callers should make
    pub fn is_valid(&self) -> bool {
        self.lifecycle.is_ready()
    }

    /// See `GraphicsState::needs_rebuild`
    pub fn needs_rebuild(&self, framebuffer: vk::Extent2D) -> bool {
        self.graphics
            .needs_rebuild(self.swapchain.as_ref().map(|s| s.extent), framebuffer)
    }

    /// Replace the swapchain for a new framebuffer size.
    ///
    /// The old swapchain is destroyed first (a surface has one swapchain at
    /// a time). A failure invalidates the context.
    pub fn rebuild_swapchain(&mut self, framebuffer: vk::Extent2D) -> Result<()> {
        anyhow::ensure!(self.is_valid(), "Vulkan context is not ready");
        anyhow::ensure!(
            framebuffer.width > 0 && framebuffer.height > 0,
            "Cannot build a swapchain for an empty framebuffer"
        );

        let (Some(instance), Some(surface), Some(device), Some(physical_device)) = (
            &self.instance,
            &self.surface,
            &self.device,
            self.physical_device,
        ) else {
            anyhow::bail!("Vulkan context is missing resources");
        };

        unsafe { device.device_wait_idle() }.context("Failed to wait for device idle")?;
        self.swapchain = None;

        let query = DriverQuery::new(instance, &surface.loader, surface.surface);
        match Swapchain::new(
            &query,
            instance,
            device,
            physical_device,
            surface.surface,
            framebuffer,
            self.graphics.current().power_saving,
        ) {
            Ok(swapchain) => {
                self.swapchain = Some(swapchain);
                self.graphics.mark_built();
                Ok(())
            }
            Err(e) => {
                self.lifecycle.fail(Stage::Swapchain);
                Err(e)
            }
        }
    }

    /// Apply new graphics settings, rebuilding the swapchain if they changed.
    ///
    /// With an empty framebuffer the rebuild waits for the next one that
    /// `needs_rebuild` reports.
    pub fn reconfigure(&mut self, graphics: GraphicsConfig, framebuffer: vk::Extent2D) -> Result<()> {
        let previous = self.graphics.current();
        if !self.graphics.update(graphics) {
            return Ok(());
        }

        log::info!(
            "Graphics settings changed (power saving: {} -> {})",
            previous.power_saving,
            graphics.power_saving
        );

        if !self.needs_rebuild(framebuffer) {
            log::info!("Framebuffer is empty, swapchain rebuild deferred");
            return Ok(());
        }
        self.rebuild_swapchain(framebuffer)
    }

    /// Upload SPIR-V bytes as a shader module tied to this context's device.
    /// Entry point for pipeline code; the shell itself draws nothing.
    #[allow(dead_code)]
    pub fn create_shader_module(&self, code: &[u8]) -> Result<ShaderModule<'_>> {
        let device = self.device.as_ref().context("Vulkan device not initialized")?;
        ShaderModule::new(device, code)
    }

    /// Release one stage's resources; no-op if there is nothing to release
    fn release(&mut self, stage: Stage) {
        unsafe {
            match stage {
                Stage::Swapchain => self.swapchain = None,
                Stage::Queues => self.queues = None,
                Stage::LogicalDevice => {
                    if let Some(device) = self.device.take() {
                        device.destroy_device(None);
                    }
                }
                Stage::QueueFamilies => self.queue_families = QueueFamilyIndices::default(),
                Stage::PhysicalDevice => self.physical_device = None,
                Stage::Surface => {
                    if let Some(surface) = self.surface.take() {
                        surface.destroy();
                    }
                }
                Stage::DebugChannel => {
                    if let Some(channel) = self.debug_channel.take() {
                        channel.destroy();
                    }
                }
                Stage::Instance => {
                    if let Some(instance) = self.instance.take() {
                        instance.destroy_instance(None);
                    }
                }
                Stage::Loader => self.entry = None,
            }
        }
        log::debug!("Released {}", stage);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan context...");

        if let Some(device) = &self.device {
            let _ = unsafe { device.device_wait_idle() };
        }

        for stage in self.lifecycle.take_teardown_order() {
            self.release(stage);
        }

        log::info!("Vulkan context destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STAGES: [Stage; 9] = [
        Stage::Loader,
        Stage::Instance,
        Stage::DebugChannel,
        Stage::Surface,
        Stage::PhysicalDevice,
        Stage::QueueFamilies,
        Stage::LogicalDevice,
        Stage::Queues,
        Stage::Swapchain,
    ];

    /// Run every stage, failing at `fail_at`; returns the stages that ran
    fn run_all(lifecycle: &mut Lifecycle, fail_at: Option<Stage>) -> Vec<Stage> {
        let mut ran = Vec::new();
        lifecycle.begin();
        for stage in ALL_STAGES {
            let _ = lifecycle.run(stage, || {
                ran.push(stage);
                if Some(stage) == fail_at {
                    anyhow::bail!("driver said no");
                }
                Ok(())
            });
        }
        lifecycle.finish();
        ran
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    const SAVING: GraphicsConfig = GraphicsConfig { power_saving: true };

    #[test]
    fn unchanged_settings_need_no_rebuild() {
        let mut state = GraphicsState::new(GraphicsConfig::default());
        assert!(!state.update(GraphicsConfig::default()));
        assert!(!state.needs_rebuild(Some(extent(800, 600)), extent(800, 600)));
    }

    #[test]
    fn changed_settings_rebuild_at_same_size() {
        let mut state = GraphicsState::new(GraphicsConfig::default());
        assert!(state.update(SAVING));
        assert!(state.needs_rebuild(Some(extent(800, 600)), extent(800, 600)));

        state.mark_built();
        assert!(!state.needs_rebuild(Some(extent(800, 600)), extent(800, 600)));
        assert_eq!(state.current(), SAVING);
    }

    #[test]
    fn settings_changed_while_minimized_apply_on_restore() {
        let mut state = GraphicsState::new(GraphicsConfig::default());

        // Minimized: the change is stored, nothing can be built yet
        assert!(state.update(SAVING));
        assert!(!state.needs_rebuild(Some(extent(800, 600)), extent(0, 0)));
        assert_eq!(state.current(), SAVING);

        // Restored to the size the old swapchain already has
        assert!(state.needs_rebuild(Some(extent(800, 600)), extent(800, 600)));
        assert!(state.current().power_saving);
    }

    #[test]
    fn resize_or_missing_swapchain_needs_rebuild() {
        let state = GraphicsState::new(GraphicsConfig::default());
        assert!(state.needs_rebuild(Some(extent(800, 600)), extent(1024, 768)));
        assert!(state.needs_rebuild(None, extent(800, 600)));
        assert!(!state.needs_rebuild(None, extent(1024, 0)));
    }

    #[test]
    fn starts_uninitialized() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), ContextState::Uninitialized);
        assert!(!lifecycle.is_ready());
    }

    #[test]
    fn stages_do_not_run_before_begin() {
        let mut lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.run(Stage::Loader, || Ok(1)), None);
        assert!(lifecycle.take_teardown_order().is_empty());
    }

    #[test]
    fn all_stages_succeeding_is_ready() {
        let mut lifecycle = Lifecycle::new();
        let ran = run_all(&mut lifecycle, None);

        assert_eq!(ran, ALL_STAGES.to_vec());
        assert_eq!(lifecycle.state(), ContextState::Ready);
        assert!(lifecycle.is_ready());
    }

    #[test]
    fn failure_skips_every_later_stage() {
        for (i, &failing) in ALL_STAGES.iter().enumerate() {
            let mut lifecycle = Lifecycle::new();
            let ran = run_all(&mut lifecycle, Some(failing));

            assert_eq!(ran, ALL_STAGES[..=i].to_vec(), "failing at {failing}");
            assert_eq!(lifecycle.state(), ContextState::Failed(failing));
            assert!(!lifecycle.is_ready());
        }
    }

    #[test]
    fn teardown_is_reverse_of_acquisition() {
        let mut lifecycle = Lifecycle::new();
        run_all(&mut lifecycle, None);

        let mut expected = ALL_STAGES.to_vec();
        expected.reverse();
        assert_eq!(lifecycle.take_teardown_order(), expected);
    }

    #[test]
    fn teardown_after_failure_skips_unacquired_stages() {
        let mut lifecycle = Lifecycle::new();
        run_all(&mut lifecycle, Some(Stage::LogicalDevice));

        assert_eq!(
            lifecycle.take_teardown_order(),
            vec![
                Stage::QueueFamilies,
                Stage::PhysicalDevice,
                Stage::Surface,
                Stage::DebugChannel,
                Stage::Instance,
                Stage::Loader,
            ]
        );
    }

    #[test]
    fn teardown_happens_once() {
        let mut lifecycle = Lifecycle::new();
        run_all(&mut lifecycle, None);

        assert_eq!(lifecycle.take_teardown_order().len(), ALL_STAGES.len());
        assert!(lifecycle.take_teardown_order().is_empty());
    }

    #[test]
    fn late_failure_invalidates_ready_lifecycle() {
        let mut lifecycle = Lifecycle::new();
        run_all(&mut lifecycle, None);

        lifecycle.fail(Stage::Swapchain);
        assert_eq!(lifecycle.state(), ContextState::Failed(Stage::Swapchain));
        assert!(!lifecycle.is_ready());
        // Still owns everything it acquired
        assert_eq!(lifecycle.take_teardown_order().len(), ALL_STAGES.len());
    }

    #[test]
    fn finish_does_not_revive_failed_lifecycle() {
        let mut lifecycle = Lifecycle::new();
        run_all(&mut lifecycle, Some(Stage::Instance));
        lifecycle.finish();
        lifecycle.begin();

        assert_eq!(lifecycle.state(), ContextState::Failed(Stage::Instance));
        assert_eq!(lifecycle.run(Stage::Surface, || Ok(())), None);
    }
}
