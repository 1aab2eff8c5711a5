// Backend module - Vulkan context bring-up
//
// Leaf to root: driver settings, capability queries, instance/surface,
// device selection, swapchain, then the context that owns them all.

pub mod capabilities;
pub mod context;
pub mod device;
pub mod driver;
pub mod instance;
pub mod shader;
pub mod swapchain;

#[cfg(test)]
pub mod testing;

pub use context::{Context, ContextState};
pub use driver::DriverSettings;
