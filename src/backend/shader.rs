// Shader module creation
//
// Vulkan consumes SPIR-V as 32-bit words. The bytes come from elsewhere
// (embedded, file, network); this module only validates and uploads them.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words, in either byte order
pub fn decode_spirv(code: &[u8]) -> Result<Vec<u32>> {
    anyhow::ensure!(!code.is_empty(), "Shader code is empty");
    anyhow::ensure!(
        code.len() % 4 == 0,
        "Shader code is not a whole number of 32-bit words ({} bytes)",
        code.len()
    );

    let first = u32::from_ne_bytes([code[0], code[1], code[2], code[3]]);
    anyhow::ensure!(
        first == SPIRV_MAGIC || first == SPIRV_MAGIC.swap_bytes(),
        "Shader code is not SPIR-V (first word {:#010x})",
        first
    );

    ash::util::read_spv(&mut Cursor::new(code)).context("Failed to read SPIR-V words")
}

/// Shader module destroyed on drop, cannot outlive the device it came from
pub struct ShaderModule<'a> {
    device: &'a ash::Device,
    pub module: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    pub fn new(device: &'a ash::Device, code: &[u8]) -> Result<Self> {
        let words = decode_spirv(code)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

        let module = unsafe { device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        log::debug!("Created shader module ({} bytes)", code.len());
        Ok(Self { device, module })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}
