use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;
use ash::vk;
use color_eyre::eyre::{eyre, OptionExt, WrapErr};
use color_eyre::Result;
use crate::renderer::core::context::Context;

/// One compiled shader stage: a SPIR-V module plus the entry point to run
pub struct Program {
    pub module: vk::ShaderModule,
    pub stage: vk::ShaderStageFlags,
    entry_point: CString,
    device: Arc<ash::Device>,
}

impl Program {
    pub fn from_spirv(
        ctx: &Context,
        stage: vk::ShaderStageFlags,
        code: &[u8],
        entry_point: &str,
    ) -> Result<Self> {
        let words = ash::util::read_spv(&mut std::io::Cursor::new(code))
            .wrap_err("Shader code is not valid SPIR-V")?;

        let shader_module_info = vk::ShaderModuleCreateInfo::default()
            .code(&words);
        let module = unsafe {
            ctx.device.create_shader_module(&shader_module_info, None)?
        };

        Ok(Self {
            module,
            stage,
            entry_point: CString::new(entry_point)?,
            device: ctx.device.clone(),
        })
    }

    /// Loads `<name>.<stage>.spv` with a `main` entry point, taking the stage from the file name
    pub fn load(ctx: &Context, path: &Path) -> Result<Self> {
        let stage = stage_for_path(path)
            .ok_or_eyre(format!("Cannot tell the shader stage of {:?}", path))?;
        let code = std::fs::read(path)
            .wrap_err_with(|| format!("Failed to read shader {:?}", path))?;
        log::debug!("Loaded {:?} shader from {:?}", stage, path);
        Self::from_spirv(ctx, stage, &code, "main")
    }

    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Program {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Stage encoded in a file name such as `mesh.vert.spv`
pub fn stage_for_path(path: &Path) -> Option<vk::ShaderStageFlags> {
    let name = path.file_name()?.to_str()?;
    let name = name.strip_suffix(".spv").unwrap_or(name);
    let ext = Path::new(name).extension()?.to_str()?;
    match ext {
        "vert" => Some(vk::ShaderStageFlags::VERTEX),
        "frag" => Some(vk::ShaderStageFlags::FRAGMENT),
        "comp" => Some(vk::ShaderStageFlags::COMPUTE),
        "geom" => Some(vk::ShaderStageFlags::GEOMETRY),
        "tesc" => Some(vk::ShaderStageFlags::TESSELLATION_CONTROL),
        "tese" => Some(vk::ShaderStageFlags::TESSELLATION_EVALUATION),
        _ => None,
    }
}

pub(crate) fn expect_stage(program_stage: vk::ShaderStageFlags, wanted: vk::ShaderStageFlags) -> Result<()> {
    if program_stage != wanted {
        return Err(eyre!("Expected a {:?} program but got {:?}", wanted, program_stage));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_comes_from_file_name() {
        assert_eq!(stage_for_path(Path::new("shaders/mesh.vert.spv")), Some(vk::ShaderStageFlags::VERTEX));
        assert_eq!(stage_for_path(Path::new("mesh.frag.spv")), Some(vk::ShaderStageFlags::FRAGMENT));
        assert_eq!(stage_for_path(Path::new("blur.comp")), Some(vk::ShaderStageFlags::COMPUTE));
        assert_eq!(stage_for_path(Path::new("mesh.spv")), None);
        assert_eq!(stage_for_path(Path::new("mesh.txt.spv")), None);
    }

    #[test]
    fn mismatched_stage_is_rejected() {
        assert!(expect_stage(vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::VERTEX).is_ok());
        assert!(expect_stage(vk::ShaderStageFlags::VERTEX, vk::ShaderStageFlags::FRAGMENT).is_err());
    }
}
