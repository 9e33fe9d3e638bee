// Shader module loading
//
// Shaders are read as SPIR-V from the resource directory (`vert.spv`,
// `frag.spv`). With the `shaderc` feature, a missing `.spv` is compiled from
// the matching GLSL source (`shader.vert`, `shader.frag`) at start-up.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::device::VulkanDevice;
use super::lifetime::{DeletionQueue, ResourceKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn spirv_file(self) -> &'static str {
        match self {
            Self::Vertex => "vert.spv",
            Self::Fragment => "frag.spv",
        }
    }

    pub fn source_file(self) -> &'static str {
        match self {
            Self::Vertex => "shader.vert",
            Self::Fragment => "shader.frag",
        }
    }
}

/// Decode SPIR-V bytes into words (byte-swapping big-endian modules).
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).context("Invalid SPIR-V")
}

/// Read a `.spv` file.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read shader {:?}", path))?;
    parse_spirv(&bytes).with_context(|| format!("Failed to load shader {:?}", path))
}

/// SPIR-V for `stage`, from disk or compiled from source.
pub fn load_stage(resource_dir: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
    let spirv_path = resource_dir.join(stage.spirv_file());
    if spirv_path.exists() {
        log::info!("Loading {:?} shader from {:?}", stage, spirv_path);
        return read_spirv(&spirv_path);
    }

    let source_path = resource_dir.join(stage.source_file());
    compile_source(&source_path, stage)
}

#[cfg(feature = "shaderc")]
fn compile_source(path: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shader source {:?}", path))?;
    log::info!("Compiling {:?} shader from {:?}", stage, path);
    compile_glsl(&source, &file_name(path), stage)
}

#[cfg(not(feature = "shaderc"))]
fn compile_source(path: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
    anyhow::bail!(
        "{} is missing and {:?} cannot be compiled without the `shaderc` feature \
         (install glslc and rebuild to precompile it)",
        stage.spirv_file(),
        path
    )
}

/// Compile GLSL to SPIR-V, logging compiler warnings.
#[cfg(feature = "shaderc")]
pub fn compile_glsl(source: &str, file_name: &str, stage: ShaderStage) -> Result<Vec<u32>> {
    let kind = match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
    };

    let compiler = shaderc::Compiler::new().context("Failed to initialise shaderc")?;
    let mut options = shaderc::CompileOptions::new().context("Failed to create shaderc options")?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_1 as u32,
    );

    let artifact = compiler
        .compile_into_spirv(source, kind, file_name, "main", Some(&options))
        .with_context(|| format!("Failed to compile {}", file_name))?;

    if artifact.get_num_warnings() > 0 {
        log::warn!("{}: {}", file_name, artifact.get_warning_messages());
    }

    Ok(artifact.as_binary().to_vec())
}

#[cfg(feature = "shaderc")]
fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Create a shader module and hand it to `teardown`.
pub fn create_shader_module(
    device: &VulkanDevice,
    code: &[u32],
    teardown: &mut DeletionQueue,
) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    let module = unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")?;

    let owner = device.device.clone();
    teardown.push(ResourceKind::ShaderModule, move || unsafe {
        owner.destroy_shader_module(module, None);
    })?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vk-triangle-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn module_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn parses_little_endian_words() {
        let words = parse_spirv(&module_bytes(&[SPIRV_MAGIC, 0x0001_0000, 7])).unwrap();
        assert_eq!(words, vec![SPIRV_MAGIC, 0x0001_0000, 7]);
    }

    #[test]
    fn rejects_truncated_bytecode() {
        let mut bytes = module_bytes(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(parse_spirv(&bytes).is_err());
    }

    #[test]
    fn stage_file_names() {
        assert_eq!(ShaderStage::Vertex.spirv_file(), "vert.spv");
        assert_eq!(ShaderStage::Fragment.spirv_file(), "frag.spv");
        assert_eq!(ShaderStage::Vertex.source_file(), "shader.vert");
        assert_eq!(ShaderStage::Fragment.flags(), vk::ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn precompiled_spirv_is_preferred() {
        let dir = temp_dir("spv");
        std::fs::write(dir.join("vert.spv"), module_bytes(&[SPIRV_MAGIC, 42])).unwrap();

        let words = load_stage(&dir, ShaderStage::Vertex).unwrap();
        let _ = std::fs::remove_dir_all(&dir);

        assert_eq!(words, vec![SPIRV_MAGIC, 42]);
    }

    #[test]
    fn missing_shader_reports_path() {
        let dir = temp_dir("missing");
        let err = load_stage(&dir, ShaderStage::Fragment).unwrap_err();
        let _ = std::fs::remove_dir_all(&dir);

        assert!(format!("{:#}", err).contains("shader.frag"));
    }

    #[cfg(feature = "shaderc")]
    #[test]
    fn compiles_bundled_glsl() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("Resources");
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let source = std::fs::read_to_string(dir.join(stage.source_file())).unwrap();
            let words = compile_glsl(&source, stage.source_file(), stage).unwrap();
            assert_eq!(words[0], SPIRV_MAGIC);
        }
    }
}
