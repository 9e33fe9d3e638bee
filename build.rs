// Build script to compile GLSL shaders to SPIR-V
//
// Writes Resources/vert.spv and Resources/frag.spv next to their sources.
// Without glslc the build still succeeds; the program then needs existing
// .spv files or the `shaderc` feature.

use std::path::Path;
use std::process::Command;

const SHADERS: [(&str, &str); 2] = [
    ("Resources/shader.vert", "Resources/vert.spv"),
    ("Resources/shader.frag", "Resources/frag.spv"),
];

fn main() {
    for (input, _) in SHADERS {
        println!("cargo:rerun-if-changed={}", input);
    }

    // Compile shaders using glslc (part of Vulkan SDK)
    for (input, output) in SHADERS {
        if !compile_shader(input, output) {
            break;
        }
    }
}

/// Returns false when glslc is not installed.
fn compile_shader(input: &str, output: &str) -> bool {
    let result = Command::new("glslc")
        .arg("--target-env=vulkan1.1")
        .arg(Path::new(input))
        .arg("-o")
        .arg(Path::new(output))
        .status();

    match result {
        Ok(status) if status.success() => true,
        Ok(status) => {
            panic!("Failed to compile {}: exit code {:?}", input, status.code());
        }
        Err(e) => {
            println!("cargo:warning=glslc not found ({}), shaders were not compiled", e);
            println!("cargo:warning=Install the Vulkan SDK or run: glslc {} -o {}", input, output);
            false
        }
    }
}
