// SPDX-License-Identifier: CEPL-1.0
fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    #[cfg(feature = "shaderc")]
    embed::compile_all();
}

/// Compiles `shaders/*.{vert,frag}` into OUT_DIR so the crate can embed them.
#[cfg(feature = "shaderc")]
mod embed {
    use std::{env, fs, path::PathBuf};

    const SOURCES: [(&str, shaderc::ShaderKind); 4] = [
        ("mesh.vert", shaderc::ShaderKind::Vertex),
        ("mesh.frag", shaderc::ShaderKind::Fragment),
        ("sprite.vert", shaderc::ShaderKind::Vertex),
        ("sprite.frag", shaderc::ShaderKind::Fragment),
    ];

    pub fn compile_all() {
        let out = PathBuf::from(env::var("OUT_DIR").unwrap());
        let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

        let comp = shaderc::Compiler::new().unwrap();
        let mut opts = shaderc::CompileOptions::new().unwrap();
        opts.set_target_env(
            shaderc::TargetEnv::Vulkan,
            shaderc::EnvVersion::Vulkan1_0 as u32,
        );
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        for (file, kind) in SOURCES {
            let path = src_dir.join(file);
            println!("cargo:rerun-if-changed={}", path.display());
            let src = fs::read_to_string(&path).unwrap();
            let spv = comp
                .compile_into_spirv(&src, kind, file, "main", Some(&opts))
                .unwrap_or_else(|e| panic!("{file}: {e}"));
            fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8()).unwrap();
        }
    }
}
