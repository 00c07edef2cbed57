use std::{env, fs, path::PathBuf};

// Cube pass. Matches `mesh::Vertex`:
//   - binding 0, location 0: R32G32B32_SFLOAT (pos)
//   - binding 0, location 1: R32G32B32_SFLOAT (color)
//   - binding 0, location 2: R32G32_SFLOAT    (uv)
const CUBE_VS: &str = r#"
#version 450
layout(set = 0, binding = 0) uniform Mvp {
    mat4 model;
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 2) in vec2 inUv;

layout(location = 0) out vec3 vColor;
layout(location = 1) out vec2 vUv;

void main() {
    vColor = inColor;
    vUv = inUv;
    gl_Position = u.proj * u.view * u.model * vec4(inPos, 1.0);
}
"#;

const CUBE_FS: &str = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D tex;

layout(location = 0) in vec3 vColor;
layout(location = 1) in vec2 vUv;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor * texture(tex, vUv).rgb, 1.0);
}
"#;

// Overlay pass. Positions arrive in NDC, no descriptors.
const OVERLAY_VS: &str = r#"
#version 450
layout(location = 0) in vec2 inPos;
layout(location = 1) in vec3 inColor;
layout(location = 0) out vec3 vColor;

void main() {
    vColor = inColor;
    gl_Position = vec4(inPos, 0.0, 1.0);
}
"#;

const OVERLAY_FS: &str = r#"
#version 450
layout(location = 0) in vec3 vColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(vColor, 1.0);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let stages = [
        ("cube.vert", CUBE_VS, shaderc::ShaderKind::Vertex),
        ("cube.frag", CUBE_FS, shaderc::ShaderKind::Fragment),
        ("overlay.vert", OVERLAY_VS, shaderc::ShaderKind::Vertex),
        ("overlay.frag", OVERLAY_FS, shaderc::ShaderKind::Fragment),
    ];
    for (name, src, kind) in stages {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("write {name}.spv: {e}"));
    }

    // Inline sources live here
    println!("cargo:rerun-if-changed=build.rs");
}
