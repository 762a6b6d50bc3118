use color_eyre::Result;
use color_eyre::eyre::OptionExt;
use naga::{
    back::spv,
    valid::{Capabilities, ValidationFlags, Validator},
};
use std::{env, fs, path::Path};

fn main() -> Result<()> {
    println!("cargo:rerun-if-changed=shaders");

    compile_shaders()?;

    Ok(())
}

/// Compiles every `shaders/<name>.<stage>.wgsl` into `shaders-built/<name>.<stage>.spv`
fn compile_shaders() -> Result<()> {
    let cargo_manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let shaders_in_dir = Path::new(&cargo_manifest_dir).join("shaders");
    let shaders_out_dir = Path::new(&cargo_manifest_dir).join("shaders-built");
    fs::create_dir_all(&shaders_out_dir)?;

    for entry in fs::read_dir(shaders_in_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("wgsl") {
            continue;
        }

        // Parse the WGSL file into IR
        let source = fs::read_to_string(&path)?;
        let module = naga::front::wgsl::parse_str(&source)
            .map_err(|e| color_eyre::eyre::eyre!("{}", e.emit_to_string(&source)))?;

        // Validate the IR
        let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
        let validation_info = validator.validate(&module)?;

        // Generate the SPIR-V binary
        let spv_binary = spv::write_vec(&module, &validation_info, &spv::Options::default(), None)?;

        let shader_name = path
            .file_stem()
            .ok_or_eyre("Shader file has no name")?
            .to_str()
            .ok_or_eyre("Shader file name is not valid UTF-8")?;
        let output_filepath = shaders_out_dir.join(format!("{}.spv", shader_name));
        fs::write(output_filepath, bytemuck::cast_slice(&spv_binary))?;
    }

    Ok(())
}
