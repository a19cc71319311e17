use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, bail};

static CLANG_DEFAULT: &str = "clang";
static INCLUDE_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/include");

/// Given a probe name and the eBPF program source code path, compile it to
/// `OUT_DIR/<name>.bpf.o`. Meant to be called from the `build.rs` of every
/// filter crate.
pub fn build(name: &str, source: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed={source}");
    println!("cargo:rerun-if-changed={INCLUDE_PATH}/common.bpf.h");

    let out_dir = env::var("OUT_DIR").context("OUT_DIR not set")?;
    let out_object = Path::new(&out_dir).join(format!("{name}.bpf.o"));

    compile(source, out_object).with_context(|| format!("Error compiling {source}"))?;

    Ok(())
}

fn compile(probe: &str, out_object: PathBuf) -> anyhow::Result<()> {
    let clang = env::var("CLANG").unwrap_or_else(|_| String::from(CLANG_DEFAULT));
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let include_path = PathBuf::from(INCLUDE_PATH);
    let status = Command::new(clang)
        .arg(format!("-I{}", include_path.to_string_lossy()))
        .arg("-g")
        .arg("-O2")
        .args(["-target", "bpf"])
        .arg("-c")
        .arg("-Werror")
        .arg("-fno-stack-protector")
        .arg(format!(
            "-D__TARGET_ARCH_{}",
            match arch.as_str() {
                "x86_64" => "x86".to_string(),
                "aarch64" => "arm64".to_string(),
                "riscv64" => "riscv".to_string(),
                _ => arch.clone(),
            }
        ))
        .arg(probe)
        .arg("-o")
        .arg(&out_object)
        .status()
        .context("Failed to execute clang")?;

    if !status.success() {
        bail!("Failed to compile eBPF program {probe}");
    }

    Ok(())
}
