use crate::cli::app::StageArgs;
use crate::errors::BuildError;
use llvm_tools::{exe, LlvmTools};
use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

const STAGE_NAME: &str = "stage1";
const STAGE_TARGET: &str = "i386-elfboot.json";

/// Builds the boot sector for its bare-metal target, then strips it down to a flat binary.
///
/// Returns the path of the `.bin` file, ready to be written at block 0.
pub fn build_stage(args: &StageArgs) -> Result<PathBuf, BuildError> {
    let cargo = env::var("CARGO").unwrap_or_else(|_| String::from("cargo"));
    let llvm_tools =
        LlvmTools::new().map_err(|_| BuildError::msg("LLVM tools not found (llvm-tools-preview)"))?;
    let objcopy = llvm_tools
        .tool(&exe("llvm-objcopy"))
        .ok_or_else(|| BuildError::msg("llvm-objcopy not found"))?;

    let stage_dir = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../src/elfboot")
        .join(STAGE_NAME);
    let target_dir = env::current_dir()?.join(&args.target_dir).join(STAGE_NAME);

    let mut build = Command::new(cargo);
    build.current_dir(&stage_dir).args([
        "build",
        "--release",
        "-Zbuild-std=core",
        "--target",
        STAGE_TARGET,
    ]);
    build.arg("--target-dir").arg(&target_dir);
    if args.debugcon {
        build.args(["--features", "debugcon"]);
    }

    let build_output = build.output()?;
    if !build_output.status.success() {
        return Err(BuildError(Some(
            String::from_utf8_lossy(&build_output.stderr).to_string(),
        )));
    }

    let release_dir = target_dir
        .join(Path::new(STAGE_TARGET).file_stem().unwrap_or_default())
        .join("release");
    let object_path = release_dir.join(STAGE_NAME);
    let binary_path = release_dir.join(format!("{STAGE_NAME}.bin"));

    let objcopy_status = Command::new(objcopy)
        .arg("-I")
        .arg("elf32-i386")
        .arg("-O")
        .arg("binary")
        .arg(&object_path)
        .arg(&binary_path)
        .status()?;
    if !objcopy_status.success() {
        return Err(BuildError::msg(
            "Failed to convert object file to binary",
        ));
    }

    Ok(binary_path)
}
