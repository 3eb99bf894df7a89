use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs)]
#[argh(description = "elfboot build helper")]
pub struct App {
    #[argh(switch, short = 'v', description = "display debug messages")]
    pub verbose: bool,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
pub enum Command {
    Stage(StageArgs),
    Image(ImageArgs),
    Verify(VerifyArgs),
}

#[derive(FromArgs)]
#[argh(
    subcommand,
    name = "stage",
    description = "cross-build the boot sector into a flat binary"
)]
pub struct StageArgs {
    #[argh(
        option,
        default = "PathBuf::from(\"target\")",
        description = "directory receiving the build artifacts"
    )]
    pub target_dir: PathBuf,

    #[argh(switch, description = "log the boot sequence to the debug console (port 0xE9)")]
    pub debugcon: bool,
}

#[derive(FromArgs)]
#[argh(
    subcommand,
    name = "image",
    description = "write a disk image: boot sector at block 0, kernel from block 1"
)]
pub struct ImageArgs {
    #[argh(option, short = 'l', description = "flat boot sector binary")]
    pub loader: PathBuf,

    #[argh(option, short = 'k', description = "ELF kernel image")]
    pub kernel: PathBuf,

    #[argh(
        option,
        short = 'o',
        default = "PathBuf::from(\"boot.img\")",
        description = "disk image to create"
    )]
    pub output: PathBuf,
}

#[derive(FromArgs)]
#[argh(
    subcommand,
    name = "verify",
    description = "run the loader against a disk image, without booting it"
)]
pub struct VerifyArgs {
    #[argh(positional, description = "disk image to check")]
    pub image: PathBuf,
}
