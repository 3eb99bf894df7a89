mod cli;
mod components;
mod errors;

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use anyhow::Context;
use cli::app::{App, Command, ImageArgs, VerifyArgs};
use components::{build::build_stage, image::write_image, verify::dry_run};
use elfboot::io::debugcon::{init_logger, LogSink};
use elfboot::loader::BootOutcome;

fn write_to_disk(args: &ImageArgs) -> anyhow::Result<()> {
    let loader = fs::read(&args.loader)
        .with_context(|| format!("reading loader {}", args.loader.display()))?;
    let kernel = fs::read(&args.kernel)
        .with_context(|| format!("reading kernel {}", args.kernel.display()))?;

    let disk_img = fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .create(true)
        .open(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut writer = BufWriter::new(&disk_img);

    println!("Burn loader and kernel to disk image");
    let blocks = write_image(&mut writer, &loader, &kernel)?;
    println!("Disk image done ! ({} blocks, {})", blocks, args.output.display());

    Ok(())
}

fn verify(args: &VerifyArgs) -> anyhow::Result<()> {
    let image = fs::read(&args.image)
        .with_context(|| format!("reading disk image {}", args.image.display()))?;
    let run = dry_run(&image)?;

    for (index, segment) in run.segments.iter().enumerate() {
        println!(
            "segment {index}: {:?} offset = {:#x} vaddr = {:#010x} memsz = {:#x} flags = {:?}",
            segment.segment_type(),
            segment.offset,
            segment.virt_addr,
            segment.mem_seg_size,
            segment.segment_flags(),
        );
    }
    for warning in &run.warnings {
        println!("warning: {warning}");
    }

    match run.outcome {
        BootOutcome::Handoff(entry) => {
            println!("Image boots, kernel entered at {entry}");
            Ok(())
        }
        BootOutcome::Halted(err) => {
            anyhow::bail!("image refused ({err:?}), diagnostic codes {:x?}", run.diag_codes)
        }
    }
}

fn main() -> anyhow::Result<()> {
    let app: App = argh::from_env();

    if app.verbose {
        init_logger(LogSink::Callback(|s| print!("{s}")));
    }

    match app.command {
        Command::Stage(args) => {
            let binary = build_stage(&args)?;
            println!("Stage done ! ({})", Path::new(&binary).display());
        }
        Command::Image(args) => write_to_disk(&args)?,
        Command::Verify(args) => verify(&args)?,
    }

    Ok(())
}
