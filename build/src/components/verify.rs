use std::ops::Range;

use elfboot::config::{LoaderConfig, BLOCK_SIZE};
use elfboot::drivers::generics::dev_disk::RamDisk;
use elfboot::io::diag::DiagnosticPort;
use elfboot::loader::elf::{ElfHeader32, ElfProgramHeader32};
use elfboot::loader::{BootOutcome, BootState, ImageLoader};
use elfboot::mem::{MemoryRegion, PhyAddr, SliceMemory};

use crate::errors::BuildError;

/// Where the BIOS puts the boot sector.
const BOOT_SECTOR_ADDR: u64 = 0x7C00;

/// Real-mode interrupt vector table and BIOS data area.
const BIOS_DATA_END: u64 = 0x500;

const PROG_HEADER_SIZE: u64 = std::mem::size_of::<ElfProgramHeader32>() as u64;

/// Keeps the codes instead of writing them to a port.
#[derive(Debug, Default)]
pub struct CapturedPort {
    pub codes: Vec<u16>,
}

impl DiagnosticPort for CapturedPort {
    fn write_code(&mut self, code: u16) {
        self.codes.push(code);
    }
}

/// Result of running the loader against a disk image.
#[derive(Debug)]
pub struct DryRun {
    pub outcome: BootOutcome,
    pub segments: Vec<ElfProgramHeader32>,
    pub diag_codes: Vec<u16>,
    pub warnings: Vec<String>,
    memory: Vec<u8>,
}

impl DryRun {
    /// Memory as the kernel would find it when entered, `None` outside of the simulated range.
    pub fn memory(&self, addr: u32, len: usize) -> Option<&[u8]> {
        let start = addr as usize;
        self.memory.get(start..start.checked_add(len)?)
    }
}

/// Memory range written when loading `segment`, block rounding included.
///
/// Computed with the loader's 32-bit wrapping arithmetic: a rounded-down start that wraps below
/// zero shows up as a span at the top of the address space.
pub fn written_span(segment: &ElfProgramHeader32, config: &LoaderConfig) -> Range<u64> {
    let dst = PhyAddr::masked(segment.virt_addr, config.address_mask).as_u32();
    let block = BLOCK_SIZE as u32;
    let start = dst.wrapping_sub(segment.offset % block);
    let end = dst.wrapping_add(segment.mem_seg_size);

    if start >= end {
        return u64::from(start)..u64::from(start);
    }

    let len = u64::from(end - start).next_multiple_of(u64::from(block));
    u64::from(start)..u64::from(start) + len
}

fn overlaps(a: &Range<u64>, b: &Range<u64>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Runs the loader over `image` with the layout used by the boot sector.
///
/// # Errors
///
/// Fails when the program header table or a segment lies outside of the addressable range,
/// where the boot sector would write to memory that does not exist.
pub fn dry_run(image: &[u8]) -> Result<DryRun, BuildError> {
    let config = LoaderConfig::DEFAULT;
    let addressable = u64::from(config.address_mask) + 1;
    // Whole masked range, plus the block a segment can spill past its end.
    let mut backing = vec![0u8; addressable as usize + BLOCK_SIZE];

    let mut loader = ImageLoader::new(
        RamDisk::new(image),
        SliceMemory::new(PhyAddr::NULL_PTR, &mut backing),
        CapturedPort::default(),
        config,
    );

    let scratch = u64::from(config.scratch.as_u32())
        ..u64::from(config.scratch.as_u32()) + u64::from(config.scratch_size());
    let mut warnings = Vec::new();

    let mut table = 0..0;
    let segments = match loader.step() {
        BootState::Validated(header) => {
            table = table_span(&config, &header);
            if table.end > addressable {
                return Err(BuildError::msg(format!(
                    "program header table lies past the addressable range ({table:#x?})"
                )));
            }
            if table.end > scratch.end {
                warnings.push(format!(
                    "program header table extends past the staged blocks ({table:#x?})"
                ));
            }
            staged_segments(loader.memory(), &config, &header)
        }
        _ => Vec::new(),
    };

    let boot_sector = BOOT_SECTOR_ADDR..BOOT_SECTOR_ADDR + BLOCK_SIZE as u64;
    for (index, segment) in segments.iter().enumerate() {
        let span = written_span(segment, &config);
        if span.end > addressable {
            return Err(BuildError::msg(format!(
                "segment {index} spills past the addressable range ({span:#x?})"
            )));
        }
        let unread = table.start + (index as u64 + 1) * PROG_HEADER_SIZE..table.end;
        if overlaps(&span, &unread) {
            return Err(BuildError::msg(format!(
                "segment {index} overwrites program headers that are not read yet ({span:#x?})"
            )));
        }
        if overlaps(&span, &(0..BIOS_DATA_END)) {
            warnings.push(format!(
                "segment {index} overwrites the interrupt vector table ({span:#x?})"
            ));
        }
        if overlaps(&span, &scratch) {
            warnings.push(format!("segment {index} overwrites the scratch region ({span:#x?})"));
        }
        if overlaps(&span, &boot_sector) {
            warnings.push(format!("segment {index} overwrites the boot sector ({span:#x?})"));
        }
    }

    let outcome = loader.run();
    let diag_codes = loader.diag().codes.clone();
    drop(loader);

    Ok(DryRun {
        outcome,
        segments,
        diag_codes,
        warnings,
        memory: backing,
    })
}

/// Bytes covered by the program header table, once staged.
fn table_span(config: &LoaderConfig, header: &ElfHeader32) -> Range<u64> {
    let start = u64::from(config.scratch.as_u32()) + u64::from(header.prog_header_offset);
    let len = u64::from(header.prog_header_entries_count) * PROG_HEADER_SIZE;

    start..start + len
}

fn staged_segments<M: MemoryRegion>(
    memory: &M,
    config: &LoaderConfig,
    header: &ElfHeader32,
) -> Vec<ElfProgramHeader32> {
    let table = config.scratch + header.prog_header_offset;
    let entry_size = std::mem::size_of::<ElfProgramHeader32>();

    (0..u32::from(header.prog_header_entries_count))
        .map(|index| {
            let addr = table + index * entry_size as u32;
            bytemuck::pod_read_unaligned(memory.window(addr, entry_size))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::image::{tests::kernel_with, write_image};
    use elfboot::config::DIAG_FAILURE_CODES;
    use elfboot::errors::LoadError;

    /// Rewrites the `ELF` header and the first program header of a [`kernel_with`] kernel.
    fn edit_headers(
        kernel: &mut [u8],
        edit: impl FnOnce(&mut ElfHeader32, &mut ElfProgramHeader32),
    ) {
        let mut header: ElfHeader32 = bytemuck::pod_read_unaligned(&kernel[..52]);
        let mut segment: ElfProgramHeader32 = bytemuck::pod_read_unaligned(&kernel[52..84]);
        edit(&mut header, &mut segment);
        kernel[..52].copy_from_slice(bytemuck::bytes_of(&header));
        kernel[52..84].copy_from_slice(bytemuck::bytes_of(&segment));
    }

    fn error_of(image: &[u8]) -> String {
        dry_run(image).unwrap_err().to_string()
    }

    fn image_of(kernel: &[u8]) -> Vec<u8> {
        let mut image = Vec::new();
        write_image(&mut image, &[0xEB, 0xFE], kernel).unwrap();
        image
    }

    #[test]
    fn built_image_loads_its_kernel() {
        let code = [0xFA, 0xF4, 0xEB, 0xFD];
        let image = image_of(&kernel_with(0xC010_0000, 0xC010_0000, &code));

        let run = dry_run(&image).unwrap();

        assert_eq!(run.outcome, BootOutcome::Handoff(PhyAddr::new(0x10_0000)));
        assert_eq!(run.segments.len(), 1);
        assert_eq!(run.memory(0x10_0000, code.len()), Some(&code[..]));
        assert_eq!(run.memory(0x00FF_FFFF, 0x1000), None);
        assert!(run.warnings.is_empty());
        assert!(run.diag_codes.is_empty());
    }

    #[test]
    fn corrupted_image_reports_the_failure_codes() {
        let mut image = image_of(&kernel_with(0x10_0000, 0x10_0000, &[0xF4]));
        image[BLOCK_SIZE] = 0;

        let run = dry_run(&image).unwrap();

        assert_eq!(
            run.outcome,
            BootOutcome::Halted(LoadError::InvalidMagic {
                found: [0, b'E', b'L', b'F']
            })
        );
        assert!(run.segments.is_empty());
        assert_eq!(run.diag_codes, DIAG_FAILURE_CODES);
    }

    #[test]
    fn flags_segments_over_the_scratch_region() {
        let image = image_of(&kernel_with(0x1_0000, 0x1_0000, &[0xF4; 16]));

        let run = dry_run(&image).unwrap();

        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].contains("scratch"));
    }

    #[test]
    fn written_span_is_block_rounded() {
        let segment = ElfProgramHeader32 {
            offset: 0x1040,
            virt_addr: 0x10_0040,
            mem_seg_size: 0x10,
            ..Default::default()
        };
        let span = written_span(&segment, &LoaderConfig::DEFAULT);
        assert_eq!(span, 0x10_0000..0x10_0200);

        let empty = ElfProgramHeader32 {
            virt_addr: 0x10_0000,
            ..Default::default()
        };
        assert!(written_span(&empty, &LoaderConfig::DEFAULT).is_empty());
    }

    #[test]
    fn written_span_follows_a_wrapped_start() {
        let segment = ElfProgramHeader32 {
            offset: 0x100,
            virt_addr: 0,
            mem_seg_size: 0xFFFF_FFF0,
            ..Default::default()
        };
        let span = written_span(&segment, &LoaderConfig::DEFAULT);
        assert_eq!(span, 0xFFFF_FF00..0x1_0000_0100);
    }

    #[test]
    fn wrapped_segment_is_refused() {
        let mut kernel = kernel_with(0x10_0000, 0, &[0xF4]);
        edit_headers(&mut kernel, |_, segment| {
            segment.offset = 0x100;
            segment.mem_seg_size = 0xFFFF_FFF0;
        });

        assert!(error_of(&image_of(&kernel)).contains("segment 0 spills"));
    }

    #[test]
    fn segment_past_the_masked_range_is_refused() {
        let mut kernel = kernel_with(0x10_0000, 0x00FF_FF00, &[0xF4]);
        edit_headers(&mut kernel, |_, segment| segment.mem_seg_size = 0x400);

        assert!(error_of(&image_of(&kernel)).contains("segment 0 spills"));
    }

    #[test]
    fn program_header_table_out_of_range_is_refused() {
        let mut kernel = kernel_with(0x10_0000, 0x10_0000, &[0xF4]);
        edit_headers(&mut kernel, |header, _| header.prog_header_offset = 0x0100_0000);

        assert!(error_of(&image_of(&kernel)).contains("program header table"));
    }

    #[test]
    fn program_header_table_past_the_staged_blocks_is_flagged() {
        let mut kernel = kernel_with(0x10_0000, 0x10_0000, &[0xF4]);
        edit_headers(&mut kernel, |header, _| header.prog_header_offset = 0x2000);

        let run = dry_run(&image_of(&kernel)).unwrap();

        // Unstaged memory reads as zeros: a single empty segment at address 0.
        assert_eq!(run.outcome, BootOutcome::Handoff(PhyAddr::new(0x10_0000)));
        assert!(run.warnings[0].contains("past the staged blocks"));
    }

    #[test]
    fn segment_overwriting_pending_headers_is_refused() {
        let mut kernel = kernel_with(0x10_0000, 0x1_0000, &[0xF4]);
        edit_headers(&mut kernel, |header, _| header.prog_header_entries_count = 2);

        assert!(error_of(&image_of(&kernel)).contains("not read yet"));
    }

    #[test]
    fn flags_segments_over_the_interrupt_vector_table() {
        let image = image_of(&kernel_with(0x10_0000, 0, &[0xF4; 16]));

        let run = dry_run(&image).unwrap();

        assert_eq!(run.outcome, BootOutcome::Handoff(PhyAddr::new(0x10_0000)));
        assert_eq!(run.warnings.len(), 1);
        assert!(run.warnings[0].contains("interrupt vector table"));
    }
}
