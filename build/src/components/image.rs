use std::io::Write;

use elfboot::config::BLOCK_SIZE;
use elfboot::loader::elf::ElfHeader32;

use crate::errors::BuildError;

/// Boot sector signature, at the end of block 0.
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Room left for code in the boot sector.
pub const BOOT_CODE_SIZE: usize = BLOCK_SIZE - BOOT_SIGNATURE.len();

/// Builds block 0 out of the flat loader binary.
///
/// A binary shorter than [`BOOT_CODE_SIZE`] is zero-padded and signed. A full block is accepted
/// as is if it already carries the signature.
pub fn boot_sector(loader: &[u8]) -> Result<[u8; BLOCK_SIZE], BuildError> {
    let mut sector = [0u8; BLOCK_SIZE];

    match loader.len() {
        len if len <= BOOT_CODE_SIZE => {
            sector[..len].copy_from_slice(loader);
            sector[BOOT_CODE_SIZE..].copy_from_slice(&BOOT_SIGNATURE);
        }
        BLOCK_SIZE if loader[BOOT_CODE_SIZE..] == BOOT_SIGNATURE => {
            sector.copy_from_slice(loader);
        }
        len => {
            return Err(BuildError::msg(format!(
                "loader is {len} bytes long, at most {BOOT_CODE_SIZE} bytes fit in the boot sector"
            )));
        }
    }

    Ok(sector)
}

/// Checks that `kernel` starts with an `ELF` header the boot sector accepts.
pub fn check_kernel(kernel: &[u8]) -> Result<ElfHeader32, BuildError> {
    let raw = kernel
        .get(..std::mem::size_of::<ElfHeader32>())
        .ok_or_else(|| BuildError::msg("kernel is too short to hold an ELF header"))?;
    let header: ElfHeader32 = bytemuck::pod_read_unaligned(raw);

    header
        .validate()
        .map_err(|err| BuildError::msg(format!("kernel is not an ELF image: {err:?}")))?;

    Ok(header)
}

/// Writes the boot sector, then the kernel zero-padded to a whole number of blocks.
///
/// Returns the number of blocks written.
pub fn write_image<W: Write>(out: &mut W, loader: &[u8], kernel: &[u8]) -> Result<usize, BuildError> {
    let sector = boot_sector(loader)?;
    check_kernel(kernel)?;

    out.write_all(&sector)?;
    out.write_all(kernel)?;

    let padding = kernel.len().next_multiple_of(BLOCK_SIZE) - kernel.len();
    out.write_all(&vec![0u8; padding])?;
    out.flush()?;

    Ok(1 + kernel.len().div_ceil(BLOCK_SIZE))
}
