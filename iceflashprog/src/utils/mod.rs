use crate::command::{Generation, Operation, FLASH_PAGE_SIZE};
use crate::{Device, Error, FlashGeometry, ReportChannel};
use std::convert::TryFrom;

///Splits `data` into `(address, page)` pairs starting at address 0. The last page may be short.
pub fn flash_pages<'a>(data: &'a [u8]) -> impl Iterator<Item = (u32, &'a [u8])> + 'a {
    data.chunks(FLASH_PAGE_SIZE)
        .enumerate()
        .map(|(i, page)| ((i * FLASH_PAGE_SIZE) as u32, page))
}

fn erase_units(len: usize, size: u32) -> Vec<u32> {
    let size = u64::from(size);
    let len = len as u64;
    let count = len / size + u64::from(len % size != 0);
    (0..count)
        .map_while(|i| u32::try_from(i * size).ok())
        .collect()
}

///Addresses of the sectors covering the first `len` bytes of flash.
pub fn flash_sectors(len: usize, geometry: &FlashGeometry) -> Vec<u32> {
    erase_units(len, geometry.sector_size)
}

///Addresses of the blocks covering the first `len` bytes of flash.
pub fn flash_blocks(len: usize, geometry: &FlashGeometry) -> Vec<u32> {
    erase_units(len, geometry.block_size)
}

///Erase addresses covering the first `len` bytes of flash, in the largest unit `generation` can
///erase, along with the unit size.
pub fn erase_plan(len: usize, geometry: &FlashGeometry, generation: Generation) -> (Vec<u32>, u32) {
    if generation.supports(Operation::EraseBlock) {
        (flash_blocks(len, geometry), geometry.block_size)
    } else {
        (flash_sectors(len, geometry), geometry.sector_size)
    }
}

fn check_fits(data: &[u8], geometry: &FlashGeometry) -> Result<(), Error> {
    if data.len() as u64 > u64::from(geometry.total_size) {
        return Err(Error::ImageTooLarge {
            len: data.len(),
            capacity: geometry.total_size,
        });
    }
    Ok(())
}

/// Erases the flash the image covers unless told not to, then writes it a page at a time. Blocks
/// are erased where the firmware can, sectors otherwise.
/// `progress` is called with the number of bytes each step covered.
pub fn write_bitstream<C, P>(
    d: &Device<C>,
    data: &[u8],
    geometry: &FlashGeometry,
    erase: bool,
    mut progress: P,
) -> Result<(), Error>
where
    C: ReportChannel + 'static,
    P: FnMut(Step, u64),
{
    check_fits(data, geometry)?;

    if erase {
        let generation = d.config().generation;
        let (addresses, size) = erase_plan(data.len(), geometry, generation);
        for address in addresses {
            if generation.supports(Operation::EraseBlock) {
                d.erase_block(address)?;
            } else {
                d.erase_sector(address)?;
            }
            progress(Step::Erase, u64::from(size));
        }
    }

    for (address, page) in flash_pages(data) {
        d.write_flash_page(address, page)?;
        progress(Step::Write, page.len() as u64);
    }

    Ok(())
}

/// Reads back every page the image covers and compares it, stopping at the first page that
/// differs.
pub fn verify_bitstream<C, P>(
    d: &Device<C>,
    data: &[u8],
    geometry: &FlashGeometry,
    mut progress: P,
) -> Result<(), Error>
where
    C: ReportChannel + 'static,
    P: FnMut(u64),
{
    check_fits(data, geometry)?;

    for (address, page) in flash_pages(data) {
        let flash = d.read_flash_page(address)?;

        if let Some(i) = page.iter().zip(flash.iter()).position(|(a, b)| a != b) {
            log::debug!("expected {:02x?}, read {:02x?}", page, &flash[..page.len()]);
            return Err(Error::Mismatch {
                address: address + i as u32,
            });
        }

        progress(page.len() as u64);
    }

    Ok(())
}

/// Reads the whole flash chip.
pub fn read_flash<C, P>(
    d: &Device<C>,
    geometry: &FlashGeometry,
    mut progress: P,
) -> Result<Vec<u8>, Error>
where
    C: ReportChannel + 'static,
    P: FnMut(u64),
{
    let mut data = Vec::with_capacity(geometry.total_size as usize);

    for address in (0..geometry.total_size).step_by(FLASH_PAGE_SIZE) {
        let page = d.read_flash_page(address)?;
        progress(page.len() as u64);
        data.extend_from_slice(&page);
    }

    Ok(data)
}

///Which part of `write_bitstream` a progress report belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Step {
    Erase,
    Write,
}
