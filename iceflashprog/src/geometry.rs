use crate::command::FLASH_PAGE_SIZE;

///Layout of the flash chip behind the programmer. Only used to chunk addresses, the protocol itself
///knows nothing but pages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlashGeometry {
    pub page_size: u32,
    pub sector_size: u32,
    pub block_size: u32,
    pub total_size: u32,
}

impl FlashGeometry {
    ///16 Mbit SPI NOR, as fitted to the iCE40 boards the programmer targets.
    pub const DEFAULT: FlashGeometry = FlashGeometry {
        page_size: FLASH_PAGE_SIZE as u32,
        sector_size: 0x00_1000,
        block_size: 0x01_0000,
        total_size: 0x20_0000,
    };

    pub fn num_pages(&self) -> u32 {
        self.total_size / self.page_size
    }
}

impl Default for FlashGeometry {
    fn default() -> Self {
        FlashGeometry::DEFAULT
    }
}
