use crate::command::{encode_address, Operation};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Read the page starting at `address`, which must be page aligned. Always returns exactly one
    ///page.
    pub fn read_flash_page(&self, address: u32) -> Result<Vec<u8>, Error> {
        self.op_call(Operation::ReadPage, &encode_address(address))
    }
}
