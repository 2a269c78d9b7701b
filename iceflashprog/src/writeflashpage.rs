use crate::command::{flash_page_payload, Operation};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Write up to one page at `address`, which must be page aligned. A short page is padded with
    ///0xff, leaving the rest of the page erased. Empty tuple response.
    pub fn write_flash_page(&self, address: u32, data: &[u8]) -> Result<(), Error> {
        let payload = flash_page_payload(address, data)?;

        self.op_call(Operation::WritePage, &payload).map(|_| ())
    }
}
