use crate::command::{encode_address, Operation};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Erase the sector starting at `address`, which must be sector aligned. Empty tuple response.
    pub fn erase_sector(&self, address: u32) -> Result<(), Error> {
        self.op_call(Operation::EraseSector, &encode_address(address))
            .map(|_| ())
    }
}
