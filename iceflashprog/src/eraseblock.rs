use crate::command::{encode_address, Operation};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Erase the block starting at `address`, which must be block aligned. Empty tuple response.
    pub fn erase_block(&self, address: u32) -> Result<(), Error> {
        self.op_call(Operation::EraseBlock, &encode_address(address))
            .map(|_| ())
    }
}
