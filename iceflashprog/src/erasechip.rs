use crate::command::{Operation, DATA_REQUEST_SIZE};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Erase the whole flash chip. Empty tuple response.
    pub fn erase_chip(&self) -> Result<(), Error> {
        self.op_call(Operation::EraseChip, &[0; DATA_REQUEST_SIZE])
            .map(|_| ())
    }
}
