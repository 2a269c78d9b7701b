use crate::command::{Operation, DATA_REQUEST_SIZE};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Turn off the flash chip. The device answers with `Error::Unpowered` once the chip is off, so
    ///that counts as success. Any other error becomes `Error::PowerDownFailed`.
    pub fn power_down(&self) -> Result<(), Error> {
        match self.op_call(Operation::PowerDown, &[0; DATA_REQUEST_SIZE]) {
            Ok(_) | Err(Error::Unpowered) => Ok(()),
            Err(e) => Err(Error::PowerDownFailed(Box::new(e))),
        }
    }
}
