use crate::command::{Operation, DATA_REQUEST_SIZE};
use crate::{Device, Error, ReportChannel};

impl<C: ReportChannel + 'static> Device<C> {
    ///Turn on the flash chip. Empty tuple response.
    pub fn power_up(&self) -> Result<(), Error> {
        self.op_call(Operation::PowerUp, &[0; DATA_REQUEST_SIZE])
            .map(|_| ())
    }
}
