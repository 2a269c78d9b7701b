use crate::command::{Operation, DATA_REQUEST_SIZE};
use crate::{Device, Error, ReportChannel};
use scroll::{ctx, Pread, BE};

impl<C: ReportChannel + 'static> Device<C> {
    ///Read the JEDEC id of the flash chip.
    pub fn jedec_id(&self) -> Result<JedecIdResponse, Error> {
        let data = self.op_call(Operation::JedecId, &[0; DATA_REQUEST_SIZE])?;

        (data.as_slice()).pread_with(0, BE)
    }
}

///Response to the jedec_id command
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct JedecIdResponse {
    pub manufacturer: u8,
    pub device_id: u16,
}

impl<'a> ctx::TryFromCtx<'a, scroll::Endian> for JedecIdResponse {
    type Error = Error;
    fn try_from_ctx(this: &'a [u8], be: scroll::Endian) -> Result<(Self, usize), Self::Error> {
        if this.len() < 3 {
            return Err(Error::Parse(format!("short jedec id: {:?}", this)));
        }

        let mut offset = 0;
        let manufacturer = this.gread_with::<u8>(&mut offset, be)?;
        let device_id = this.gread_with::<u16>(&mut offset, be)?;

        Ok((
            JedecIdResponse {
                manufacturer,
                device_id,
            },
            offset,
        ))
    }
}
