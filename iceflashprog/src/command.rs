use crate::Error;
use core::convert::TryFrom;
use scroll::Pwrite;

///Size of one flash page, and thus of the payload of a flash page report.
pub const FLASH_PAGE_SIZE: usize = 0x100;

///Request payload of a flash page report: 3 address bytes followed by one full page.
pub const FLASH_PAGE_REQUEST_SIZE: usize = 3 + FLASH_PAGE_SIZE;

///Request payload of a data report before the selector byte is prepended.
pub const DATA_REQUEST_SIZE: usize = 3;

///Data reports are a selector (or status) byte followed by 3 payload bytes, in both directions.
pub const DATA_REPORT_SIZE: usize = 4;

///Value of erased flash, used to pad partial pages.
pub const FLASH_FILL: u8 = 0xff;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReportId {
    FlashPage = 1,
    Data = 2,
}

impl TryFrom<u8> for ReportId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ReportId::FlashPage),
            2 => Ok(ReportId::Data),
            _ => Err(Error::Parse(format!("unknown report id: {}", value))),
        }
    }
}

impl ReportId {
    ///Whether an input report with this id belongs to the protocol at all.
    pub fn is_protocol(id: u8) -> bool {
        ReportId::try_from(id).is_ok()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    PowerUp,
    PowerDown,
    JedecId,
    ReadPage,
    WritePage,
    EraseSector,
    EraseBlock,
    EraseChip,
}

///Firmware protocol generation. Older firmware only knows a subset of the operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Generation {
    //power control, jedec id, page read/write and sector erase
    Legacy,
    //adds block and chip erase
    Current,
}

impl Default for Generation {
    fn default() -> Self {
        Generation::Current
    }
}

struct Entry {
    selector: u8,
    request: ReportId,
    response: ReportId,
    since: Generation,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::PowerUp,
        Operation::PowerDown,
        Operation::JedecId,
        Operation::ReadPage,
        Operation::WritePage,
        Operation::EraseSector,
        Operation::EraseBlock,
        Operation::EraseChip,
    ];

    fn entry(self) -> Entry {
        use Generation::*;
        use ReportId::*;

        let (selector, request, response, since) = match self {
            Operation::PowerUp => (1, Data, Data, Legacy),
            Operation::PowerDown => (2, Data, Data, Legacy),
            Operation::JedecId => (3, Data, Data, Legacy),
            Operation::ReadPage => (4, Data, FlashPage, Legacy),
            // page writes travel in their own report, no selector
            Operation::WritePage => (0, FlashPage, Data, Legacy),
            Operation::EraseSector => (5, Data, Data, Legacy),
            Operation::EraseBlock => (6, Data, Data, Current),
            Operation::EraseChip => (7, Data, Data, Current),
        };

        Entry {
            selector,
            request,
            response,
            since,
        }
    }

    pub fn selector(self) -> u8 {
        self.entry().selector
    }

    pub fn request_report(self) -> ReportId {
        self.entry().request
    }

    pub fn response_report(self) -> ReportId {
        self.entry().response
    }
}

impl Generation {
    pub fn supports(self, op: Operation) -> bool {
        match op.entry().since {
            Generation::Legacy => true,
            Generation::Current => self == Generation::Current,
        }
    }
}

///Status byte leading every data response.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok = 0,
    Unpowered = 1,
    InvalidRequest = 2,
    InvalidCommandId = 3,
    InvalidFlashPageRead = 4,
    InvalidFlashPageWrite = 5,
    Locked = 6,
}

impl TryFrom<u8> for Status {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Ok),
            1 => Ok(Status::Unpowered),
            2 => Ok(Status::InvalidRequest),
            3 => Ok(Status::InvalidCommandId),
            4 => Ok(Status::InvalidFlashPageRead),
            5 => Ok(Status::InvalidFlashPageWrite),
            6 => Ok(Status::Locked),
            _ => Err(Error::UnknownStatus(value)),
        }
    }
}

impl Status {
    pub fn into_result(self) -> Result<(), Error> {
        match self {
            Status::Ok => Ok(()),
            Status::Unpowered => Err(Error::Unpowered),
            Status::InvalidRequest => Err(Error::InvalidRequest),
            Status::InvalidCommandId => Err(Error::InvalidCommandId),
            Status::InvalidFlashPageRead => Err(Error::InvalidPageRead),
            Status::InvalidFlashPageWrite => Err(Error::InvalidPageWrite),
            Status::Locked => Err(Error::Locked),
        }
    }
}

///Builds the output report for `op`. Data reports get the operation selector prepended.
pub fn encode_request(
    generation: Generation,
    op: Operation,
    payload: &[u8],
) -> Result<(ReportId, Vec<u8>), Error> {
    if !generation.supports(op) {
        return Err(Error::InvalidOperation(op, generation));
    }

    let report = op.request_report();
    match report {
        ReportId::FlashPage => {
            if payload.len() != FLASH_PAGE_REQUEST_SIZE {
                return Err(Error::InvalidRequestLength {
                    report,
                    len: payload.len(),
                });
            }
            Ok((report, payload.to_vec()))
        }
        ReportId::Data => {
            if payload.len() != DATA_REQUEST_SIZE {
                return Err(Error::InvalidRequestLength {
                    report,
                    len: payload.len(),
                });
            }

            let mut buffer = vec![0_u8; DATA_REPORT_SIZE];
            let mut offset = 0;

            buffer.gwrite_with(op.selector(), &mut offset, scroll::BE)?;
            buffer.gwrite_with(payload, &mut offset, ())?;

            Ok((report, buffer))
        }
    }
}

///Checks the response to `op` and strips its framing. Returns the page for flash page
///responses, and the 3 bytes after a successful status for data responses.
pub fn decode_response(op: Operation, report_id: u8, data: &[u8]) -> Result<Vec<u8>, Error> {
    let expected = op.response_report();
    if report_id != expected as u8 {
        // a failed page read is answered with a data report carrying the status
        if expected == ReportId::FlashPage
            && report_id == ReportId::Data as u8
            && data.len() == DATA_REPORT_SIZE
        {
            Status::try_from(data[0])?.into_result()?;
        }
        return Err(Error::UnexpectedReportId {
            expected,
            got: report_id,
        });
    }

    match expected {
        ReportId::FlashPage => {
            if data.len() != FLASH_PAGE_SIZE {
                return Err(Error::InvalidResponseLength {
                    report: expected,
                    len: data.len(),
                });
            }
            Ok(data.to_vec())
        }
        ReportId::Data => {
            if data.len() != DATA_REPORT_SIZE {
                return Err(Error::InvalidResponseLength {
                    report: expected,
                    len: data.len(),
                });
            }

            Status::try_from(data[0])?.into_result()?;

            Ok(data[1..].to_vec())
        }
    }
}

///24 bit flash address, most significant byte first. Upper bits are dropped.
pub fn encode_address(address: u32) -> [u8; 3] {
    [(address >> 16) as u8, (address >> 8) as u8, address as u8]
}

pub fn decode_address(bytes: [u8; 3]) -> u32 {
    u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2])
}

///Address followed by `data` padded to a full page with the erased value.
pub fn flash_page_payload(address: u32, data: &[u8]) -> Result<Vec<u8>, Error> {
    if data.len() > FLASH_PAGE_SIZE {
        return Err(Error::PageOverflow(data.len()));
    }

    let mut buffer = Vec::with_capacity(FLASH_PAGE_REQUEST_SIZE);
    buffer.extend_from_slice(&encode_address(address));
    buffer.extend_from_slice(data);
    buffer.resize(FLASH_PAGE_REQUEST_SIZE, FLASH_FILL);

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_table() {
        assert_eq!(Operation::PowerUp.selector(), 1);
        assert_eq!(Operation::EraseChip.selector(), 7);
        assert_eq!(Operation::ReadPage.request_report(), ReportId::Data);
        assert_eq!(Operation::ReadPage.response_report(), ReportId::FlashPage);
        assert_eq!(Operation::WritePage.request_report(), ReportId::FlashPage);
        assert_eq!(Operation::WritePage.response_report(), ReportId::Data);

        for op in Operation::ALL.iter() {
            assert!(Generation::Current.supports(*op));
        }
    }

    #[test]
    fn legacy_rejects_block_and_chip_erase() {
        for op in [Operation::EraseBlock, Operation::EraseChip].iter() {
            assert!(!Generation::Legacy.supports(*op));
            assert!(matches!(
                encode_request(Generation::Legacy, *op, &[0, 0, 0]),
                Err(Error::InvalidOperation(_, Generation::Legacy))
            ));
        }

        assert!(encode_request(Generation::Legacy, Operation::EraseSector, &[0, 0, 0]).is_ok());
    }

    #[test]
    fn encode_data_request() {
        let (report, data) =
            encode_request(Generation::Current, Operation::ReadPage, &[0x01, 0x02, 0x03]).unwrap();

        assert_eq!(report, ReportId::Data);
        assert_eq!(data, vec![0x04, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn encode_rejects_wrong_lengths() {
        for op in Operation::ALL.iter() {
            let good = match op.request_report() {
                ReportId::FlashPage => FLASH_PAGE_REQUEST_SIZE,
                ReportId::Data => DATA_REQUEST_SIZE,
            };

            for len in [0, good - 1, good + 1].iter() {
                let res = encode_request(Generation::Current, *op, &vec![0; *len]);
                match res {
                    Err(Error::InvalidRequestLength { report, len: l }) => {
                        assert_eq!(report, op.request_report());
                        assert_eq!(l, *len);
                    }
                    other => panic!("{:?}: expected length error, got {:?}", op, other),
                }
            }

            assert!(encode_request(Generation::Current, *op, &vec![0; good]).is_ok());
        }
    }

    #[test]
    fn decode_rejects_wrong_lengths() {
        let page = vec![0xaa; FLASH_PAGE_SIZE - 1];
        assert!(matches!(
            decode_response(Operation::ReadPage, 1, &page),
            Err(Error::InvalidResponseLength {
                report: ReportId::FlashPage,
                len: 255
            })
        ));

        assert!(matches!(
            decode_response(Operation::PowerUp, 2, &[0, 0, 0, 0, 0]),
            Err(Error::InvalidResponseLength {
                report: ReportId::Data,
                len: 5
            })
        ));
    }

    #[test]
    fn decode_rejects_unexpected_report() {
        assert!(matches!(
            decode_response(Operation::ReadPage, 2, &[0, 0, 0, 0]),
            Err(Error::UnexpectedReportId {
                expected: ReportId::FlashPage,
                got: 2
            })
        ));
        assert!(matches!(
            decode_response(Operation::PowerUp, 1, &[0; FLASH_PAGE_SIZE]),
            Err(Error::UnexpectedReportId {
                expected: ReportId::Data,
                got: 1
            })
        ));
    }

    #[test]
    fn failed_page_read_carries_status() {
        assert!(matches!(
            decode_response(Operation::ReadPage, 2, &[4, 0, 0, 0]),
            Err(Error::InvalidPageRead)
        ));
        assert!(matches!(
            decode_response(Operation::ReadPage, 2, &[1, 0, 0, 0]),
            Err(Error::Unpowered)
        ));
        assert!(matches!(
            decode_response(Operation::ReadPage, 2, &[9, 0, 0, 0]),
            Err(Error::UnknownStatus(9))
        ));
    }

    #[test]
    fn decode_page() {
        let page: Vec<u8> = (0..FLASH_PAGE_SIZE).map(|i| i as u8).collect();
        assert_eq!(decode_response(Operation::ReadPage, 1, &page).unwrap(), page);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            decode_response(Operation::JedecId, 2, &[0x00, 0xef, 0x40, 0x14]).unwrap(),
            vec![0xef, 0x40, 0x14]
        );

        let errors: Vec<Error> = (1..=6_u8)
            .map(|s| decode_response(Operation::PowerUp, 2, &[s, 0, 0, 0]).unwrap_err())
            .collect();
        assert!(matches!(errors[0], Error::Unpowered));
        assert!(matches!(errors[1], Error::InvalidRequest));
        assert!(matches!(errors[2], Error::InvalidCommandId));
        assert!(matches!(errors[3], Error::InvalidPageRead));
        assert!(matches!(errors[4], Error::InvalidPageWrite));
        assert!(matches!(errors[5], Error::Locked));

        for s in 7..=255_u8 {
            assert!(matches!(
                decode_response(Operation::PowerUp, 2, &[s, 0, 0, 0]),
                Err(Error::UnknownStatus(v)) if v == s
            ));
        }
    }

    #[test]
    fn address_is_big_endian() {
        assert_eq!(encode_address(0x12_3456), [0x12, 0x34, 0x56]);
        assert_eq!(encode_address(0xff12_3456), [0x12, 0x34, 0x56]);
        assert_eq!(decode_address([0x12, 0x34, 0x56]), 0x12_3456);
    }

    #[test]
    fn short_page_is_padded() {
        let payload = flash_page_payload(0x00_0100, &[0x11; 10]).unwrap();

        assert_eq!(payload.len(), FLASH_PAGE_REQUEST_SIZE);
        assert_eq!(&payload[..3], &[0x00, 0x01, 0x00]);
        assert_eq!(&payload[3..13], &[0x11; 10]);
        assert!(payload[13..].iter().all(|b| *b == FLASH_FILL));
        assert_eq!(payload[13..].len(), 246);

        assert!(matches!(
            flash_page_payload(0, &[0; FLASH_PAGE_SIZE + 1]),
            Err(Error::PageOverflow(257))
        ));
    }
}
