//! Clock-sync echo probe/response pair.

use crate::buffer::{Buffer, WriteBuffer};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoRequest {
    pub timestamp: u64,
}

impl EchoRequest {
    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_ulong(self.timestamp);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoResponse {
    pub request_stamp: u64,
    pub received_stamp: u64,
}

impl EchoResponse {
    pub fn unpack(data: &mut Buffer) -> Result<Self> {
        Ok(EchoResponse {
            request_stamp: data.read_ulong()?,
            received_stamp: data.read_ulong()?,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_ulong(self.request_stamp);
        w.write_ulong(self.received_stamp);
    }
}
