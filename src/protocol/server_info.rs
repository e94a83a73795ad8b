//! `ServerInfo`, exchanged on connect. Carries the stream version that
//! subsequently drives every other decoder via [`VersionContext`].

use crate::buffer::{Buffer, WriteBuffer};
use crate::error::Result;
use crate::version::VersionContext;

use super::types::Version;

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub data_port: u16,
    pub multicast: bool,
    pub multicast_address: [u8; 4],
}

impl ConnectionInfo {
    pub fn unpack(data: &mut Buffer) -> Result<Self> {
        let data_port = data.read_ushort()?;
        let multicast = data.read_bool()?;
        let bytes = data.read_bytes(4)?;
        Ok(ConnectionInfo {
            data_port,
            multicast,
            multicast_address: [bytes[0], bytes[1], bytes[2], bytes[3]],
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_ushort(self.data_port);
        w.write_bool(self.multicast);
        w.write_bytes(&self.multicast_address, 4);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub application_name: String,
    pub server_version: Version,
    pub stream_version: Version,
    pub clock_freq: u64,
    pub connection_info: Option<ConnectionInfo>,
}

impl ServerInfo {
    /// Decodes and, as a side effect, updates the process-wide version from
    /// `stream_version` so that every message decoded afterwards uses it.
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let application_name = data.read_string(256)?;
        let server_version = read_version(data)?;
        let stream_version = read_version(data)?;
        let (clock_freq, connection_info) = if ctx.server_info_clock_fields_present() {
            let freq = data.read_ulong()?;
            let info = ConnectionInfo::unpack(data)?;
            (freq, Some(info))
        } else {
            (0, None)
        };
        VersionContext::set_current(stream_version.0, stream_version.1);
        Ok(ServerInfo {
            application_name,
            server_version,
            stream_version,
            clock_freq,
            connection_info,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_string(&self.application_name, 256);
        write_version(w, self.server_version);
        write_version(w, self.stream_version);
        // stream major >= 3 gates the clock trailer symmetrically with unpack
        let ctx = VersionContext::new(self.stream_version.0, self.stream_version.1);
        if ctx.server_info_clock_fields_present() {
            w.write_ulong(self.clock_freq);
            if let Some(info) = &self.connection_info {
                info.pack(w);
            } else {
                ConnectionInfo {
                    data_port: 0,
                    multicast: false,
                    multicast_address: [0; 4],
                }
                .pack(w);
            }
        }
    }
}

fn read_version(data: &mut Buffer) -> Result<Version> {
    Ok((
        data.read_byte()?,
        data.read_byte()?,
        data.read_byte()?,
        data.read_byte()?,
    ))
}

fn write_version(w: &mut WriteBuffer, v: Version) {
    w.write_byte(v.0);
    w.write_byte(v.1);
    w.write_byte(v.2);
    w.write_byte(v.3);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_v3_with_connection_info() {
        let msg = ServerInfo {
            application_name: "mock".to_string(),
            server_version: (3, 1, 0, 0),
            stream_version: (3, 1, 0, 0),
            clock_freq: 1_000_000_000,
            connection_info: Some(ConnectionInfo {
                data_port: 1511,
                multicast: false,
                multicast_address: [239, 255, 42, 99],
            }),
        };
        let mut w = WriteBuffer::new();
        msg.pack(&mut w);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        let decoded = ServerInfo::unpack(&mut r, VersionContext::new(3, 1)).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(VersionContext::current(), VersionContext::new(3, 1));
    }

    #[test]
    fn round_trip_v2_has_no_clock_trailer() {
        let msg = ServerInfo {
            application_name: "legacy".to_string(),
            server_version: (2, 9, 0, 0),
            stream_version: (2, 9, 0, 0),
            clock_freq: 0,
            connection_info: None,
        };
        let mut w = WriteBuffer::new();
        msg.pack(&mut w);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        let decoded = ServerInfo::unpack(&mut r, VersionContext::new(2, 9)).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(r.remaining(), 0);
    }
}
