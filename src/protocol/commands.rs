//! ASCII control-command payloads and the `Request`/`Response` envelope
//! bodies they travel in.

use crate::buffer::Buffer;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub data: Vec<u8>,
}

impl Response {
    pub fn unpack(data: &mut Buffer, packet_size: usize) -> Result<Self> {
        Ok(Response {
            data: data.read_bytes(packet_size as i64)?.to_vec(),
        })
    }

    pub fn as_i32(&self) -> Option<i32> {
        if self.data.len() == 4 {
            Some(i32::from_le_bytes(self.data[..4].try_into().unwrap()))
        } else {
            None
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        if self.data.len() == 4 {
            Some(f32::from_le_bytes(self.data[..4].try_into().unwrap()))
        } else {
            None
        }
    }
}

/// Joins non-empty tokens with `,`, dropping empty ones — matches the
/// original's filter-then-join `tokenize` helper exactly so optional
/// positional fields (e.g. an empty `node`) vanish instead of leaving a
/// dangling comma.
pub fn tokenize(tokens: &[&str]) -> Vec<u8> {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(",")
        .into_bytes()
}

pub fn cmd_set_property(node: &str, name: &str, value: &str) -> Vec<u8> {
    tokenize(&["SetProperty", node, name, value])
}

pub fn cmd_get_property(node: &str, name: &str) -> Vec<u8> {
    tokenize(&["GetProperty", node, name])
}

pub fn cmd_frame_rate() -> Vec<u8> {
    b"FrameRate".to_vec()
}

pub fn cmd_enable_asset(name: &str) -> Vec<u8> {
    tokenize(&["EnableAsset", name])
}

pub fn cmd_disable_asset(name: &str) -> Vec<u8> {
    tokenize(&["DisableAsset", name])
}

pub fn cmd_subscribe_to_data(kind: &str, name: &str) -> Vec<u8> {
    tokenize(&["SubscribeToData", kind, name])
}

pub fn cmd_subscribe_by_id(kind: &str, id: i32) -> Vec<u8> {
    tokenize(&["SubscribeByID", kind, &id.to_string()])
}

pub fn cmd_subscribe_all() -> Vec<u8> {
    b"SubscribeToData,RigidBody,all".to_vec()
}

pub fn cmd_unsubscribe_by_name(kind: &str, name: &str) -> Vec<u8> {
    tokenize(&[&format!("SubscribeToData,{kind}"), name, "None"])
}

pub fn cmd_unsubscribe_by_id(kind: &str, id: i32) -> Vec<u8> {
    tokenize(&[&format!("SubscribeByID,{kind}"), &id.to_string(), "None"])
}

pub fn cmd_bitstream(major: u8, minor: u8) -> Vec<u8> {
    format!("Bitstream,{major}.{minor}").into_bytes()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tokenize_drops_empty_node() {
        assert_eq!(cmd_set_property("", "Master Rate", "30"), b"SetProperty,Master Rate,30");
    }

    #[test]
    fn tokenize_keeps_node_when_present() {
        assert_eq!(
            cmd_set_property("node1", "Color", "red"),
            b"SetProperty,node1,Color,red"
        );
    }

    #[test]
    fn response_numeric_accessors() {
        let r = Response { data: 30.0f32.to_le_bytes().to_vec() };
        assert_eq!(r.as_f32(), Some(30.0));
        let r = Response { data: 0i32.to_le_bytes().to_vec() };
        assert_eq!(r.as_i32(), Some(0));
    }
}
