//! `ModelDef` payload: a tagged list of per-asset descriptions.

use crate::buffer::{Buffer, WriteBuffer};
use crate::error::{NatNetError, Result};
use crate::version::VersionContext;

use super::types::{Quaternion, Vector3};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerSetDescription {
    pub name: String,
    pub markers: Vec<String>,
}

impl MarkerSetDescription {
    pub fn unpack(data: &mut Buffer) -> Result<Self> {
        let name = data.read_string(0)?;
        let count = data.read_int()?.max(0) as usize;
        let mut markers = Vec::with_capacity(count);
        for _ in 0..count {
            markers.push(data.read_string(0)?);
        }
        Ok(MarkerSetDescription { name, markers })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_string(&self.name, 0);
        w.write_int(self.markers.len() as i32);
        for m in &self.markers {
            w.write_string(m, 0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RigidBodyMarkerDescription {
    pub name: String,
    pub active_label: i32,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RigidBodyDescription {
    pub name: String,
    pub id: i32,
    pub parent_id: i32,
    pub position: Vector3,
    pub markers: Vec<RigidBodyMarkerDescription>,
}

impl RigidBodyDescription {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let name = if ctx.rigid_body_description_name_present() {
            data.read_string(0)?
        } else {
            String::new()
        };
        let id = data.read_int()?;
        let parent_id = data.read_int()?;
        let position = data.read_vector()?;
        let mut markers = Vec::new();
        if ctx.rigid_body_description_markers_present() {
            let count = data.read_int()?.max(0) as usize;
            let offsets: Vec<Vector3> = (0..count).map(|_| data.read_vector()).collect::<Result<_>>()?;
            let labels: Vec<i32> = (0..count).map(|_| data.read_int()).collect::<Result<_>>()?;
            let names: Vec<String> = if ctx.rigid_body_description_marker_names_present() {
                (0..count).map(|_| data.read_string(0)).collect::<Result<_>>()?
            } else {
                vec![String::new(); count]
            };
            markers = offsets
                .into_iter()
                .zip(labels)
                .zip(names)
                .map(|((position, active_label), name)| RigidBodyMarkerDescription {
                    name,
                    active_label,
                    position,
                })
                .collect();
        }
        Ok(RigidBodyDescription {
            name,
            id,
            parent_id,
            position,
            markers,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        if ctx.rigid_body_description_name_present() {
            w.write_string(&self.name, 0);
        }
        w.write_int(self.id);
        w.write_int(self.parent_id);
        w.write_vector(self.position);
        if ctx.rigid_body_description_markers_present() {
            w.write_int(self.markers.len() as i32);
            for m in &self.markers {
                w.write_vector(m.position);
            }
            for m in &self.markers {
                w.write_int(m.active_label);
            }
            if ctx.rigid_body_description_marker_names_present() {
                for m in &self.markers {
                    w.write_string(&m.name, 0);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SkeletonDescription {
    pub name: String,
    pub id: i32,
    pub rigid_bodies: Vec<RigidBodyDescription>,
}

impl SkeletonDescription {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let name = data.read_string(0)?;
        let id = data.read_int()?;
        let count = data.read_int()?.max(0) as usize;
        let rigid_bodies = (0..count)
            .map(|_| RigidBodyDescription::unpack(data, ctx))
            .collect::<Result<_>>()?;
        Ok(SkeletonDescription { name, id, rigid_bodies })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        w.write_string(&self.name, 0);
        w.write_int(self.id);
        w.write_int(self.rigid_bodies.len() as i32);
        for rb in &self.rigid_bodies {
            rb.pack(w, ctx);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForcePlateDescription {
    pub id: i32,
    pub serial_number: String,
    pub width: f32,
    pub length: f32,
    pub position: Vector3,
    pub cal_matrix: [[f32; 12]; 12],
    pub corners: [[f32; 3]; 4],
    pub plate_type: i32,
    pub channel_data_type: i32,
    pub channels: Vec<String>,
}

impl ForcePlateDescription {
    /// Returns `None` for `major < 3`, matching the wire format which omits
    /// force-plate descriptions entirely pre-3.0.
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Option<Self>> {
        if ctx.major < 3 {
            return Ok(None);
        }
        let id = data.read_int()?;
        let serial_number = data.read_string(0)?;
        let width = data.read_float()?;
        let length = data.read_float()?;
        let position = data.read_vector()?;
        let mut cal_matrix = [[0f32; 12]; 12];
        for row in cal_matrix.iter_mut() {
            *row = data.read_matrix_row()?;
        }
        let corner_values = data.read_matrix_row()?;
        let mut corners = [[0f32; 3]; 4];
        for (i, corner) in corners.iter_mut().enumerate() {
            corner.copy_from_slice(&corner_values[i * 3..i * 3 + 3]);
        }
        let plate_type = data.read_int()?;
        let channel_data_type = data.read_int()?;
        let channel_count = data.read_int()?.max(0) as usize;
        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channels.push(data.read_string(0)?);
        }
        Ok(Some(ForcePlateDescription {
            id,
            serial_number,
            width,
            length,
            position,
            cal_matrix,
            corners,
            plate_type,
            channel_data_type,
            channels,
        }))
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_int(self.id);
        w.write_string(&self.serial_number, 0);
        w.write_float(self.width);
        w.write_float(self.length);
        w.write_vector(self.position);
        for row in &self.cal_matrix {
            w.write_matrix_row(*row);
        }
        let mut corner_row = [0f32; 12];
        for (i, corner) in self.corners.iter().enumerate() {
            corner_row[i * 3..i * 3 + 3].copy_from_slice(corner);
        }
        w.write_matrix_row(corner_row);
        w.write_int(self.plate_type);
        w.write_int(self.channel_data_type);
        w.write_int(self.channels.len() as i32);
        for c in &self.channels {
            w.write_string(c, 0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceDescription {
    pub id: i32,
    pub name: String,
    pub serial_number: String,
    pub device_type: i32,
    pub channel_data_type: i32,
    pub channels: Vec<String>,
}

impl DeviceDescription {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Option<Self>> {
        if ctx.major < 3 {
            return Ok(None);
        }
        let id = data.read_int()?;
        let name = data.read_string(0)?;
        let serial_number = data.read_string(0)?;
        let device_type = data.read_int()?;
        let channel_data_type = data.read_int()?;
        let channel_count = data.read_int()?.max(0) as usize;
        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            channels.push(data.read_string(0)?);
        }
        Ok(Some(DeviceDescription {
            id,
            name,
            serial_number,
            device_type,
            channel_data_type,
            channels,
        }))
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_int(self.id);
        w.write_string(&self.name, 0);
        w.write_string(&self.serial_number, 0);
        w.write_int(self.device_type);
        w.write_int(self.channel_data_type);
        w.write_int(self.channels.len() as i32);
        for c in &self.channels {
            w.write_string(c, 0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraDescription {
    pub name: String,
    pub position: Vector3,
    pub orientation: Quaternion,
}

impl CameraDescription {
    pub fn unpack(data: &mut Buffer) -> Result<Self> {
        Ok(CameraDescription {
            name: data.read_string(0)?,
            position: data.read_vector()?,
            orientation: data.read_quaternion()?,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_string(&self.name, 0);
        w.write_vector(self.position);
        w.write_quaternion(self.orientation);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoCapDescription {
    pub marker_sets: Vec<MarkerSetDescription>,
    pub rigid_bodies: Vec<RigidBodyDescription>,
    pub skeletons: Vec<SkeletonDescription>,
    pub force_plates: Vec<ForcePlateDescription>,
    pub devices: Vec<DeviceDescription>,
    pub cameras: Vec<CameraDescription>,
}

impl MoCapDescription {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let count = data.read_int()?.max(0);
        let mut desc = MoCapDescription::default();
        for _ in 0..count {
            let type_tag = data.read_int()?;
            match type_tag {
                0 => desc.marker_sets.push(MarkerSetDescription::unpack(data)?),
                1 => desc.rigid_bodies.push(RigidBodyDescription::unpack(data, ctx)?),
                2 => desc.skeletons.push(SkeletonDescription::unpack(data, ctx)?),
                3 => {
                    if let Some(fp) = ForcePlateDescription::unpack(data, ctx)? {
                        desc.force_plates.push(fp);
                    }
                }
                4 => {
                    if let Some(d) = DeviceDescription::unpack(data, ctx)? {
                        desc.devices.push(d);
                    }
                }
                5 => desc.cameras.push(CameraDescription::unpack(data)?),
                other => {
                    return Err(NatNetError::malformed(
                        format!("unknown description type tag {other}"),
                        data.remaining(),
                    ))
                }
            }
        }
        Ok(desc)
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        let count = self.marker_sets.len()
            + self.rigid_bodies.len()
            + self.skeletons.len()
            + self.force_plates.len()
            + self.devices.len()
            + self.cameras.len();
        w.write_int(count as i32);
        for m in &self.marker_sets {
            w.write_int(0);
            m.pack(w);
        }
        for r in &self.rigid_bodies {
            w.write_int(1);
            r.pack(w, ctx);
        }
        for s in &self.skeletons {
            w.write_int(2);
            s.pack(w, ctx);
        }
        for f in &self.force_plates {
            w.write_int(3);
            f.pack(w);
        }
        for d in &self.devices {
            w.write_int(4);
            d.pack(w);
        }
        for c in &self.cameras {
            w.write_int(5);
            c.pack(w);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_v3_rigid_body_description() {
        let ctx = VersionContext::new(3, 1);
        let desc = MoCapDescription {
            rigid_bodies: vec![RigidBodyDescription {
                name: "rb0".to_string(),
                id: 0,
                parent_id: -1,
                position: [0.0, 0.0, 0.0],
                markers: vec![RigidBodyMarkerDescription {
                    name: String::new(),
                    active_label: 1,
                    position: [0.1, 0.2, 0.3],
                }],
            }],
            ..Default::default()
        };
        let mut w = WriteBuffer::new();
        desc.pack(&mut w, ctx);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        let decoded = MoCapDescription::unpack(&mut r, ctx).unwrap();
        assert_eq!(decoded, desc);
    }

    #[test]
    fn round_trip_v4_rigid_body_description_has_marker_names() {
        let ctx = VersionContext::new(4, 0);
        let desc = MoCapDescription {
            rigid_bodies: vec![RigidBodyDescription {
                name: "rb1".to_string(),
                id: 1,
                parent_id: -1,
                position: [1.0, 1.0, 1.0],
                markers: vec![RigidBodyMarkerDescription {
                    name: "marker-a".to_string(),
                    active_label: 2,
                    position: [0.0; 3],
                }],
            }],
            ..Default::default()
        };
        let mut w = WriteBuffer::new();
        desc.pack(&mut w, ctx);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        let decoded = MoCapDescription::unpack(&mut r, ctx).unwrap();
        assert_eq!(decoded, desc);
    }
}
