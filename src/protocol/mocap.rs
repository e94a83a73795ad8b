//! The `FrameOfData` payload: marker sets, rigid bodies, skeletons, labeled
//! markers, force plates, devices and the frame suffix. Every nested type's
//! `pack`/`unpack` pair branches on the negotiated [`VersionContext`]
//! exactly as laid out in the message-id table's version rules.

use crate::buffer::{Buffer, WriteBuffer};
use crate::error::Result;
use crate::version::VersionContext;

use super::types::{Quaternion, Vector3};

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSet {
    pub model_name: String,
    pub marker_positions: Vec<Vector3>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarkerSetData {
    pub marker_sets: Vec<MarkerSet>,
    pub unlabeled_markers: Vec<Vector3>,
}

impl MarkerSetData {
    pub fn unpack(data: &mut Buffer) -> Result<Self> {
        let marker_set_count = data.read_int()?;
        let mut marker_sets = Vec::with_capacity(marker_set_count.max(0) as usize);
        for _ in 0..marker_set_count {
            let model_name = data.read_string(0)?;
            let marker_count = data.read_int()?;
            let mut marker_positions = Vec::with_capacity(marker_count.max(0) as usize);
            for _ in 0..marker_count {
                marker_positions.push(data.read_vector()?);
            }
            marker_sets.push(MarkerSet {
                model_name,
                marker_positions,
            });
        }
        let unlabeled_count = data.read_int()?;
        let mut unlabeled_markers = Vec::with_capacity(unlabeled_count.max(0) as usize);
        for _ in 0..unlabeled_count {
            unlabeled_markers.push(data.read_vector()?);
        }
        Ok(MarkerSetData {
            marker_sets,
            unlabeled_markers,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer) {
        w.write_int(self.marker_sets.len() as i32);
        for ms in &self.marker_sets {
            w.write_string(&ms.model_name, 0);
            w.write_int(ms.marker_positions.len() as i32);
            for p in &ms.marker_positions {
                w.write_vector(*p);
            }
        }
        w.write_int(self.unlabeled_markers.len() as i32);
        for p in &self.unlabeled_markers {
            w.write_vector(*p);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RigidBodyMarkerData {
    pub position: Vector3,
    pub id: i32,
    pub size: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyData {
    pub id: i32,
    pub position: Vector3,
    pub orientation: Quaternion,
    /// Present only pre-3.0 — post-3.0 marker layout lives in the
    /// description instead.
    pub markers: Vec<RigidBodyMarkerData>,
    pub tracking_valid: bool,
    pub error: f32,
}

impl RigidBodyData {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let id = data.read_int()?;
        let position = data.read_vector()?;
        let orientation = data.read_quaternion()?;
        let mut markers = Vec::new();
        if ctx.rigid_body_markers_section_present() {
            let marker_count = data.read_int()?.max(0) as usize;
            markers = (0..marker_count)
                .map(|_| data.read_vector().map(|position| RigidBodyMarkerData {
                    position,
                    id: 0,
                    size: 0.0,
                }))
                .collect::<Result<_>>()?;
            if ctx.rigid_body_marker_ids_present() {
                for m in markers.iter_mut() {
                    m.id = data.read_int()?;
                }
                for m in markers.iter_mut() {
                    m.size = data.read_float()?;
                }
            }
        }
        let mut error = 0.0;
        if ctx.rigid_body_error_present() {
            error = data.read_float()?;
        }
        let mut tracking_valid = false;
        if ctx.rigid_body_tracking_valid_present() {
            let param = data.read_short()?;
            tracking_valid = (param & 0x01) != 0;
        }
        Ok(RigidBodyData {
            id,
            position,
            orientation,
            markers,
            tracking_valid,
            error,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        w.write_int(self.id);
        w.write_vector(self.position);
        w.write_quaternion(self.orientation);
        if ctx.rigid_body_markers_section_present() {
            w.write_int(self.markers.len() as i32);
            for m in &self.markers {
                w.write_vector(m.position);
            }
            if ctx.rigid_body_marker_ids_present() {
                for m in &self.markers {
                    w.write_int(m.id);
                }
                for m in &self.markers {
                    w.write_float(m.size);
                }
            }
        }
        if ctx.rigid_body_error_present() {
            w.write_float(self.error);
        }
        if ctx.rigid_body_tracking_valid_present() {
            w.write_short(if self.tracking_valid { 0x01 } else { 0 });
        }
    }
}

pub fn unpack_rigid_bodies(data: &mut Buffer, ctx: VersionContext) -> Result<Vec<RigidBodyData>> {
    let count = data.read_int()?.max(0) as usize;
    (0..count).map(|_| RigidBodyData::unpack(data, ctx)).collect()
}

pub fn pack_rigid_bodies(w: &mut WriteBuffer, bodies: &[RigidBodyData], ctx: VersionContext) {
    w.write_int(bodies.len() as i32);
    for rb in bodies {
        rb.pack(w, ctx);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkeletonData {
    pub id: i32,
    pub rigid_bodies: Vec<RigidBodyData>,
}

impl SkeletonData {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let id = data.read_int()?;
        let count = data.read_int()?.max(0) as usize;
        let rigid_bodies = (0..count)
            .map(|_| RigidBodyData::unpack(data, ctx))
            .collect::<Result<_>>()?;
        Ok(SkeletonData { id, rigid_bodies })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        w.write_int(self.id);
        w.write_int(self.rigid_bodies.len() as i32);
        for rb in &self.rigid_bodies {
            rb.pack(w, ctx);
        }
    }
}

pub fn unpack_skeletons(data: &mut Buffer, ctx: VersionContext) -> Result<Vec<SkeletonData>> {
    if !ctx.skeletons_present() {
        return Ok(Vec::new());
    }
    let count = data.read_int()?.max(0) as usize;
    (0..count).map(|_| SkeletonData::unpack(data, ctx)).collect()
}

pub fn pack_skeletons(w: &mut WriteBuffer, skeletons: &[SkeletonData], ctx: VersionContext) {
    if !ctx.skeletons_present() {
        return;
    }
    w.write_int(skeletons.len() as i32);
    for s in skeletons {
        s.pack(w, ctx);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabeledMarkerData {
    pub id: i32,
    pub position: Vector3,
    pub size: f32,
    pub param: u16,
    pub residual: f32,
}

impl LabeledMarkerData {
    /// `(model_id, marker_id)` decomposed from the packed `id`.
    pub fn decoded_id(&self) -> (i32, i32) {
        (self.id >> 16, self.id & 0xffff)
    }

    /// `(occluded, point_cloud_solved, model_solved)`.
    pub fn decoded_param(&self) -> (bool, bool, bool) {
        (
            self.param & 0x01 != 0,
            self.param & 0x02 != 0,
            self.param & 0x04 != 0,
        )
    }
}

pub fn unpack_labeled_markers(data: &mut Buffer, ctx: VersionContext) -> Result<Vec<LabeledMarkerData>> {
    if !ctx.labeled_markers_present() {
        return Ok(Vec::new());
    }
    let count = data.read_int()?.max(0) as usize;
    let mut markers = Vec::with_capacity(count);
    for _ in 0..count {
        let id = data.read_int()?;
        let position = data.read_vector()?;
        let size = data.read_float()?;
        let param = if ctx.labeled_marker_param_present() {
            data.read_ushort()?
        } else {
            0
        };
        let residual = if ctx.labeled_marker_residual_present() {
            data.read_float()?
        } else {
            0.0
        };
        markers.push(LabeledMarkerData {
            id,
            position,
            size,
            param,
            residual,
        });
    }
    Ok(markers)
}

pub fn pack_labeled_markers(w: &mut WriteBuffer, markers: &[LabeledMarkerData], ctx: VersionContext) {
    if !ctx.labeled_markers_present() {
        return;
    }
    w.write_int(markers.len() as i32);
    for m in markers {
        w.write_int(m.id);
        w.write_vector(m.position);
        w.write_float(m.size);
        if ctx.labeled_marker_param_present() {
            w.write_ushort(m.param);
        }
        if ctx.labeled_marker_residual_present() {
            w.write_float(m.residual);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelData {
    pub frames: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForcePlateData {
    pub id: i32,
    pub channels: Vec<ChannelData>,
}

pub fn unpack_force_plates(data: &mut Buffer, ctx: VersionContext) -> Result<Vec<ForcePlateData>> {
    if !ctx.force_plates_present() {
        return Ok(Vec::new());
    }
    let count = data.read_int()?.max(0) as usize;
    let mut plates = Vec::with_capacity(count);
    for _ in 0..count {
        let id = data.read_int()?;
        let channel_count = data.read_int()?.max(0) as usize;
        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            let frame_count = data.read_int()?.max(0) as usize;
            let mut frames = Vec::with_capacity(frame_count);
            for _ in 0..frame_count {
                frames.push(data.read_float()?);
            }
            channels.push(ChannelData { frames });
        }
        plates.push(ForcePlateData { id, channels });
    }
    Ok(plates)
}

pub fn pack_force_plates(w: &mut WriteBuffer, plates: &[ForcePlateData], ctx: VersionContext) {
    if !ctx.force_plates_present() {
        return;
    }
    w.write_int(plates.len() as i32);
    for p in plates {
        w.write_int(p.id);
        w.write_int(p.channels.len() as i32);
        for c in &p.channels {
            w.write_int(c.frames.len() as i32);
            for f in &c.frames {
                w.write_float(*f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceData {
    pub id: i32,
    pub channels: Vec<ChannelData>,
}

pub fn unpack_devices(data: &mut Buffer, ctx: VersionContext) -> Result<Vec<DeviceData>> {
    if !ctx.devices_present() {
        return Ok(Vec::new());
    }
    let count = data.read_int()?.max(0) as usize;
    let mut devices = Vec::with_capacity(count);
    for _ in 0..count {
        let id = data.read_int()?;
        let channel_count = data.read_int()?.max(0) as usize;
        let mut channels = Vec::with_capacity(channel_count);
        for _ in 0..channel_count {
            let frame_count = data.read_int()?.max(0) as usize;
            let mut frames = Vec::with_capacity(frame_count);
            for _ in 0..frame_count {
                frames.push(data.read_float()?);
            }
            channels.push(ChannelData { frames });
        }
        devices.push(DeviceData { id, channels });
    }
    Ok(devices)
}

pub fn pack_devices(w: &mut WriteBuffer, devices: &[DeviceData], ctx: VersionContext) {
    if !ctx.devices_present() {
        return;
    }
    w.write_int(devices.len() as i32);
    for d in devices {
        w.write_int(d.id);
        w.write_int(d.channels.len() as i32);
        for c in &d.channels {
            w.write_int(c.frames.len() as i32);
            for f in &c.frames {
                w.write_float(*f);
            }
        }
    }
}

/// Bit 0 = recording, bit 1 = tracked models changed, bit 2 = editing,
/// bit 3 = bitstream version changed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameSuffixData {
    pub timecode: i32,
    pub timecode_sub: i32,
    pub timestamp: f64,
    pub stamp_camera_mid_exposure: i64,
    pub stamp_data_received: i64,
    pub stamp_transmit: i64,
    pub param: u16,
}

impl FrameSuffixData {
    pub fn is_recording(&self) -> bool {
        self.param & 0x01 != 0
    }

    pub fn tracked_models_changed(&self) -> bool {
        self.param & 0x02 != 0
    }

    pub fn is_editing(&self) -> bool {
        self.param & 0x04 != 0
    }

    pub fn bitstream_version_changed(&self) -> bool {
        self.param & 0x08 != 0
    }

    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let timecode = data.read_int()?;
        let timecode_sub = data.read_int()?;
        let timestamp = if ctx.frame_suffix_timestamp_is_double() {
            data.read_double()?
        } else {
            data.read_float()? as f64
        };
        let (stamp_camera_mid_exposure, stamp_data_received, stamp_transmit) =
            if ctx.frame_suffix_host_ticks_present() {
                (data.read_long()?, data.read_long()?, data.read_long()?)
            } else {
                (-1, -1, -1)
            };
        let param = data.read_ushort()?;
        Ok(FrameSuffixData {
            timecode,
            timecode_sub,
            timestamp,
            stamp_camera_mid_exposure,
            stamp_data_received,
            stamp_transmit,
            param,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        w.write_int(self.timecode);
        w.write_int(self.timecode_sub);
        if ctx.frame_suffix_timestamp_is_double() {
            w.write_double(self.timestamp);
        } else {
            w.write_float(self.timestamp as f32);
        }
        if ctx.frame_suffix_host_ticks_present() {
            w.write_long(self.stamp_camera_mid_exposure);
            w.write_long(self.stamp_data_received);
            w.write_long(self.stamp_transmit);
        }
        w.write_ushort(self.param);
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MoCapData {
    pub frame_number: i32,
    pub marker_sets: Vec<MarkerSet>,
    pub unlabeled_markers: Vec<Vector3>,
    pub rigid_bodies: Vec<RigidBodyData>,
    pub skeletons: Vec<SkeletonData>,
    pub labeled_markers: Vec<LabeledMarkerData>,
    pub force_plates: Vec<ForcePlateData>,
    pub devices: Vec<DeviceData>,
    pub suffix_data: Option<FrameSuffixData>,
}

impl MoCapData {
    pub fn unpack(data: &mut Buffer, ctx: VersionContext) -> Result<Self> {
        let frame_number = data.read_int()?;
        let marker_set_data = MarkerSetData::unpack(data)?;
        let rigid_bodies = unpack_rigid_bodies(data, ctx)?;
        let skeletons = unpack_skeletons(data, ctx)?;
        let labeled_markers = unpack_labeled_markers(data, ctx)?;
        let force_plates = unpack_force_plates(data, ctx)?;
        let devices = unpack_devices(data, ctx)?;
        let suffix_data = Some(FrameSuffixData::unpack(data, ctx)?);
        let _sentinel = data.read_int()?;
        Ok(MoCapData {
            frame_number,
            marker_sets: marker_set_data.marker_sets,
            unlabeled_markers: marker_set_data.unlabeled_markers,
            rigid_bodies,
            skeletons,
            labeled_markers,
            force_plates,
            devices,
            suffix_data,
        })
    }

    pub fn pack(&self, w: &mut WriteBuffer, ctx: VersionContext) {
        w.write_int(self.frame_number);
        let marker_set_data = MarkerSetData {
            marker_sets: self.marker_sets.clone(),
            unlabeled_markers: self.unlabeled_markers.clone(),
        };
        marker_set_data.pack(w);
        pack_rigid_bodies(w, &self.rigid_bodies, ctx);
        pack_skeletons(w, &self.skeletons, ctx);
        pack_labeled_markers(w, &self.labeled_markers, ctx);
        pack_force_plates(w, &self.force_plates, ctx);
        pack_devices(w, &self.devices, ctx);
        if let Some(suffix) = &self.suffix_data {
            suffix.pack(w, ctx);
        } else {
            FrameSuffixData::default().pack(w, ctx);
        }
        w.write_int(0);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(ctx: VersionContext, msg: &MoCapData) -> MoCapData {
        let mut w = WriteBuffer::new();
        msg.pack(&mut w, ctx);
        let bytes = w.into_bytes();
        let mut r = Buffer::new(&bytes);
        MoCapData::unpack(&mut r, ctx).unwrap()
    }

    #[test]
    fn round_trip_v3_rigid_body() {
        let ctx = VersionContext::new(3, 1);
        let msg = MoCapData {
            frame_number: 7,
            rigid_bodies: vec![RigidBodyData {
                id: 0,
                position: [1.0, 2.0, 3.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
                markers: vec![],
                tracking_valid: true,
                error: 1e-4,
            }],
            suffix_data: Some(FrameSuffixData {
                timecode: 1,
                timecode_sub: 2,
                timestamp: 10.5,
                stamp_camera_mid_exposure: 100,
                stamp_data_received: 110,
                stamp_transmit: 120,
                param: 0b0011,
            }),
            ..Default::default()
        };
        let decoded = round_trip(ctx, &msg);
        assert_eq!(decoded, msg);
        assert!(decoded.suffix_data.unwrap().is_recording());
    }

    #[test]
    fn round_trip_v2_2_rigid_body_has_markers_no_tracking_valid() {
        let ctx = VersionContext::new(2, 2);
        let msg = MoCapData {
            frame_number: 1,
            rigid_bodies: vec![RigidBodyData {
                id: 3,
                position: [0.0, 0.0, 0.0],
                orientation: [0.0, 0.0, 0.0, 1.0],
                markers: vec![RigidBodyMarkerData {
                    position: [1.0, 1.0, 1.0],
                    id: 5,
                    size: 0.5,
                }],
                tracking_valid: false,
                error: 0.2,
            }],
            suffix_data: Some(FrameSuffixData {
                timestamp: 1.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let decoded = round_trip(ctx, &msg);
        assert_eq!(decoded, msg);
    }

    #[test]
    fn labeled_marker_id_and_param_decode() {
        let marker = LabeledMarkerData {
            id: (7 << 16) | 42,
            position: [0.0; 3],
            size: 1.0,
            param: 0b101,
            residual: 0.0,
        };
        assert_eq!(marker.decoded_id(), (7, 42));
        assert_eq!(marker.decoded_param(), (true, false, true));
    }
}
