//! Shared primitive aliases used throughout the message set.

/// `(x, y, z)`, always f32.
pub type Vector3 = [f32; 3];

/// `(x, y, z, w)`, always f32.
pub type Quaternion = [f32; 4];

/// A single row of 12 f32 values, as used by force-plate calibration
/// matrices.
pub type MatrixRow = [f32; 12];

/// Four-component protocol version tuple: `(major, minor, build, revision)`.
pub type Version = (u8, u8, u8, u8);

pub const DEFAULT_VERSION: Version = (3, 0, 0, 0);
