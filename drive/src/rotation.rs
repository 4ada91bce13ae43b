//! Pairwise polar rotation of acceleration vectors.
//!
//! The vehicle frame is not defined by a rotation matrix but by three
//! consecutive 2D rotations, roll about (X, Z), pitch about (Y, Z) and yaw
//! about (X, Y). Changing the order changes the frame.

use crate::data::Axis;
use drive_traits::OrientationAngles;

/// Rotates the `axis_x` and `axis_y` components of `vectors` by `angle`
/// radians, in place.
pub fn rotate(angle: f64, axis_x: Axis, axis_y: Axis, vectors: &mut [f32; 3]) {
    let x = vectors[axis_x.index()] as f64;
    let y = vectors[axis_y.index()] as f64;
    let (sin, cos) = angle.sin_cos();

    vectors[axis_y.index()] = (x * sin + y * cos) as f32;
    vectors[axis_x.index()] = (x * cos - y * sin) as f32;
}

/// Rotates `vectors` into the vehicle frame described by the three angles.
pub fn rotate_all(roll: f64, pitch: f64, yaw: f64, vectors: &mut [f32; 3]) {
    rotate(roll, Axis::X, Axis::Z, vectors);
    rotate(pitch, Axis::Y, Axis::Z, vectors);
    rotate(yaw, Axis::X, Axis::Y, vectors);
}

pub fn rotate_by(angles: &OrientationAngles, vectors: &mut [f32; 3]) {
    rotate_all(angles.roll, angles.pitch, angles.yaw, vectors);
}
