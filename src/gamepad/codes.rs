//! Linux input event codes for an Xbox-style layout.

pub const ABS_X: u16 = 0x00;
pub const ABS_Y: u16 = 0x01;
/// Left trigger.
pub const ABS_Z: u16 = 0x02;
pub const ABS_RX: u16 = 0x03;
pub const ABS_RY: u16 = 0x04;
/// Right trigger.
pub const ABS_RZ: u16 = 0x05;
pub const ABS_HAT0X: u16 = 0x10;
pub const ABS_HAT0Y: u16 = 0x11;

pub const BTN_SOUTH: u16 = 0x130;
pub const BTN_EAST: u16 = 0x131;
pub const BTN_NORTH: u16 = 0x133;
pub const BTN_WEST: u16 = 0x134;
pub const BTN_TL: u16 = 0x136;
pub const BTN_TR: u16 = 0x137;
pub const BTN_SELECT: u16 = 0x13a;
pub const BTN_START: u16 = 0x13b;
pub const BTN_MODE: u16 = 0x13c;

/// Stick axes normalized symmetrically about their midpoint.
pub const STICK_AXES: [u16; 4] = [ABS_X, ABS_Y, ABS_RX, ABS_RY];

pub const TRIGGER_AXES: [u16; 2] = [ABS_Z, ABS_RZ];
