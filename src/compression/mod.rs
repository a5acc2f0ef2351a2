pub mod delta;
pub mod vbyte;
