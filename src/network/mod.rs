pub mod capture;
pub mod packet;

pub use capture::{CaptureFile, FrameSource};
