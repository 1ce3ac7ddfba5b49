//! Data augmentation.

mod color_jitter;
mod random_cropper;

pub use color_jitter::*;
pub use random_cropper::*;
