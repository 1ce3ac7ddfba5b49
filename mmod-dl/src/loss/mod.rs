//! Max-margin loss, inference and non-maximum suppression.

mod inference;
mod mapping;
mod mmod_loss;
mod nms;

pub use inference::*;
pub use mapping::*;
pub use mmod_loss::*;
pub use nms::*;
