//! The convolutional sliding-window scorer and its persistence.

mod block;
mod detector;
mod network;
mod pyramid;

pub use block::*;
pub use detector::*;
pub use network::*;
pub use pyramid::*;
