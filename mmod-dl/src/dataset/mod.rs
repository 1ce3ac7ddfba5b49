//! Annotated image datasets.

mod imglab;
mod record;

pub use imglab::*;
pub use record::*;
