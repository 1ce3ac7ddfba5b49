//! The building blocks of the max-margin sliding-window detector.

mod common;
pub mod dataset;
pub mod evaluate;
pub mod label;
pub mod loss;
pub mod model;
pub mod options;
pub mod processor;
pub mod tensor;
pub mod trainer;
