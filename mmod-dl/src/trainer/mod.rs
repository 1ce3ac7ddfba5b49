//! Stochastic gradient descent with plateau-driven learning rate decay.

mod lr_scheduler;
mod rate_counter;
mod running_gradient;
mod sync;
mod trainer_;

pub use lr_scheduler::*;
pub use rate_counter::*;
pub use running_gradient::*;
pub use sync::*;
pub use trainer_::*;
