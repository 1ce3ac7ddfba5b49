pub use anyhow::Result;
pub use log::info;
pub use rand::{prelude::*, rngs::StdRng};
pub use serde::{Deserialize, Serialize};
pub use std::{path::Path, sync::Arc};
pub use tch::Device;
