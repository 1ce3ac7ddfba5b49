pub use anyhow::{ensure, Context as _, Error, Result};
pub use bbox::{prelude::*, TLBR};
pub use indexmap::IndexMap;
pub use itertools::Itertools as _;
pub use log::{info, warn};
pub use mmod_dl::{
    dataset::load_image,
    label::Detection,
    model::Detector,
    tensor::TensorExt as _,
};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    env, fmt,
    fs::{self, OpenOptions},
    io::{self, BufRead as _, Write as _},
    path::{Path, PathBuf},
    sync::Arc,
};
pub use tch::{vision, Device, Kind, Tensor};
