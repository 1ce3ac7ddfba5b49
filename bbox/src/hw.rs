use crate::common::*;

/// The height and width of a box or an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    pub h: T,
    pub w: T,
}

impl<T> HW<T>
where
    T: PartialOrd + Copy,
{
    pub fn long_side(&self) -> T {
        if self.h >= self.w {
            self.h
        } else {
            self.w
        }
    }

    pub fn short_side(&self) -> T {
        if self.h <= self.w {
            self.h
        } else {
            self.w
        }
    }
}
