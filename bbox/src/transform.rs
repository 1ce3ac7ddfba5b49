use super::{Rect, TLBR};
use crate::common::*;

/// Axis-aligned scaling followed by translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    /// The transform that maps `src` onto `tgt`.
    pub fn from_rects<R>(src: &R, tgt: &R) -> Self
    where
        R: Rect<Type = T>,
    {
        let sy = tgt.h() / src.h();
        let sx = tgt.w() / src.w();
        let ty = tgt.t() - src.t() * sy;
        let tx = tgt.l() - src.l() * sx;

        Self { sy, sx, ty, tx }
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    type Output = TLBR<T>;

    fn mul(self, rhs: &TLBR<T>) -> Self::Output {
        rhs.transform(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn rect_transform_crop() {
        let crop = TLBR::from_tlhw([10.0, 20.0, 100.0, 200.0]);
        let chip = TLBR::from_tlhw([0.0, 0.0, 50.0, 50.0]);
        let transform = Transform::from_rects(&crop, &chip);

        let object = TLBR::from_tlhw([10.0, 20.0, 50.0, 100.0]);
        let mapped = &transform * &object;
        assert_eq!(mapped.tlbr(), [0.0, 0.0, 25.0, 25.0]);
    }
}
