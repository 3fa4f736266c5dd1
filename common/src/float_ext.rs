pub trait FloatExt {
    fn approximately_eq(self, other: Self) -> bool;

    /// Equality within an absolute tolerance; NaN equals NaN.
    fn approx_eq_eps(self, other: Self, eps: Self) -> bool;
}

impl FloatExt for f32 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON as f32
    }

    fn approx_eq_eps(self, other: Self, eps: Self) -> bool {
        (self.is_nan() && other.is_nan()) || (self - other).abs() <= eps
    }
}

impl FloatExt for f64 {
    fn approximately_eq(self, other: Self) -> bool {
        (self - other).abs() < crate::EPSILON
    }

    fn approx_eq_eps(self, other: Self, eps: Self) -> bool {
        (self.is_nan() && other.is_nan()) || (self - other).abs() <= eps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_approximately_eq() {
        assert!(1.0_f32.approximately_eq(1.0));
        assert!((0.1_f32 + 0.2_f32).approximately_eq(0.3));
        assert!(!1.0_f32.approximately_eq(1.001));
    }

    #[test]
    fn f64_eps_comparison() {
        assert!(10.0_f64.approx_eq_eps(10.05, 0.1));
        assert!(!10.0_f64.approx_eq_eps(10.2, 0.1));
    }

    #[test]
    fn nan_handling() {
        // plain comparison never matches NaN, the tolerance variant treats NaN as a value
        assert!(!f64::NAN.approximately_eq(f64::NAN));
        assert!(f64::NAN.approx_eq_eps(f64::NAN, 0.0));
        assert!(!f64::NAN.approx_eq_eps(1.0, 10.0));
    }
}
