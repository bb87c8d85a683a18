//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Arithmetic mean of the values, or `None` if there are no values.
pub fn mean<T>(values: &[T]) -> Option<T>
where
    T: Float
{
    if values.is_empty() {
        return None;
    }

    let sum = values.iter().fold(T::zero(), |acc, &v| acc + v);

    T::from(values.len()).map(|n| sum / n)
}

/// Convert a cartesian point into polar `(distance, angle)` form, with the angle in radians
/// measured from the positive x axis.
pub fn cart_to_polar<T>(x: T, y: T) -> (T, T)
where
    T: Float
{
    (x.hypot(y), y.atan2(x))
}

/// Rotate a point about the origin by the given angle in degrees.
pub fn rotate_deg<T>(x: T, y: T, angle_deg: T) -> (T, T)
where
    T: Float
{
    let (sin, cos) = angle_deg.to_radians().sin_cos();

    (x * cos - y * sin, x * sin + y * cos)
}

/// Smallest absolute angle between `angle_deg` and level (0 or 360 degrees).
pub fn deg_from_level<T>(angle_deg: T) -> T
where
    T: Float
{
    let full = match T::from(360.0) {
        Some(f) => f,
        None => return angle_deg.abs()
    };

    let wrapped = angle_deg % full;
    let wrapped = if wrapped < T::zero() { wrapped + full } else { wrapped };

    wrapped.min(full - wrapped)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean::<f64>(&[]), None);
        assert_eq!(mean(&[1f64, 2f64, 3f64]), Some(2f64));
    }

    #[test]
    fn test_cart_to_polar() {
        let (d, a) = cart_to_polar(0f64, 2f64);
        assert!((d - 2f64).abs() < 1e-12);
        assert!((a - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_rotate_deg() {
        let (x, y) = rotate_deg(1f64, 0f64, 90f64);
        assert!(x.abs() < 1e-12);
        assert!((y - 1f64).abs() < 1e-12);
    }

    #[test]
    fn test_deg_from_level() {
        assert_eq!(deg_from_level(0.25f64), 0.25f64);
        assert_eq!(deg_from_level(359.75f64), 0.25f64);
        assert_eq!(deg_from_level(-0.5f64), 0.5f64);
        assert_eq!(deg_from_level(180f64), 180f64);
    }
}
