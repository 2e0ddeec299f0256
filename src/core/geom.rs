//! X/Y coordinate pairs used for pixel sizes and layer geometry.
//!
//! Serialized as a two-element array (`[x, y]`) to match the script format.

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Coordinate pair. `T` is `i32` for pixel grids, `f64` for scripted geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct XY<T> {
    pub x: T,
    pub y: T,
}

impl<T> XY<T> {
    pub fn new(x: T, y: T) -> Self {
        Self { x, y }
    }

    /// Apply a conversion to both components (e.g. `i32` -> `f64`).
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> XY<U> {
        XY { x: f(self.x), y: f(self.y) }
    }
}

impl XY<i32> {
    pub fn as_f64(self) -> XY<f64> {
        self.map(|v| v as f64)
    }
}

impl<T: Add<Output = T>> Add for XY<T> {
    type Output = XY<T>;
    fn add(self, other: Self) -> Self {
        XY::new(self.x + other.x, self.y + other.y)
    }
}

impl<T: Sub<Output = T>> Sub for XY<T> {
    type Output = XY<T>;
    fn sub(self, other: Self) -> Self {
        XY::new(self.x - other.x, self.y - other.y)
    }
}

impl<T: Neg<Output = T>> Neg for XY<T> {
    type Output = XY<T>;
    fn neg(self) -> Self {
        XY::new(-self.x, -self.y)
    }
}

impl<T: Mul<Output = T> + Copy> Mul<T> for XY<T> {
    type Output = XY<T>;
    fn mul(self, m: T) -> Self {
        XY::new(self.x * m, self.y * m)
    }
}

impl<T: Div<Output = T> + Copy> Div<T> for XY<T> {
    type Output = XY<T>;
    fn div(self, d: T) -> Self {
        XY::new(self.x / d, self.y / d)
    }
}

impl<T: Serialize> Serialize for XY<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.x, &self.y).serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for XY<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (x, y) = <(T, T)>::deserialize(deserializer)?;
        Ok(XY { x, y })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xy_arithmetic() {
        let a = XY::new(2, 3);
        let b = XY::new(10, 20);
        assert_eq!(a + b, XY::new(12, 23));
        assert_eq!(b - a, XY::new(8, 17));
        assert_eq!(-a, XY::new(-2, -3));
        assert_eq!(a * 4, XY::new(8, 12));
        assert_eq!(b / 2, XY::new(5, 10));
    }

    #[test]
    fn test_xy_json_roundtrip() {
        let xy: XY<i32> = serde_json::from_str("[1920, 1080]").unwrap();
        assert_eq!(xy, XY::new(1920, 1080));
        assert_eq!(serde_json::to_string(&xy).unwrap(), "[1920,1080]");
    }
}
