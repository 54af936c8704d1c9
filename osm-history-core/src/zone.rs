//! Rectangular zone restricting which points an import keeps.
//!
//! The zone is the base case of the cascading filter: points outside it are
//! discarded, and paths or relations lose every member that referenced a
//! discarded feature.

use geo::{Coord, Rect};
use thiserror::Error;

/// Scale between decimal degrees and the fixed-point coordinate encoding.
pub const COORDINATE_SCALE: f64 = 10_000_000.0;

/// Errors raised when configuring a [`ZoneBoundary`].
#[derive(Debug, Error, PartialEq)]
pub enum ZoneError {
    /// The corners share an edge, leaving no area to import.
    #[error("zone from {bottom_left:?} to {top_right:?} has zero area")]
    ZeroArea {
        /// Configured bottom-left corner.
        bottom_left: Coord<i32>,
        /// Configured top-right corner.
        top_right: Coord<i32>,
    },
    /// The bottom-left corner lies above or to the right of the top-right one.
    #[error("zone corners are inverted: bottom-left {bottom_left:?} is not below and left of top-right {top_right:?}")]
    Inverted {
        /// Configured bottom-left corner.
        bottom_left: Coord<i32>,
        /// Configured top-right corner.
        top_right: Coord<i32>,
    },
    /// A bound given in degrees is not a finite value within range.
    #[error("{axis} bound {value} lies outside -{limit}..={limit} degrees")]
    OutOfRange {
        /// `longitude` or `latitude`.
        axis: &'static str,
        /// Offending value in degrees.
        value: f64,
        /// Absolute limit for the axis.
        limit: f64,
    },
}

/// Inclusive bounding rectangle in fixed-point degrees.
///
/// # Examples
///
/// ```
/// use geo::Coord;
/// use osm_history_core::ZoneBoundary;
///
/// # fn main() -> Result<(), osm_history_core::ZoneError> {
/// let zone = ZoneBoundary::new(Coord { x: 0, y: 0 }, Coord { x: 10, y: 10 })?;
/// assert!(zone.contains(5, 5));
/// assert!(zone.contains(10, 0));
/// assert!(!zone.contains(20, 20));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneBoundary {
    rect: Rect<i32>,
}

impl ZoneBoundary {
    /// Validate and build a zone from its bottom-left and top-right corners.
    ///
    /// Zero-area and inverted rectangles are configuration errors.
    pub fn new(bottom_left: Coord<i32>, top_right: Coord<i32>) -> Result<Self, ZoneError> {
        if bottom_left.x == top_right.x || bottom_left.y == top_right.y {
            return Err(ZoneError::ZeroArea {
                bottom_left,
                top_right,
            });
        }
        if bottom_left.x > top_right.x || bottom_left.y > top_right.y {
            return Err(ZoneError::Inverted {
                bottom_left,
                top_right,
            });
        }
        Ok(Self {
            rect: Rect::new(bottom_left, top_right),
        })
    }

    /// Build a zone from bounds in decimal degrees.
    ///
    /// Values are rounded to the nearest 10^-7 degree.
    ///
    /// # Examples
    ///
    /// ```
    /// use osm_history_core::ZoneBoundary;
    ///
    /// # fn main() -> Result<(), osm_history_core::ZoneError> {
    /// let monaco = ZoneBoundary::from_degrees(7.407896, 43.724759, 7.441014, 43.752079)?;
    /// assert!(monaco.contains(74_200_000, 437_400_000));
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_degrees(
        min_lon: f64,
        min_lat: f64,
        max_lon: f64,
        max_lat: f64,
    ) -> Result<Self, ZoneError> {
        let bottom_left = Coord {
            x: to_fixed("longitude", min_lon, 180.0)?,
            y: to_fixed("latitude", min_lat, 90.0)?,
        };
        let top_right = Coord {
            x: to_fixed("longitude", max_lon, 180.0)?,
            y: to_fixed("latitude", max_lat, 90.0)?,
        };
        Self::new(bottom_left, top_right)
    }

    /// Report whether a fixed-point coordinate lies inside the zone.
    ///
    /// All four edges are inclusive.
    #[must_use]
    pub fn contains(&self, lon: i32, lat: i32) -> bool {
        let min = self.rect.min();
        let max = self.rect.max();
        (min.x..=max.x).contains(&lon) && (min.y..=max.y).contains(&lat)
    }

    /// Bottom-left corner.
    #[must_use]
    pub fn bottom_left(&self) -> Coord<i32> {
        self.rect.min()
    }

    /// Top-right corner.
    #[must_use]
    pub fn top_right(&self) -> Coord<i32> {
        self.rect.max()
    }
}

#[expect(
    clippy::float_arithmetic,
    clippy::cast_possible_truncation,
    reason = "range-checked degrees scale to at most 1.8e9, which fits in i32"
)]
fn to_fixed(axis: &'static str, value: f64, limit: f64) -> Result<i32, ZoneError> {
    if !value.is_finite() || !(-limit..=limit).contains(&value) {
        return Err(ZoneError::OutOfRange { axis, value, limit });
    }
    Ok((value * COORDINATE_SCALE).round() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn zone() -> ZoneBoundary {
        ZoneBoundary::new(Coord { x: 0, y: 0 }, Coord { x: 10, y: 10 }).expect("valid zone")
    }

    #[rstest]
    #[case(5, 5)]
    #[case(0, 5)] // left edge
    #[case(10, 5)] // right edge
    #[case(5, 0)] // bottom edge
    #[case(5, 10)] // top edge
    #[case(0, 0)]
    #[case(10, 10)]
    fn contains_interior_and_edges(zone: ZoneBoundary, #[case] lon: i32, #[case] lat: i32) {
        assert!(zone.contains(lon, lat), "expected ({lon}, {lat}) inside");
    }

    #[rstest]
    #[case(20, 20)]
    #[case(-1, 5)]
    #[case(11, 5)]
    #[case(5, -1)]
    #[case(5, 11)]
    fn excludes_points_outside(zone: ZoneBoundary, #[case] lon: i32, #[case] lat: i32) {
        assert!(!zone.contains(lon, lat), "expected ({lon}, {lat}) outside");
    }

    #[rstest]
    #[case(Coord { x: 0, y: 0 }, Coord { x: 0, y: 10 })]
    #[case(Coord { x: 0, y: 4 }, Coord { x: 10, y: 4 })]
    #[case(Coord { x: 3, y: 3 }, Coord { x: 3, y: 3 })]
    fn rejects_zero_area(#[case] bottom_left: Coord<i32>, #[case] top_right: Coord<i32>) {
        let err = ZoneBoundary::new(bottom_left, top_right).expect_err("zero area should fail");
        assert!(matches!(err, ZoneError::ZeroArea { .. }), "got {err:?}");
    }

    #[rstest]
    fn rejects_inverted_corners() {
        let err = ZoneBoundary::new(Coord { x: 10, y: 10 }, Coord { x: 0, y: 0 })
            .expect_err("inverted corners should fail");
        assert!(matches!(err, ZoneError::Inverted { .. }), "got {err:?}");
    }

    #[rstest]
    fn converts_degrees_to_fixed_point() {
        let zone = ZoneBoundary::from_degrees(7.407896, 43.724759, 7.441014, 43.752079)
            .expect("valid zone");
        assert_eq!(
            zone.bottom_left(),
            Coord {
                x: 74_078_960,
                y: 437_247_590
            }
        );
        assert_eq!(
            zone.top_right(),
            Coord {
                x: 74_410_140,
                y: 437_520_790
            }
        );
    }

    #[rstest]
    #[case(f64::NAN, 0.0)]
    #[case(181.0, 0.0)]
    #[case(0.0, -90.5)]
    #[case(f64::INFINITY, 0.0)]
    fn rejects_out_of_range_degrees(#[case] min_lon: f64, #[case] min_lat: f64) {
        let err = ZoneBoundary::from_degrees(min_lon, min_lat, 10.0, 10.0)
            .expect_err("out-of-range bound should fail");
        assert!(matches!(err, ZoneError::OutOfRange { .. }), "got {err:?}");
    }
}
