//! Spatial regions for masking and extraction.
//!
//! A [`Region`] is a circle, rectangle or ellipse given either in pixels or
//! in world units of the spatial [`Wcs`]. Regions are evaluated only within
//! their bounding box on the pixel grid.

use std::ops::Range;

use ndarray::Array2;

use crate::coords::Wcs;
use crate::error::{DataError, Result};

/// Units of a region's centre and sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegionUnits {
    /// Centre is a fractional 0-based (y, x) pixel, sizes are in pixels
    #[default]
    Pixel,
    /// Centre is a world (y, x) position, sizes are in world units
    /// (degrees for sky coordinates)
    World,
}

/// Geometry of a region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionShape {
    /// Circle of the given radius
    Circle {
        /// Radius
        radius: f64,
    },
    /// Rectangle with the given half sizes
    Rectangle {
        /// Half size along y
        half_y: f64,
        /// Half size along x
        half_x: f64,
    },
    /// Ellipse with the given semi-axes
    Ellipse {
        /// Semi-axis along x before rotation
        semi_x: f64,
        /// Semi-axis along y before rotation
        semi_y: f64,
    },
}

/// A spatial region.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Centre (y, x)
    pub center: (f64, f64),
    /// Geometry
    pub shape: RegionShape,
    /// Rotation in degrees, counter-clockwise from the x axis
    pub posangle: f64,
    /// Units of `center` and of the sizes in `shape`
    pub units: RegionUnits,
}

/// Convert arcseconds to degrees.
pub fn arcsec(value: f64) -> f64 {
    value / 3600.0
}

impl Region {
    /// Circle in pixel units.
    pub fn circle(center: (f64, f64), radius: f64) -> Self {
        Self {
            center,
            shape: RegionShape::Circle { radius },
            posangle: 0.0,
            units: RegionUnits::Pixel,
        }
    }

    /// Rectangle in pixel units.
    pub fn rectangle(center: (f64, f64), half_y: f64, half_x: f64) -> Self {
        Self {
            center,
            shape: RegionShape::Rectangle { half_y, half_x },
            posangle: 0.0,
            units: RegionUnits::Pixel,
        }
    }

    /// Ellipse in pixel units.
    pub fn ellipse(center: (f64, f64), semi_x: f64, semi_y: f64, posangle: f64) -> Self {
        Self {
            center,
            shape: RegionShape::Ellipse { semi_x, semi_y },
            posangle,
            units: RegionUnits::Pixel,
        }
    }

    /// Interpret centre and sizes in world units.
    pub fn in_world(mut self) -> Self {
        self.units = RegionUnits::World;
        self
    }

    /// Rotate the region.
    pub fn with_posangle(mut self, posangle: f64) -> Self {
        self.posangle = posangle;
        self
    }

    /// The same region expressed in pixels.
    pub fn to_pixels(&self, wcs: Option<&Wcs>) -> Result<Region> {
        if self.units == RegionUnits::Pixel {
            return Ok(*self);
        }
        let wcs = wcs.ok_or(DataError::MissingCoordinates {
            operation: "region in world units",
            which: "spatial",
        })?;
        let center = wcs.sky2pix(self.center.0, self.center.1);
        let [sy, sx] = wcs.get_step();
        let shape = match self.shape {
            RegionShape::Circle { radius } => {
                if (sy - sx).abs() > 1e-6 * sy.max(sx) {
                    // Non-square pixels turn a world circle into a pixel ellipse
                    RegionShape::Ellipse {
                        semi_x: radius / sx,
                        semi_y: radius / sy,
                    }
                } else {
                    RegionShape::Circle { radius: radius / sy }
                }
            }
            RegionShape::Rectangle { half_y, half_x } => RegionShape::Rectangle {
                half_y: half_y / sy,
                half_x: half_x / sx,
            },
            RegionShape::Ellipse { semi_x, semi_y } => RegionShape::Ellipse {
                semi_x: semi_x / sx,
                semi_y: semi_y / sy,
            },
        };
        Ok(Region {
            center,
            shape,
            posangle: self.posangle,
            units: RegionUnits::Pixel,
        })
    }

    /// Half extents (y, x) of the pixel bounding box.
    fn half_extent(&self) -> (f64, f64) {
        match self.shape {
            RegionShape::Circle { radius } => (radius, radius),
            RegionShape::Rectangle { half_y, half_x } => {
                if self.posangle == 0.0 {
                    (half_y, half_x)
                } else {
                    let (s, c) = self.posangle.to_radians().sin_cos();
                    (
                        half_x * s.abs() + half_y * c.abs(),
                        half_x * c.abs() + half_y * s.abs(),
                    )
                }
            }
            RegionShape::Ellipse { semi_x, semi_y } => {
                let r = semi_x.max(semi_y);
                (r, r)
            }
        }
    }

    /// Index ranges (rows, cols) of the bounding box on a `ny × nx` grid.
    ///
    /// Bounds are `int(c - r + 0.5) ..= int(c + r + 0.5)`, each clamped to the
    /// grid.
    pub fn bounding_box(&self, ny: usize, nx: usize) -> (Range<usize>, Range<usize>) {
        let (ry, rx) = self.half_extent();
        let bounds = |c: f64, r: f64, n: usize| {
            let last = n.saturating_sub(1) as f64;
            let lo = (c - r + 0.5).trunc().clamp(0.0, last) as usize;
            let hi = (c + r + 0.5).trunc().clamp(0.0, last) as usize;
            lo..(hi + 1).min(n)
        };
        (bounds(self.center.0, ry, ny), bounds(self.center.1, rx, nx))
    }

    /// True when the pixel (y, x) lies inside the region (pixel units).
    pub fn contains(&self, y: f64, x: f64) -> bool {
        let dy = y - self.center.0;
        let dx = x - self.center.1;
        match self.shape {
            RegionShape::Circle { radius } => dx * dx + dy * dy < radius * radius,
            RegionShape::Rectangle { half_y, half_x } => {
                let (s, c) = self.posangle.to_radians().sin_cos();
                let u = dx * c + dy * s;
                let v = dy * c - dx * s;
                u.abs() <= half_x && v.abs() <= half_y
            }
            RegionShape::Ellipse { semi_x, semi_y } => {
                let (s, c) = self.posangle.to_radians().sin_cos();
                let u = (dx * c + dy * s) / semi_x;
                let v = (dy * c - dx * s) / semi_y;
                u * u + v * v < 1.0
            }
        }
    }

    /// Mask of the region on a `ny × nx` grid (pixel units).
    ///
    /// With `inside` the region's pixels are `true`; otherwise every pixel
    /// outside the region is `true`.
    pub fn mask(&self, ny: usize, nx: usize, inside: bool) -> Array2<bool> {
        let mut mask = Array2::from_elem((ny, nx), !inside);
        if ny == 0 || nx == 0 {
            return mask;
        }
        let (rows, cols) = self.bounding_box(ny, nx);
        for y in rows {
            for x in cols.clone() {
                let hit = self.contains(y as f64, x as f64);
                mask[[y, x]] = if inside { hit } else { !hit };
            }
        }
        mask
    }
}
