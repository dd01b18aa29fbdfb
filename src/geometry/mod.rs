//! Disk geometry: disk frame to sky plane projection and line-of-sight velocities.
//!
//! # Frames
//!
//! The disk frame uses the cylindrical radius `r`, the azimuth `φ` measured from the red-shifted
//! major axis in the sense of rotation, and the height `z = h(r)` of the emitting surface. The
//! sky frame uses offsets `(x, y)` from the map origin, the disk centre sits at `(x0, y0)`.
//!
//! ```text
//! x_maj = r cos φ,        y_d = r sin φ
//! y_min = y_d cos i - h(r) sin i
//! x = x0 + x_maj sin PA - y_min cos PA
//! y = y0 + x_maj cos PA + y_min sin PA
//! v_los = v(r, h(r)) sin i cos φ + v_sys
//! ```
//!
//! # Near and far side
//!
//! The emitting surface is always the `+h(r)` side of the disk frame, the inclination within
//! (0, π) fixes which way it is tilted towards the observer. Deprojection follows the single
//! root reached by the fixed-point iteration started from the flat-disk solution, the second
//! (far side) root of a flared surface is never tested.

mod rotation;
pub use rotation::{AU, GM_SUN, Rotation, RotationLaw, keplerian_velocity};

mod surface;
pub use surface::{FlaredSurface, SurfaceKind, SurfaceSolver};

use crate::params::{ParameterName, ParameterValues};

use std::f64::consts::{PI, TAU};

/// Disks with |cos i| below this value are treated as edge-on and cannot be deprojected
const EDGE_ON_COS_INCLINATION: f64 = 1e-12;

/// Invalid geometry parameter value
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("inclination {0} rad is outside (0, π)")]
    Inclination(f64),

    #[error("{name} must be finite, got {value}")]
    NonFinite { name: ParameterName, value: f64 },

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: ParameterName, value: f64 },

    #[error("{name} must be non-negative, got {value}")]
    Negative { name: ParameterName, value: f64 },

    #[error("value of {0} is not assigned")]
    Missing(ParameterName),
}

/// A sky pixel that has no disk-frame counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NoSolution {
    #[error("disk is seen edge-on")]
    EdgeOn,

    #[error("surface iteration produced an invalid radius")]
    Diverged,

    #[error("surface iteration did not converge in {0} iterations")]
    NotConverged(u32),
}

/// Point of the disk frame: cylindrical radius and azimuth from the red-shifted major axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskPoint {
    pub r: f64,
    pub phi: f64,
}

impl DiskPoint {
    pub fn new(r: f64, phi: f64) -> Self {
        Self { r, phi }
    }
}

/// Sky-plane offset from the map origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPoint {
    pub x: f64,
    pub y: f64,
}

impl SkyPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Orientation, rotation law and emitting surface of a disk
#[derive(Debug, Clone, PartialEq)]
pub struct DiskGeometry {
    inclination: f64,
    position_angle: f64,
    systemic_velocity: f64,
    center: SkyPoint,
    rotation: Rotation,
    surface: Option<FlaredSurface>,
    sin_i: f64,
    cos_i: f64,
    sin_pa: f64,
    cos_pa: f64,
}

impl DiskGeometry {
    /// New flat, centred disk
    ///
    /// `inclination` must be within (0, π), `position_angle` is wrapped into [0, 2π).
    pub fn new(
        inclination: f64,
        position_angle: f64,
        systemic_velocity: f64,
        rotation: Rotation,
    ) -> Result<Self, GeometryError> {
        if !(inclination > 0.0 && inclination < PI) {
            return Err(GeometryError::Inclination(inclination));
        }
        for (name, value) in [
            (ParameterName::PositionAngle, position_angle),
            (ParameterName::SystemicVelocity, systemic_velocity),
        ] {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite { name, value });
            }
        }
        let position_angle = position_angle.rem_euclid(TAU);
        let (sin_i, cos_i) = inclination.sin_cos();
        let (sin_pa, cos_pa) = position_angle.sin_cos();
        Ok(Self {
            inclination,
            position_angle,
            systemic_velocity,
            center: SkyPoint::new(0.0, 0.0),
            rotation,
            surface: None,
            sin_i,
            cos_i,
            sin_pa,
            cos_pa,
        })
    }

    pub fn with_surface(mut self, surface: FlaredSurface) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_center(mut self, center: SkyPoint) -> Result<Self, GeometryError> {
        for (name, value) in [
            (ParameterName::CenterX, center.x),
            (ParameterName::CenterY, center.y),
        ] {
            if !value.is_finite() {
                return Err(GeometryError::NonFinite { name, value });
            }
        }
        self.center = center;
        Ok(self)
    }

    /// Builds the geometry from a complete parameter assignment
    pub fn from_values(
        law: RotationLaw,
        surface: SurfaceKind,
        values: &ParameterValues,
    ) -> Result<Self, GeometryError> {
        let get = |name| values.get(name).ok_or(GeometryError::Missing(name));
        let geometry = Self::new(
            get(ParameterName::Inclination)?,
            get(ParameterName::PositionAngle)?,
            get(ParameterName::SystemicVelocity)?,
            Rotation::from_values(law, values)?,
        )?
        .with_center(SkyPoint::new(
            values.get(ParameterName::CenterX).unwrap_or(0.0),
            values.get(ParameterName::CenterY).unwrap_or(0.0),
        ))?;
        Ok(match surface {
            SurfaceKind::Flat => geometry,
            SurfaceKind::Flared => geometry.with_surface(FlaredSurface::from_values(values)?),
        })
    }

    pub fn inclination(&self) -> f64 {
        self.inclination
    }

    pub fn position_angle(&self) -> f64 {
        self.position_angle
    }

    pub fn systemic_velocity(&self) -> f64 {
        self.systemic_velocity
    }

    pub fn center(&self) -> SkyPoint {
        self.center
    }

    pub fn rotation(&self) -> &Rotation {
        &self.rotation
    }

    pub fn surface(&self) -> Option<&FlaredSurface> {
        self.surface.as_ref()
    }

    /// Height of the emitting surface at radius `r`
    #[inline]
    pub fn height(&self, r: f64) -> f64 {
        self.surface.as_ref().map_or(0.0, |surface| surface.height(r))
    }

    /// Rotation velocity of the emitting surface at radius `r`
    #[inline]
    pub fn rotation_velocity(&self, r: f64) -> f64 {
        self.rotation.velocity(r, self.height(r))
    }

    /// Sky position of a disk point lying on the emitting surface
    pub fn project(&self, point: DiskPoint) -> SkyPoint {
        let (sin_phi, cos_phi) = point.phi.sin_cos();
        let x_maj = point.r * cos_phi;
        let y_min = point.r * sin_phi * self.cos_i - self.height(point.r) * self.sin_i;
        SkyPoint {
            x: self.center.x + x_maj * self.sin_pa - y_min * self.cos_pa,
            y: self.center.y + x_maj * self.cos_pa + y_min * self.sin_pa,
        }
    }

    /// Line-of-sight velocity of a disk point lying on the emitting surface
    #[inline]
    pub fn los_velocity(&self, point: DiskPoint) -> f64 {
        self.rotation_velocity(point.r) * self.sin_i * point.phi.cos() + self.systemic_velocity
    }

    /// Disk-frame coordinates of the emitting surface seen at a sky position
    pub fn deproject(
        &self,
        sky: SkyPoint,
        solver: &SurfaceSolver,
    ) -> Result<DiskPoint, NoSolution> {
        if self.cos_i.abs() < EDGE_ON_COS_INCLINATION {
            return Err(NoSolution::EdgeOn);
        }
        let dx = sky.x - self.center.x;
        let dy = sky.y - self.center.y;
        let x_maj = dx * self.sin_pa + dy * self.cos_pa;
        let y_min = -dx * self.cos_pa + dy * self.sin_pa;

        let mut y_d = y_min / self.cos_i;
        let mut r = x_maj.hypot(y_d);
        if let Some(surface) = self.surface.as_ref() {
            let mut converged = false;
            for _ in 0..solver.max_iterations {
                let y_next = (y_min + surface.height(r) * self.sin_i) / self.cos_i;
                let r_next = x_maj.hypot(y_next);
                if !r_next.is_finite() {
                    return Err(NoSolution::Diverged);
                }
                let step = (r_next - r).abs();
                y_d = y_next;
                r = r_next;
                if step <= solver.tolerance * r {
                    converged = true;
                    break;
                }
            }
            if !converged {
                return Err(NoSolution::NotConverged(solver.max_iterations));
            }
        }
        if !r.is_finite() {
            return Err(NoSolution::Diverged);
        }
        Ok(DiskPoint {
            r,
            phi: y_d.atan2(x_maj),
        })
    }

    /// Model line-of-sight velocity at a sky position
    pub fn model_velocity(&self, sky: SkyPoint, solver: &SurfaceSolver) -> Result<f64, NoSolution> {
        self.deproject(sky, solver)
            .map(|point| self.los_velocity(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_abs_diff_eq;
    use rand::prelude::*;

    fn flat_geometry(inclination: f64, position_angle: f64) -> DiskGeometry {
        DiskGeometry::new(
            inclination,
            position_angle,
            5.0,
            Rotation::power_law(3.0, 100.0, -0.5).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn inclination_must_be_within_open_interval() {
        let rotation = Rotation::keplerian(1.0).unwrap();
        for inclination in [0.0, PI, -0.3, 4.0, f64::NAN] {
            assert!(matches!(
                DiskGeometry::new(inclination, 0.0, 0.0, rotation),
                Err(GeometryError::Inclination(_))
            ));
        }
    }

    #[test]
    fn position_angle_is_wrapped() {
        let geometry = flat_geometry(0.5, -0.5 * PI);
        assert_abs_diff_eq!(geometry.position_angle(), 1.5 * PI, epsilon = 1e-12);
        let geometry = flat_geometry(0.5, 5.0 * PI);
        assert_abs_diff_eq!(geometry.position_angle(), PI, epsilon = 1e-12);
    }

    #[test]
    fn flat_round_trip_sky_disk_sky() {
        let mut rng = StdRng::seed_from_u64(0);
        let solver = SurfaceSolver::default();
        for _ in 0..200 {
            let inclination = rng.random_range(0.05..PI - 0.05);
            let position_angle = rng.random_range(0.0..TAU);
            let geometry = flat_geometry(inclination, position_angle)
                .with_center(SkyPoint::new(
                    rng.random_range(-5.0..5.0),
                    rng.random_range(-5.0..5.0),
                ))
                .unwrap();
            let sky = SkyPoint::new(rng.random_range(-200.0..200.0), rng.random_range(-200.0..200.0));
            let disk = geometry.deproject(sky, &solver).unwrap();
            let back = geometry.project(disk);
            assert_abs_diff_eq!(back.x, sky.x, epsilon = 1e-8);
            assert_abs_diff_eq!(back.y, sky.y, epsilon = 1e-8);
        }
    }

    #[test]
    fn flared_round_trip_disk_sky_disk() {
        let mut rng = StdRng::seed_from_u64(1);
        let solver = SurfaceSolver::default();
        let surface = FlaredSurface::new(0.1, 0.25, 100.0).unwrap();
        for _ in 0..200 {
            let geometry = flat_geometry(rng.random_range(0.1..1.2), rng.random_range(0.0..TAU))
                .with_surface(surface);
            let disk = DiskPoint::new(rng.random_range(5.0..250.0), rng.random_range(-PI..PI));
            let sky = geometry.project(disk);
            let back = geometry.deproject(sky, &solver).unwrap();
            assert_abs_diff_eq!(back.r, disk.r, epsilon = 1e-6);
            assert_abs_diff_eq!(back.phi.sin(), disk.phi.sin(), epsilon = 1e-6);
            assert_abs_diff_eq!(back.phi.cos(), disk.phi.cos(), epsilon = 1e-6);
        }
    }

    #[test]
    fn major_axis_carries_extreme_velocities() {
        let inclination = 0.6;
        let geometry = flat_geometry(inclination, 0.0);
        let solver = SurfaceSolver::default();
        // With PA = 0 the red-shifted major axis points along +y
        let red = geometry.model_velocity(SkyPoint::new(0.0, 100.0), &solver).unwrap();
        let blue = geometry.model_velocity(SkyPoint::new(0.0, -100.0), &solver).unwrap();
        let minor = geometry.model_velocity(SkyPoint::new(50.0, 0.0), &solver).unwrap();
        assert_abs_diff_eq!(red, 5.0 + 3.0 * inclination.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(blue, 5.0 - 3.0 * inclination.sin(), epsilon = 1e-12);
        assert_abs_diff_eq!(minor, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn supplementary_inclinations_agree_for_flat_disk() {
        let solver = SurfaceSolver::default();
        let near = flat_geometry(0.4, 1.0);
        let far = flat_geometry(PI - 0.4, 1.0);
        for sky in [SkyPoint::new(30.0, -20.0), SkyPoint::new(-70.0, 10.0)] {
            assert_abs_diff_eq!(
                near.model_velocity(sky, &solver).unwrap(),
                far.model_velocity(sky, &solver).unwrap(),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn edge_on_has_no_solution() {
        let geometry = flat_geometry(0.5 * PI, 0.0);
        assert_eq!(
            geometry.deproject(SkyPoint::new(10.0, 10.0), &SurfaceSolver::default()),
            Err(NoSolution::EdgeOn)
        );
    }

    #[test]
    fn steep_flaring_does_not_converge() {
        let geometry =
            flat_geometry(1.4, 0.0).with_surface(FlaredSurface::new(0.5, 1.0, 10.0).unwrap());
        let result = geometry.deproject(SkyPoint::new(50.0, 50.0), &SurfaceSolver::new(1e-10, 20));
        assert!(result.is_err());
    }

    #[test]
    fn from_values_requires_assigned_parameters() {
        let values = ParameterValues::new()
            .with(ParameterName::Inclination, 0.5)
            .with(ParameterName::PositionAngle, 1.0);
        assert_eq!(
            DiskGeometry::from_values(RotationLaw::Keplerian, SurfaceKind::Flat, &values),
            Err(GeometryError::Missing(ParameterName::SystemicVelocity))
        );
    }

    #[test]
    fn from_values_builds_flared_geometry() {
        let values = ParameterValues::new()
            .with(ParameterName::Inclination, 0.5)
            .with(ParameterName::PositionAngle, 1.0)
            .with(ParameterName::SystemicVelocity, 5.0)
            .with(ParameterName::StellarMass, 1.0)
            .with(ParameterName::AspectRatio, 0.2)
            .with(ParameterName::FlaringIndex, 0.25)
            .with(ParameterName::ReferenceRadius, 100.0);
        let geometry =
            DiskGeometry::from_values(RotationLaw::Keplerian, SurfaceKind::Flared, &values)
                .unwrap();
        assert_abs_diff_eq!(geometry.height(100.0), 20.0, epsilon = 1e-12);
        assert!(geometry.rotation_velocity(100.0) < keplerian_velocity(1.0, 100.0));
    }
}
