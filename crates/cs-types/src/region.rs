//! Axis-aligned filter regions used to restrict mesh reductions.

use serde::{Deserialize, Serialize};

/// Axis-aligned box in metres. With `invert` set the region is everything
/// *outside* the box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cube3d {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub z_min: f64,
    pub z_max: f64,
    #[serde(default)]
    pub invert: bool,
}

impl Cube3d {
    pub fn contains(&self, point: [f64; 3]) -> bool {
        let [x, y, z] = point;
        let inside = (self.x_min..=self.x_max).contains(&x)
            && (self.y_min..=self.y_max).contains(&y)
            && (self.z_min..=self.z_max).contains(&z);
        inside != self.invert
    }
}

/// Builds a [`Cube3d`] from two parallel planes (normal `y`) as they are
/// placed in the modelling GUI. All inputs are millimetres.
///
/// Both planes share `length1` (along x), `length2` (along z) and the x/z
/// offsets; the cube spans between the bottom and top plane's y offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cube3dFactory {
    pub length1: f64,
    pub length2: f64,
    pub offset_x: f64,
    pub offset_y_bottom: f64,
    pub offset_y_top: f64,
    pub offset_z: f64,
    #[serde(default)]
    pub invert: bool,
}

impl Cube3dFactory {
    pub fn new(
        length1: f64,
        length2: f64,
        offset_x: f64,
        offset_y_bottom: f64,
        offset_y_top: f64,
        offset_z: f64,
    ) -> Self {
        Self {
            length1,
            length2,
            offset_x,
            offset_y_bottom,
            offset_y_top,
            offset_z,
            invert: false,
        }
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn cube(&self) -> Cube3d {
        const MM: f64 = 1e-3;
        Cube3d {
            x_min: (self.offset_x - self.length1 / 2.0) * MM,
            x_max: (self.offset_x + self.length1 / 2.0) * MM,
            y_min: self.offset_y_bottom * MM,
            y_max: self.offset_y_top * MM,
            z_min: (self.offset_z - self.length2 / 2.0) * MM,
            z_max: (self.offset_z + self.length2 / 2.0) * MM,
            invert: self.invert,
        }
    }
}

impl From<Cube3dFactory> for Cube3d {
    fn from(factory: Cube3dFactory) -> Self {
        factory.cube()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_near(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-8, "{actual} != {expected}");
    }

    #[test]
    fn factory_converts_planes_to_metres() {
        let cube = Cube3dFactory::new(56.0, 74.0, 56.0, 27.0, 52.0, 170.0).cube();
        assert_near(cube.x_min, 28e-3);
        assert_near(cube.x_max, 84e-3);
        assert_near(cube.y_min, 27e-3);
        assert_near(cube.y_max, 52e-3);
        assert_near(cube.z_min, 133e-3);
        assert_near(cube.z_max, 207e-3);
        assert!(!cube.invert);

        let inverted = Cube3dFactory::new(56.0, 74.0, 56.0, 27.0, 52.0, 170.0)
            .inverted()
            .cube();
        assert!(inverted.invert);
    }

    #[test]
    fn inverted_cube_flips_membership() {
        let cube = Cube3dFactory::new(10.0, 10.0, 0.0, 0.0, 10.0, 0.0).cube();
        let inside = [0.0, 0.005, 0.0];
        let outside = [0.1, 0.005, 0.0];
        assert!(cube.contains(inside));
        assert!(!cube.contains(outside));

        let inverted = Cube3d { invert: true, ..cube };
        assert!(!inverted.contains(inside));
        assert!(inverted.contains(outside));
    }
}
