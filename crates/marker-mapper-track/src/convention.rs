//! Axis conventions between the marker map and tracking consumers.

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Sign corrections applied around the PnP solve.
///
/// Object points can have their Y axis negated before PnP; the decomposed
/// Euler angles and the translation are then multiplied component-wise by
/// `rotation_signs` and `translation_signs`. The default reproduces the layout
/// downstream animation tools expect: object Y negated, Euler X and Z
/// negated, translation Y and Z negated.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinateConvention {
    pub negate_object_y: bool,
    pub rotation_signs: [f64; 3],
    pub translation_signs: [f64; 3],
}

impl CoordinateConvention {
    /// Raw PnP output, no correction anywhere.
    pub const IDENTITY: CoordinateConvention = CoordinateConvention {
        negate_object_y: false,
        rotation_signs: [1.0; 3],
        translation_signs: [1.0; 3],
    };

    pub fn object_point(&self, p: &Point3<f64>) -> Point3<f64> {
        if self.negate_object_y {
            Point3::new(p.x, -p.y, p.z)
        } else {
            *p
        }
    }

    pub fn euler(&self, angles: [f64; 3]) -> [f64; 3] {
        apply_signs(angles, &self.rotation_signs)
    }

    pub fn translation(&self, t: &Vector3<f64>) -> [f64; 3] {
        apply_signs([t.x, t.y, t.z], &self.translation_signs)
    }
}

impl Default for CoordinateConvention {
    fn default() -> Self {
        Self {
            negate_object_y: true,
            rotation_signs: [-1.0, 1.0, -1.0],
            translation_signs: [1.0, -1.0, -1.0],
        }
    }
}

fn apply_signs(v: [f64; 3], signs: &[f64; 3]) -> [f64; 3] {
    [v[0] * signs[0], v[1] * signs[1], v[2] * signs[2]]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flips_expected_axes() {
        let c = CoordinateConvention::default();
        assert_eq!(
            c.object_point(&Point3::new(1.0, 2.0, 3.0)),
            Point3::new(1.0, -2.0, 3.0)
        );
        assert_eq!(c.euler([0.1, 0.2, 0.3]), [-0.1, 0.2, -0.3]);
        assert_eq!(c.translation(&Vector3::new(1.0, 2.0, 3.0)), [1.0, -2.0, -3.0]);
    }

    #[test]
    fn identity_leaves_values_alone() {
        let c = CoordinateConvention::IDENTITY;
        let p = Point3::new(1.0, -2.0, 3.0);
        assert_eq!(c.object_point(&p), p);
        assert_eq!(c.euler([0.1, -0.2, 0.3]), [0.1, -0.2, 0.3]);
        assert_eq!(c.translation(&Vector3::new(4.0, 5.0, 6.0)), [4.0, 5.0, 6.0]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c: CoordinateConvention = serde_json::from_str(r#"{"negate_object_y": false}"#).unwrap();
        assert!(!c.negate_object_y);
        assert_eq!(c.rotation_signs, [-1.0, 1.0, -1.0]);
    }
}
