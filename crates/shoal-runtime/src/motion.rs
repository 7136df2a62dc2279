//! Reference entity logic: constant-velocity motion

use shoal_core::{f64_value, read_f64, FieldMap};
use shoal_views::{EntityLogic, EntityPatch};

/// Integrates `x += vx * dt` and `y += vy * dt`.
///
/// Entities missing any of the four fields are left alone, as are entities
/// at rest.
#[derive(Clone, Debug, Default)]
pub struct MotionLogic {
    moved: u64,
}

impl MotionLogic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patches produced so far
    pub fn moved(&self) -> u64 {
        self.moved
    }
}

impl EntityLogic for MotionLogic {
    fn tick(&mut self, _key: &str, fields: &FieldMap, dt: f64) -> Option<EntityPatch> {
        let x = read_f64(fields, "x")?;
        let y = read_f64(fields, "y")?;
        let vx = read_f64(fields, "vx")?;
        let vy = read_f64(fields, "vy")?;

        if (vx == 0.0 && vy == 0.0) || dt <= 0.0 {
            return None;
        }

        let mut patch = FieldMap::new();
        patch.insert("x".into(), f64_value(x + vx * dt));
        patch.insert("y".into(), f64_value(y + vy * dt));
        self.moved += 1;
        Some(EntityPatch::new(patch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(x: f64, y: f64, vx: f64, vy: f64) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("x".into(), f64_value(x));
        fields.insert("y".into(), f64_value(y));
        fields.insert("vx".into(), f64_value(vx));
        fields.insert("vy".into(), f64_value(vy));
        fields
    }

    #[test]
    fn test_integrates_velocity() {
        let mut logic = MotionLogic::new();
        let patch = logic.tick("e1", &body(1.0, 2.0, 1.0, -2.0), 0.5).unwrap();

        assert_eq!(read_f64(&patch.fields, "x"), Some(1.5));
        assert_eq!(read_f64(&patch.fields, "y"), Some(1.0));
        assert!(patch.events.is_empty());
        assert_eq!(logic.moved(), 1);
    }

    #[test]
    fn test_skips_resting_and_incomplete() {
        let mut logic = MotionLogic::new();
        assert!(logic.tick("e1", &body(1.0, 2.0, 0.0, 0.0), 0.5).is_none());

        let mut fields = body(1.0, 2.0, 1.0, 1.0);
        fields.remove("vy");
        assert!(logic.tick("e1", &fields, 0.5).is_none());
        assert!(logic.tick("e1", &body(1.0, 2.0, 1.0, 1.0), 0.0).is_none());
        assert_eq!(logic.moved(), 0);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_displacement_is_velocity_times_dt(
                x in -1e3f64..1e3,
                y in -1e3f64..1e3,
                vx in 0.1f64..50.0,
                vy in -50.0f64..50.0,
                dt in 0.001f64..2.0,
            ) {
                let mut logic = MotionLogic::new();
                let patch = logic.tick("e", &body(x, y, vx, vy), dt).unwrap();
                let nx = read_f64(&patch.fields, "x").unwrap();
                let ny = read_f64(&patch.fields, "y").unwrap();
                prop_assert!((nx - x - vx * dt).abs() < 1e-9);
                prop_assert!((ny - y - vy * dt).abs() < 1e-9);
            }
        }
    }
}
