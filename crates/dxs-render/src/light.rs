//! Light environments
//!
//! A [`LightEnvironment`] is the lighting layer's per-object summary: a few
//! dominant lights plus an equivalent ambient colour. Installing one programs
//! the fixed-function lights and ambient state; the instancing path reads it
//! directly when present.

use crate::backend::{GraphicsDevice, Light, LightType, RenderState};
use crate::context::RenderContext;
use crate::math::{self, Vector3f};
use crate::state::{DirtyFlags, MAX_LIGHTS};

/// Attenuation parameters of a point light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointLight {
    pub center: Vector3f,
    pub diffuse: [f32; 3],
    pub ambient: [f32; 3],
    pub inner_radius: f32,
    pub outer_radius: f32,
}

/// One light of an environment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentLight {
    /// World-space direction toward the light
    pub direction: Vector3f,
    pub diffuse: [f32; 3],
    pub point: Option<PointLight>,
}

impl EnvironmentLight {
    pub fn directional(direction: Vector3f, diffuse: [f32; 3]) -> Self {
        Self {
            direction,
            diffuse,
            point: None,
        }
    }

    pub fn is_point(&self) -> bool {
        self.point.is_some()
    }

    /// Fixed-function light for slot `index`
    fn to_device_light(&self, index: usize) -> Light {
        let mut light = Light::directional(-self.direction, self.diffuse);
        if index == 0 {
            light.specular = [1.0, 1.0, 1.0, 0.0];
        }
        if let Some(point) = &self.point {
            let (inner, outer) = (point.inner_radius, point.outer_radius);
            light.light_type = LightType::Point;
            light.diffuse = [point.diffuse[0], point.diffuse[1], point.diffuse[2], 0.0];
            light.ambient = [point.ambient[0], point.ambient[1], point.ambient[2], 0.0];
            light.position = point.center;
            light.range = outer;
            // Uniform with cutoff when the attenuation band is degenerate
            let linear = if (inner - outer).abs() < 1e-5 { 0.0 } else { 0.1 / inner };
            light.attenuation = [1.0, linear, 8.0 / (outer * outer)];
        }
        light
    }
}

/// Dominant lights and equivalent ambient colour for one object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightEnvironment {
    pub lights: Vec<EnvironmentLight>,
    pub equivalent_ambient: [f32; 3],
}

impl LightEnvironment {
    pub fn new(equivalent_ambient: [f32; 3]) -> Self {
        Self {
            lights: Vec::new(),
            equivalent_ambient,
        }
    }

    /// Append a light; environments hold at most four
    pub fn with_light(mut self, light: EnvironmentLight) -> Self {
        if self.lights.len() < MAX_LIGHTS {
            self.lights.push(light);
        }
        self
    }

    pub fn light_count(&self) -> usize {
        self.lights.len()
    }
}

impl<D: GraphicsDevice> RenderContext<D> {
    /// Install or clear the active light environment.
    ///
    /// Installing programs the ambient render state and lights 0..3; lights
    /// past the environment's count are disabled. Clearing leaves the
    /// current lights in place.
    pub fn set_light_environment(&mut self, environment: Option<LightEnvironment>) {
        self.assert_owner_thread();
        if let Some(env) = &environment {
            let ambient = math::pack_argb(env.equivalent_ambient, 0.0);
            if self.record.render_states[RenderState::Ambient.slot()] != ambient {
                self.set_render_state(RenderState::Ambient, ambient);
                // Some drivers only pick up a new ambient together with a material change
                self.record.mark_dirty(DirtyFlags::MATERIAL);
            }
            for index in 0..MAX_LIGHTS {
                let light = env.lights.get(index).map(|l| l.to_device_light(index));
                self.record.set_light(index, light);
            }
        }
        self.record.set_light_environment(environment);
    }

    pub fn light_environment(&self) -> Option<&LightEnvironment> {
        self.record.light_environment()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directional_light_is_negated() {
        let env_light = EnvironmentLight::directional(Vector3f::new(0.0, 1.0, 0.0), [0.5, 0.5, 0.5]);
        let light = env_light.to_device_light(0);
        assert_eq!(light.light_type, LightType::Directional);
        assert_eq!(light.direction, Vector3f::new(0.0, -1.0, 0.0));
        assert_eq!(light.specular[0], 1.0);

        let second = env_light.to_device_light(1);
        assert_eq!(second.specular, [0.0; 4]);
    }

    #[test]
    fn test_point_light_attenuation() {
        let env_light = EnvironmentLight {
            direction: Vector3f::new(0.0, 0.0, 1.0),
            diffuse: [1.0; 3],
            point: Some(PointLight {
                center: Vector3f::new(1.0, 2.0, 3.0),
                diffuse: [0.2, 0.3, 0.4],
                ambient: [0.1; 3],
                inner_radius: 2.0,
                outer_radius: 4.0,
            }),
        };
        let light = env_light.to_device_light(2);
        assert_eq!(light.light_type, LightType::Point);
        assert_eq!(light.range, 4.0);
        assert_eq!(light.attenuation, [1.0, 0.05, 0.5]);
        assert_eq!(light.position, Vector3f::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_degenerate_band_has_no_linear_term() {
        let env_light = EnvironmentLight {
            direction: Vector3f::new(0.0, 0.0, 1.0),
            diffuse: [1.0; 3],
            point: Some(PointLight {
                center: Vector3f::zeros(),
                diffuse: [1.0; 3],
                ambient: [0.0; 3],
                inner_radius: 2.0,
                outer_radius: 2.0,
            }),
        };
        assert_eq!(env_light.to_device_light(0).attenuation[1], 0.0);
    }

    #[test]
    fn test_environment_caps_light_count() {
        let light = EnvironmentLight::directional(Vector3f::new(0.0, 0.0, 1.0), [1.0; 3]);
        let env = (0..6).fold(LightEnvironment::new([0.2; 3]), |env, _| env.with_light(light));
        assert_eq!(env.light_count(), MAX_LIGHTS);
    }
}
