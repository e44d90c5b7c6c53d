//! Demo configuration

use crate::error::ConfigError;
use crate::voxel::{check_resolution, ConeTraceSettings};

/// What the volume visualizer draws for each occupied cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisualizeMode {
    /// Filtered radiance of the selected mip level
    #[default]
    Radiance,
    /// Averaged surface normal, remapped to `[0, 1]`
    Normal,
}

impl VisualizeMode {
    pub(crate) fn shader_index(self) -> u32 {
        match self {
            VisualizeMode::Radiance => 0,
            VisualizeMode::Normal => 1,
        }
    }
}

/// Voxel volume and cone tracing settings
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelConfig {
    /// Cells per axis, a power of two
    pub resolution: u32,
    /// Mip level drawn by the visualizer
    pub visualize_level: u32,
    pub visualize_mode: VisualizeMode,
    /// Voxelize on the CPU and upload the volume instead of scattering on the GPU
    pub voxelize_on_cpu: bool,
    pub cone_trace: ConeTraceSettings,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            resolution: 256,
            visualize_level: 2,
            visualize_mode: VisualizeMode::Radiance,
            voxelize_on_cpu: false,
            cone_trace: ConeTraceSettings::default(),
        }
    }
}

impl VoxelConfig {
    /// Number of mip levels of the configured volume
    pub fn mip_count(&self) -> u32 {
        self.resolution.trailing_zeros() + 1
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_resolution(self.resolution)?;
        if self.visualize_level >= self.mip_count() {
            return Err(ConfigError::VisualizeLevel {
                level: self.visualize_level,
                resolution: self.resolution,
                mip_count: self.mip_count(),
            });
        }
        let cone = &self.cone_trace;
        let aperture = cone.aperture.to_degrees();
        if !(aperture > 0.0 && aperture < 90.0) {
            return Err(ConfigError::Aperture(aperture));
        }
        for (name, value) in [
            ("max_distance", cone.max_distance),
            ("step_scale", cone.step_scale),
            ("opacity_cutoff", cone.opacity_cutoff),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        Ok(())
    }
}

/// Configuration for the demo window and engine
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Enable vsync
    pub vsync: bool,
    pub clear_color: [f32; 4],
    /// Camera movement in units per second
    pub camera_speed: f32,
    /// Camera rotation in degrees per pixel of mouse drag
    pub mouse_sensitivity: f32,
    /// Draw the voxel volume on frames that voxelize
    pub visualize: bool,
    pub voxel: VoxelConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            title: "Voxel Cone Tracing".to_string(),
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            camera_speed: 5.0,
            mouse_sensitivity: 0.25,
            visualize: true,
            voxel: VoxelConfig::default(),
        }
    }
}

impl DemoConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::WindowSize {
                width: self.width,
                height: self.height,
            });
        }
        for (name, value) in [
            ("camera_speed", self.camera_speed),
            ("mouse_sensitivity", self.mouse_sensitivity),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        self.voxel.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::VoxelError;

    #[test]
    fn test_default_config_is_valid() {
        let config = DemoConfig::default();
        assert_eq!(config.voxel.resolution, 256);
        assert_eq!(config.voxel.mip_count(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolution_rejected() {
        let mut config = VoxelConfig::default();
        config.resolution = 200;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Voxel(VoxelError::InvalidResolution { value: 200, .. }))
        ));
    }

    #[test]
    fn test_visualize_level_bounded_by_mips() {
        let config = VoxelConfig {
            resolution: 16,
            visualize_level: 5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::VisualizeLevel { mip_count: 5, .. })
        ));
        let config = VoxelConfig {
            visualize_level: 4,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_cone_settings_checked() {
        let mut config = VoxelConfig::default();
        config.cone_trace.aperture = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Aperture(_))));
        config.cone_trace = ConeTraceSettings {
            step_scale: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositive { name: "step_scale", .. })
        ));
    }

    #[test]
    fn test_window_size_checked() {
        let config = DemoConfig {
            height: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::WindowSize { .. })));
    }
}
