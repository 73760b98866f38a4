use std::{collections::HashMap, fs, path::Path};

use anyhow::bail;
use serde::{de::Visitor, Deserialize};

use crate::math::lerp;

#[derive(Deserialize)]
pub struct Config {
    pub monitor: Option<String>,
    /// Uniform factor applied when mapping screen coordinates into canvas
    /// space.
    #[serde(default = "default_scale")]
    pub scale: f32,
    #[serde(default)]
    pub brush: Brush,
    #[serde(default)]
    pub render: Render,
    #[serde(rename = "device")]
    pub devices: Vec<Device>,
}

fn default_scale() -> f32 {
    1.0
}

impl Config {
    pub fn load<A: AsRef<Path>>(path: A) -> anyhow::Result<Self> {
        Self::load_impl(path.as_ref())
    }

    fn load_impl(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents)?;

        // Validate configuration.
        // - There should be exactly 1 device with `tablet = true`.
        // - Brush and render parameters must be usable.

        let tablet_devs = config.devices.iter().filter(|dev| dev.tablet).count();
        if tablet_devs != 1 {
            bail!(
                "there must be exactly one [[device]] with `tablet = true` (found {tablet_devs})"
            );
        }

        if !(config.scale > 0.0) {
            bail!("`scale` must be positive (got {})", config.scale);
        }
        config.brush.validate()?;
        if config.render.framerate == 0 {
            bail!("`render.framerate` must be at least 1");
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Brush {
    /// Arc-length distance between two resampled dabs, in canvas pixels.
    #[serde(default = "default_spacing")]
    pub spacing: f32,
    /// Dab diameter at full pen pressure.
    #[serde(default = "default_size")]
    pub size: f32,
    /// Dab diameter at the lightest touch.
    #[serde(default)]
    pub size_min: f32,
    #[serde(default)]
    pub mode: BrushMode,
}

fn default_spacing() -> f32 {
    4.0
}

fn default_size() -> f32 {
    10.0
}

impl Default for Brush {
    fn default() -> Self {
        Self {
            spacing: default_spacing(),
            size: default_size(),
            size_min: 0.0,
            mode: BrushMode::default(),
        }
    }
}

impl Brush {
    /// Dab diameter for a pen pressure in range 0-1.
    pub fn dab_size(&self, pressure: f32) -> f32 {
        lerp(self.size_min..=self.size, pressure)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(self.spacing > 0.0) {
            bail!("`brush.spacing` must be positive (got {})", self.spacing);
        }
        if !(self.size > 0.0) {
            bail!("`brush.size` must be positive (got {})", self.size);
        }
        if !(0.0..=self.size).contains(&self.size_min) {
            bail!(
                "`brush.size_min` must be between 0 and `brush.size` (got {})",
                self.size_min
            );
        }
        if self.mode == BrushMode::Stamped && self.spacing > self.size_min {
            // Stamps only overlap into a continuous stroke while the dab
            // diameter stays at or above the spacing.
            log::warn!(
                "brush spacing {} exceeds the minimum dab size {}; light strokes will show gaps",
                self.spacing,
                self.size_min,
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrushMode {
    /// Overlapping soft brush stamps, one textured quad per dab.
    #[default]
    Stamped,
    /// A variable-width triangle ribbon bridging consecutive dabs.
    Ribbon,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Render {
    /// Target presentation rate. Input is consumed as fast as it arrives
    /// regardless of this value.
    #[serde(default = "default_framerate")]
    pub framerate: u32,
}

fn default_framerate() -> u32 {
    120
}

impl Default for Render {
    fn default() -> Self {
        Self {
            framerate: default_framerate(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Key(pub(crate) evdev::Key);

impl<'a> Deserialize<'a> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'a>,
    {
        struct FromStrVisitor;

        impl<'de> Visitor<'de> for FromStrVisitor {
            type Value = Key;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("evdev key name")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Key(v.parse().map_err(|_| {
                    E::custom(format_args!("invalid evdev key name '{v}'"))
                })?))
            }
        }

        deserializer.deserialize_str(FromStrVisitor)
    }
}

#[derive(Deserialize)]
pub struct Device {
    pub name: String,
    #[serde(default)]
    pub grab: bool,
    #[serde(default)]
    pub tablet: bool,
    pub ratio: Option<f32>,
    #[serde(default)]
    pub bind: HashMap<Key, CommandVerb>,
}

#[derive(Debug, Deserialize)]
pub enum CommandVerb {
    #[serde(rename = "CLEAR")]
    Clear,
}
