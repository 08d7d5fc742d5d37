use std::{fmt, path::Path, str::FromStr};

use anyhow::Context as _;
use serde::Deserialize as _;

use crate::{
    error::{ComposerError, ComposerResult},
    transform::TransformSpec,
};

/// How a layer's source files are discovered (and, when an alpha override is
/// enabled, how the override files are discovered).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceMode {
    /// The single authoritative layer; its suffix-trimmed stems define the
    /// job's key set.
    Parent,
    /// Matched against parent keys by longest-substring lookup.
    Child,
    /// Independent exact suffix map, keyed the same way as the parent.
    Exact,
}

impl SourceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceMode::Parent => "Parent",
            SourceMode::Child => "Child",
            SourceMode::Exact => "Exact",
        }
    }
}

impl FromStr for SourceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parent" => Ok(SourceMode::Parent),
            "child" => Ok(SourceMode::Child),
            "exact" => Ok(SourceMode::Exact),
            _ => Err(format!("unknown source mode '{s}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Add,
    Subtract,
}

impl BlendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Add => "Add",
            BlendMode::Subtract => "Subtract",
        }
    }
}

impl FromStr for BlendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(BlendMode::Normal),
            "multiply" => Ok(BlendMode::Multiply),
            "screen" => Ok(BlendMode::Screen),
            "add" => Ok(BlendMode::Add),
            "subtract" => Ok(BlendMode::Subtract),
            _ => Err(format!("unknown blend mode '{s}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Jpg,
    Png,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpg => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            "png" => Ok(OutputFormat::Png),
            _ => Err(format!("unknown output format '{s}'")),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

macro_rules! string_enum_serde {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
                s.serialize_str(self.as_str())
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                let s = String::deserialize(d)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum_serde!(SourceMode);
string_enum_serde!(BlendMode);

/// Configuration for one layer of the composite stack.
///
/// Numeric fields may arrive as JSON strings (configs exported from
/// form-based editors serialize entry fields as text), so opacities parse
/// from either, and an unparseable gamma degrades to the 1.0 no-op instead
/// of failing the load.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct LayerSpec {
    pub name: String,
    #[serde(default)]
    pub main_constant: String,
    pub main_mode: SourceMode,
    #[serde(default = "one", deserialize_with = "de_f32_flexible")]
    pub main_opacity: f32,
    #[serde(default)]
    pub use_alpha: bool,
    #[serde(default)]
    pub alpha_constant: String,
    #[serde(default = "default_alpha_mode")]
    pub alpha_mode: SourceMode,
    #[serde(default = "one", deserialize_with = "de_f32_flexible")]
    pub alpha_opacity: f32,
    #[serde(default = "default_blend_mode")]
    pub blend_mode: BlendMode,
    #[serde(default = "one", deserialize_with = "de_gamma_lenient")]
    pub gamma: f32,
    #[serde(default)]
    pub transformations: Vec<TransformSpec>,
}

fn one() -> f32 {
    1.0
}

fn default_alpha_mode() -> SourceMode {
    SourceMode::Child
}

fn default_blend_mode() -> BlendMode {
    BlendMode::Normal
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(f64),
    Str(String),
}

fn de_f32_flexible<'de, D: serde::Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n as f32),
        NumOrStr::Str(s) => s
            .trim()
            .parse::<f32>()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{s}'"))),
    }
}

// Unparseable gamma is tolerated as the identity.
fn de_gamma_lenient<'de, D: serde::Deserializer<'de>>(d: D) -> Result<f32, D::Error> {
    Ok(match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => n as f32,
        NumOrStr::Str(s) => s.trim().parse::<f32>().unwrap_or(1.0),
    })
}

/// One whole processing run: the layer stack plus canvas/output options.
/// Built once, validated before any I/O, immutable while the run executes.
#[derive(Clone, Debug)]
pub struct CompositeJob {
    pub layers: Vec<LayerSpec>,
    pub target_width: u32,
    pub target_height: u32,
    pub output_format: OutputFormat,
    /// 0..=100; JPEG encode quality, also drives the PNG compression tier.
    pub quality: u8,
    /// Appended to every output key when present.
    pub suffix: Option<String>,
    /// Mirror the parent source file's subdirectory under the export root.
    pub preserve_structure: bool,
}

impl CompositeJob {
    /// Pre-flight checks; must pass before the orchestrator touches the
    /// filesystem.
    pub fn validate(&self) -> ComposerResult<()> {
        if self.layers.is_empty() {
            return Err(ComposerError::config("no layers configured"));
        }
        if self.target_width == 0 || self.target_height == 0 {
            return Err(ComposerError::config("target width/height must be > 0"));
        }
        if self.quality > 100 {
            return Err(ComposerError::config("quality must be in 0..=100"));
        }

        let parents = self
            .layers
            .iter()
            .filter(|l| l.main_mode == SourceMode::Parent)
            .count();
        if parents != 1 {
            return Err(ComposerError::config(format!(
                "there must be exactly one Parent layer (found {parents})"
            )));
        }

        for layer in &self.layers {
            if layer.name.trim().is_empty() {
                return Err(ComposerError::config("layer name must be non-empty"));
            }
            if !(0.0..=1.0).contains(&layer.main_opacity) {
                return Err(ComposerError::config(format!(
                    "layer '{}': main_opacity must be in [0,1]",
                    layer.name
                )));
            }
            if layer.use_alpha && !(0.0..=1.0).contains(&layer.alpha_opacity) {
                return Err(ComposerError::config(format!(
                    "layer '{}': alpha_opacity must be in [0,1]",
                    layer.name
                )));
            }
            if !layer.gamma.is_finite() || layer.gamma <= 0.0 {
                return Err(ComposerError::config(format!(
                    "layer '{}': gamma must be finite and > 0",
                    layer.name
                )));
            }
        }

        Ok(())
    }

    /// The single Parent layer. Only meaningful after `validate()`.
    pub fn parent_layer(&self) -> ComposerResult<&LayerSpec> {
        self.layers
            .iter()
            .find(|l| l.main_mode == SourceMode::Parent)
            .ok_or_else(|| ComposerError::config("no Parent layer in job"))
    }
}

/// Loads a layer stack from a JSON file (a top-level array of layer objects).
pub fn load_layer_stack(path: &Path) -> ComposerResult<Vec<LayerSpec>> {
    let f = std::fs::File::open(path)
        .with_context(|| format!("open layer config '{}'", path.display()))?;
    let r = std::io::BufReader::new(f);
    let layers: Vec<LayerSpec> = serde_json::from_reader(r)
        .with_context(|| format!("parse layer config '{}'", path.display()))?;
    Ok(layers)
}
