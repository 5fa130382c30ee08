//! Settings file for the `tanglegram` binary.
//!
//! Every field is optional; an absent file means compiled defaults.
//!
//! ```toml
//! data_dir = "data"
//! output_dir = "figures"
//!
//! [oracle]
//! program = "/opt/dendroscope/Dendroscope"
//! launcher = ["xvfb-run", "--auto-servernum"]
//!
//! [layout]
//! canvas_height = 800.0
//!
//! [[figures]]
//! name = "cophylogeny_wide"
//! day0 = "2021-06-30"
//! left = { path = "sc2ts-{}.nwk", internal_samples = true }
//! right = { path = "nextstrain.nex", time_scale = 365.25 }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::coords::CanvasLayout;
use crate::error::{Result, TanglegramError};
use crate::figure::{FigureConfig, FigureRegistry};
use crate::untangle::Dendroscope;

/// How to reach the external untangling program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    pub program: PathBuf,
    /// Arguments placed before the program, e.g. a virtual display wrapper.
    pub launcher: Vec<String>,
    pub method: String,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("Dendroscope"),
            launcher: vec![],
            method: "nnet".into(),
        }
    }
}

impl OracleSettings {
    pub fn dendroscope(&self) -> Dendroscope {
        Dendroscope {
            program: self.program.clone(),
            launcher: self.launcher.clone(),
            method: self.method.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory input file names are resolved against.
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub oracle: OracleSettings,
    pub layout: CanvasLayout,
    /// Added to, or replacing, the built-in figures.
    pub figures: Vec<FigureConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("figures"),
            oracle: OracleSettings::default(),
            layout: CanvasLayout::default(),
            figures: vec![],
        }
    }
}

impl Settings {
    /// Load from `path`, or defaults when no path is given.
    ///
    /// A path that is given but cannot be read is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| TanglegramError::io(format!("read {}", path.display()), e))?;
        Self::from_toml(&content)
            .map_err(|e| TanglegramError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| TanglegramError::Config(e.to_string()))?;
        for figure in &settings.figures {
            figure.validate()?;
        }
        Ok(settings)
    }

    /// Built-in figures overridden by the configured ones.
    pub fn registry(&self) -> FigureRegistry {
        FigureRegistry::builtin().with_overrides(self.figures.iter().cloned())
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| TanglegramError::Config(format!("serialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::Orientation;
    use tempfile::tempdir;

    #[test]
    fn given_no_config_when_loading_then_uses_defaults() {
        let settings = Settings::load(None).expect("load defaults");
        assert_eq!(settings.data_dir, PathBuf::from("data"));
        assert_eq!(settings.oracle.method, "nnet");
        assert_eq!(settings.layout.left_root_x, 370.0);
        assert_eq!(settings.registry().len(), 2);
    }

    #[test]
    fn given_missing_explicit_file_when_loading_then_fails() {
        let dir = tempdir().unwrap();
        let result = Settings::load(Some(dir.path().join("absent.toml").as_path()));
        assert!(matches!(result, Err(TanglegramError::Io { .. })));
    }

    #[test]
    fn given_partial_config_when_parsing_then_fills_defaults() {
        let settings = Settings::from_toml(
            r#"
            data_dir = "/srv/trees"

            [oracle]
            launcher = ["xvfb-run", "--auto-servernum"]

            [layout]
            canvas_height = 1000.0

            [[figures]]
            name = "mini"
            day0 = "2020-12-31"
            left = { path = "a-{}.nwk" }
            right = { path = "b.nwk", time_scale = 365.25 }
            "#,
        )
        .unwrap();

        assert_eq!(settings.data_dir, PathBuf::from("/srv/trees"));
        assert_eq!(settings.output_dir, PathBuf::from("figures"));
        assert_eq!(settings.oracle.program, PathBuf::from("Dendroscope"));
        assert_eq!(settings.oracle.launcher.len(), 2);
        assert_eq!(settings.layout.canvas_height, 1000.0);
        assert_eq!(settings.layout.tree_width, 340.0);

        let registry = settings.registry();
        assert_eq!(registry.len(), 3);
        let mini = registry.get("mini").unwrap();
        assert_eq!(mini.right.time_scale, 365.25);
        assert_eq!(mini.left.lineage_key, "pango_lineage");
        assert_eq!(mini.right_orientation, Orientation::Mirrored);
        assert_eq!(mini.focal_clades.len(), 2);
    }

    #[test]
    fn given_bad_figure_when_parsing_then_fails() {
        let result = Settings::from_toml(
            r#"
            [[figures]]
            name = "broken"
            day0 = "not a date"
            left = { path = "a.nwk" }
            right = { path = "b.nwk" }
            "#,
        );
        assert!(result.is_err());
        assert!(Settings::from_toml("data_dir = 3").is_err());
    }

    #[test]
    fn given_defaults_when_serialized_then_round_trips() {
        let settings = Settings {
            figures: FigureRegistry::builtin().iter().cloned().collect(),
            ..Default::default()
        };
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml(&text).unwrap(), settings);
    }
}
