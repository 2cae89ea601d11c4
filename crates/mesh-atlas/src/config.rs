//! TOML configuration for a complete atlas run.
//!
//! ```toml
//! parallel = false
//!
//! [registrar]
//! type = "point_set"
//! resample_rate = 0.5
//! seed = 7
//!
//! [registrar.metric]
//! type = "euclidean_distance"
//!
//! [refine]
//! iterations = 3
//! registration_iterations = 200
//! ```
//!
//! Every field is optional and falls back to its default.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use mesh_core::Mesh;

use crate::error::{AtlasError, AtlasResult};
use crate::refine::{AtlasRefinementLoop, RefineParams, RefinementResult};
use crate::registration::{
    DiffeomorphicConfig, DiffeomorphicRegistrar, MeanSquaresConfig, MeanSquaresRegistrar,
    PointSetEntropyConfig, PointSetEntropyRegistrar, Registrar,
};

/// Registrar choice with its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrarConfig {
    MeanSquares(MeanSquaresConfig),
    Diffeomorphic(DiffeomorphicConfig),
    PointSet(PointSetEntropyConfig),
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        RegistrarConfig::PointSet(PointSetEntropyConfig::for_refinement())
    }
}

impl RegistrarConfig {
    pub fn name(&self) -> &'static str {
        match self {
            RegistrarConfig::MeanSquares(_) => "mean_squares",
            RegistrarConfig::Diffeomorphic(_) => "diffeomorphic",
            RegistrarConfig::PointSet(_) => "point_set",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Register the targets of each iteration concurrently.
    pub parallel: bool,
    pub registrar: RegistrarConfig,
    pub refine: RefineParams,
}

impl AtlasConfig {
    pub fn with_registrar(mut self, registrar: RegistrarConfig) -> Self {
        self.registrar = registrar;
        self
    }

    pub fn with_refine(mut self, refine: RefineParams) -> Self {
        self.refine = refine;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn from_toml_str(toml_str: &str) -> AtlasResult<Self> {
        toml::from_str(toml_str).map_err(|e| AtlasError::ConfigParse {
            path: None,
            details: e.to_string(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> AtlasResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| AtlasError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|e| AtlasError::ConfigParse {
            path: Some(path.to_path_buf()),
            details: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> AtlasResult<String> {
        toml::to_string_pretty(self).map_err(|e| AtlasError::ConfigParse {
            path: None,
            details: e.to_string(),
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AtlasResult<()> {
        let path = path.as_ref();
        let contents = self.to_toml_string()?;
        std::fs::write(path, contents).map_err(|source| AtlasError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Refine `template` against `targets` with the configured registrar.
    pub fn run(&self, template: &Mesh, targets: &[Mesh]) -> AtlasResult<RefinementResult> {
        info!(
            registrar = self.registrar.name(),
            parallel = self.parallel,
            "Running atlas configuration"
        );
        match &self.registrar {
            RegistrarConfig::MeanSquares(config) => {
                self.drive(MeanSquaresRegistrar::new(), config.clone(), template, targets)
            }
            RegistrarConfig::Diffeomorphic(config) => {
                self.drive(DiffeomorphicRegistrar::new(), config.clone(), template, targets)
            }
            RegistrarConfig::PointSet(config) => {
                self.drive(PointSetEntropyRegistrar::new(), config.clone(), template, targets)
            }
        }
    }

    fn drive<R>(
        &self,
        registrar: R,
        config: R::Config,
        template: &Mesh,
        targets: &[Mesh],
    ) -> AtlasResult<RefinementResult>
    where
        R: Registrar + Clone + Send,
    {
        let mut refinement = AtlasRefinementLoop::new(registrar, config, self.refine.clone());
        if self.parallel {
            refinement.run_parallel(template, targets)
        } else {
            refinement.run(template, targets)
        }
    }
}
