//! Multi-viewpoint long/short-term model (IDyOM) requests.
//!
//! The runtime is external; this module only describes a run: which dataset,
//! which viewpoints, which sub-models, and how their output is named.

pub mod command;
pub mod results;
pub mod viewpoint;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

pub use results::{IdyomResults, IdyomTarget};
pub use viewpoint::Viewpoint;

/// Which sub-models contribute to a prediction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelKind {
    /// Current piece only.
    #[serde(rename = "stm")]
    Stm,
    /// Pretraining corpus only.
    #[serde(rename = "ltm")]
    Ltm,
    /// Pretraining corpus, updated with the piece under test.
    #[serde(rename = "ltm+")]
    LtmPlus,
    #[serde(rename = "both")]
    Both,
    #[default]
    #[serde(rename = "both+")]
    BothPlus,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Stm => "stm",
            ModelKind::Ltm => "ltm",
            ModelKind::LtmPlus => "ltm+",
            ModelKind::Both => "both",
            ModelKind::BothPlus => "both+",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().trim_start_matches(':').to_ascii_lowercase().as_str() {
            "stm" => Some(ModelKind::Stm),
            "ltm" => Some(ModelKind::Ltm),
            "ltm+" => Some(ModelKind::LtmPlus),
            "both" => Some(ModelKind::Both),
            "both+" => Some(ModelKind::BothPlus),
            _ => None,
        }
    }

    pub fn uses_ltm(&self) -> bool {
        !matches!(self, ModelKind::Stm)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Escape {
    A,
    B,
    C,
    D,
    X,
}

impl Escape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Escape::A => "a",
            Escape::B => "b",
            Escape::C => "c",
            Escape::D => "d",
            Escape::X => "x",
        }
    }
}

/// Smoothing options for one sub-model store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Smoothing {
    /// `None` means unbounded.
    pub order_bound: Option<usize>,
    pub mixtures: bool,
    pub update_exclusion: bool,
    pub escape: Escape,
}

impl Smoothing {
    pub fn stm_default() -> Self {
        Self {
            order_bound: None,
            mixtures: true,
            update_exclusion: true,
            escape: Escape::X,
        }
    }

    pub fn ltm_default() -> Self {
        Self {
            order_bound: None,
            mixtures: true,
            update_exclusion: false,
            escape: Escape::C,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Training {
    pub pretraining_ids: Vec<u32>,
    /// Number of cross-validation folds.
    pub k: usize,
    /// Restrict evaluation to these folds; empty means all.
    pub resampling_indices: Vec<usize>,
}

impl Default for Training {
    fn default() -> Self {
        Self {
            pretraining_ids: Vec::new(),
            k: 10,
            resampling_indices: Vec::new(),
        }
    }
}

/// Ask the runtime to search for source viewpoints instead of naming them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Candidate viewpoints; empty means the runtime's default basis.
    pub basis: Vec<Viewpoint>,
    /// Decimal places used when comparing candidate scores.
    pub dp: Option<u32>,
    pub max_links: usize,
    pub min_links: usize,
    pub output_path: Option<PathBuf>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            basis: Vec::new(),
            dp: None,
            max_links: 2,
            min_links: 2,
            output_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Output {
    /// Directory the result table is written to.
    pub path: Option<PathBuf>,
    /// 1: per composition, 2: per event summary, 3: per event with distributions.
    pub detail: u8,
    pub overwrite: bool,
    pub separator: String,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            path: None,
            detail: 3,
            overwrite: false,
            separator: " ".to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caching {
    pub use_resampling_set_cache: bool,
    pub use_ltms_cache: bool,
}

impl Default for Caching {
    fn default() -> Self {
        Self {
            use_resampling_set_cache: true,
            use_ltms_cache: true,
        }
    }
}

/// Immutable description of one IDyOM run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdyomInstructions {
    idyom_root: Option<PathBuf>,
    database_path: Option<PathBuf>,
    dataset_id: u32,
    targets: Vec<Viewpoint>,
    sources: Vec<Viewpoint>,
    model: ModelKind,
    stm: Smoothing,
    ltm: Smoothing,
    training: Training,
    selection: Option<Selection>,
    output: Output,
    caching: Caching,
}

impl IdyomInstructions {
    pub fn idyom_root(&self) -> Option<&PathBuf> {
        self.idyom_root.as_ref()
    }

    pub fn database_path(&self) -> Option<&PathBuf> {
        self.database_path.as_ref()
    }

    pub fn dataset_id(&self) -> u32 {
        self.dataset_id
    }

    pub fn targets(&self) -> &[Viewpoint] {
        &self.targets
    }

    pub fn sources(&self) -> &[Viewpoint] {
        &self.sources
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn stm(&self) -> &Smoothing {
        &self.stm
    }

    pub fn ltm(&self) -> &Smoothing {
        &self.ltm
    }

    pub fn training(&self) -> &Training {
        &self.training
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn caching(&self) -> &Caching {
        &self.caching
    }

    /// Fill installation paths and output directory where unset.
    pub fn with_runtime_paths(
        mut self,
        idyom_root: Option<PathBuf>,
        database_path: Option<PathBuf>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        self.idyom_root = self.idyom_root.or(idyom_root);
        self.database_path = self.database_path.or(database_path);
        self.output.path = self.output.path.or(output_dir);
        self
    }

    /// Check the invariants every request must satisfy, however it was made.
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(ModelError::params("at least one target viewpoint is required"));
        }
        if let Some(bad) = self.targets.iter().find(|v| !v.is_basic()) {
            return Err(ModelError::params(format!(
                "target viewpoint {bad} is not basic"
            )));
        }
        for vp in self.targets.iter().chain(&self.sources) {
            vp.validate()?;
        }

        match &self.selection {
            Some(selection) => {
                if !self.sources.is_empty() {
                    return Err(ModelError::params(
                        "source viewpoints must be empty when selection is requested",
                    ));
                }
                if selection.min_links < 1 || selection.max_links < selection.min_links {
                    return Err(ModelError::params(format!(
                        "selection links must satisfy max ({}) >= min ({}) >= 1",
                        selection.max_links, selection.min_links
                    )));
                }
                for vp in &selection.basis {
                    vp.validate()?;
                }
            }
            None if self.sources.is_empty() => {
                return Err(ModelError::params(
                    "source viewpoints are required without a selection block",
                ));
            }
            None => {}
        }

        if self.training.k < 1 {
            return Err(ModelError::params("resampling fold count must be at least 1"));
        }
        if let Some(&fold) = self
            .training
            .resampling_indices
            .iter()
            .find(|&&i| i >= self.training.k)
        {
            return Err(ModelError::params(format!(
                "resampling index {fold} out of range for k = {}",
                self.training.k
            )));
        }
        if !(1..=3).contains(&self.output.detail) {
            return Err(ModelError::params(format!(
                "output detail must be 1, 2 or 3, got {}",
                self.output.detail
            )));
        }
        if self.output.separator.is_empty() {
            return Err(ModelError::params("output separator is empty"));
        }
        Ok(())
    }

    /// Where the result table will land, when the output directory is known.
    pub fn results_file_path(&self) -> Option<PathBuf> {
        self.output
            .path
            .as_ref()
            .map(|dir| dir.join(self.output_filename()))
    }
}

/// Mutable IDyOM configuration.
#[derive(Clone, Debug, Default)]
pub struct IdyomBuilder {
    pub idyom_root: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub dataset_id: Option<u32>,
    pub targets: Vec<Viewpoint>,
    /// Empty without a selection block means "same as targets".
    pub sources: Vec<Viewpoint>,
    pub model: ModelKind,
    pub stm: Option<Smoothing>,
    pub ltm: Option<Smoothing>,
    pub training: Training,
    pub selection: Option<Selection>,
    pub output: Output,
    pub caching: Caching,
}

impl IdyomBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(mut self, id: u32) -> Self {
        self.dataset_id = Some(id);
        self
    }

    pub fn target(mut self, viewpoint: Viewpoint) -> Self {
        self.targets.push(viewpoint);
        self
    }

    pub fn source(mut self, viewpoint: Viewpoint) -> Self {
        self.sources.push(viewpoint);
        self
    }

    pub fn model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn pretraining(mut self, ids: Vec<u32>) -> Self {
        self.training.pretraining_ids = ids;
        self
    }

    pub fn select(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output.path = Some(dir.into());
        self
    }

    pub fn to_instructions_file(&self) -> Result<IdyomInstructions> {
        let dataset_id = self
            .dataset_id
            .ok_or_else(|| ModelError::params("dataset id must be set"))?;
        let sources = match &self.selection {
            Some(_) if !self.sources.is_empty() => {
                return Err(ModelError::params(
                    "source viewpoints must be empty when selection is requested",
                ));
            }
            Some(_) => Vec::new(),
            None if self.sources.is_empty() => self.targets.clone(),
            None => self.sources.clone(),
        };

        let inst = IdyomInstructions {
            idyom_root: self.idyom_root.clone(),
            database_path: self.database_path.clone(),
            dataset_id,
            targets: self.targets.clone(),
            sources,
            model: self.model,
            stm: self.stm.unwrap_or_else(Smoothing::stm_default),
            ltm: self.ltm.unwrap_or_else(Smoothing::ltm_default),
            training: self.training.clone(),
            selection: self.selection.clone(),
            output: self.output.clone(),
            caching: self.caching,
        };
        inst.validate()?;
        Ok(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> IdyomBuilder {
        IdyomBuilder::new()
            .dataset(1)
            .target(Viewpoint::basic("cpitch"))
            .source(Viewpoint::derived("cpint"))
            .source(Viewpoint::basic("cpitch"))
    }

    #[test]
    fn test_valid_request() {
        let inst = builder().to_instructions_file().unwrap();
        assert_eq!(inst.dataset_id(), 1);
        assert_eq!(inst.sources().len(), 2);
        assert_eq!(inst.model(), ModelKind::BothPlus);
        assert_eq!(inst.stm().escape, Escape::X);
        assert_eq!(inst.ltm().escape, Escape::C);
    }

    #[test]
    fn test_validate_checks_finished_instructions() {
        let inst = builder().to_instructions_file().unwrap();
        inst.validate().unwrap();

        let mut bad = inst.clone();
        bad.output.detail = 9;
        assert!(matches!(bad.validate(), Err(ModelError::InvalidParameters(_))));

        let mut bad = inst.clone();
        bad.targets = vec![Viewpoint::derived("cpint")];
        assert!(bad.validate().is_err());

        let mut bad = inst;
        bad.selection = Some(Selection::default());
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_dataset_required() {
        let mut b = builder();
        b.dataset_id = None;
        assert!(matches!(
            b.to_instructions_file(),
            Err(ModelError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_targets_must_be_basic() {
        let b = IdyomBuilder::new().dataset(1).target(Viewpoint::derived("cpint"));
        assert!(b.to_instructions_file().is_err());
        assert!(IdyomBuilder::new().dataset(1).to_instructions_file().is_err());
    }

    #[test]
    fn test_selection_excludes_sources() {
        assert!(builder().select(Selection::default()).to_instructions_file().is_err());
        let b = IdyomBuilder::new()
            .dataset(2)
            .target(Viewpoint::basic("cpitch"))
            .select(Selection::default());
        let inst = b.to_instructions_file().unwrap();
        assert!(inst.sources().is_empty());
        assert!(inst.selection().is_some());
    }

    #[test]
    fn test_selection_link_bounds() {
        let sel = Selection {
            max_links: 1,
            min_links: 2,
            ..Selection::default()
        };
        let b = IdyomBuilder::new()
            .dataset(2)
            .target(Viewpoint::basic("cpitch"))
            .select(sel);
        assert!(b.to_instructions_file().is_err());
    }

    #[test]
    fn test_sources_default_to_targets() {
        let inst = IdyomBuilder::new()
            .dataset(3)
            .target(Viewpoint::basic("onset"))
            .to_instructions_file()
            .unwrap();
        assert_eq!(inst.sources(), &[Viewpoint::basic("onset")]);
    }

    #[test]
    fn test_detail_range_and_folds() {
        let mut b = builder();
        b.output.detail = 4;
        assert!(b.to_instructions_file().is_err());
        let mut b = builder();
        b.training.resampling_indices = vec![10];
        assert!(b.to_instructions_file().is_err());
    }

    #[test]
    fn test_runtime_paths_fill_only_unset() {
        let inst = builder()
            .output_dir("/data/out")
            .to_instructions_file()
            .unwrap()
            .with_runtime_paths(Some("/opt/idyom".into()), None, Some("/tmp".into()));
        assert_eq!(inst.idyom_root(), Some(&PathBuf::from("/opt/idyom")));
        assert_eq!(inst.output().path, Some(PathBuf::from("/data/out")));
        assert!(inst.results_file_path().unwrap().starts_with("/data/out"));
    }

    #[test]
    fn test_model_kind_tags() {
        for kind in [
            ModelKind::Stm,
            ModelKind::Ltm,
            ModelKind::LtmPlus,
            ModelKind::Both,
            ModelKind::BothPlus,
        ] {
            assert_eq!(ModelKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(ModelKind::from_tag(":both+"), Some(ModelKind::BothPlus));
    }
}
