//! Filesystem store for trained models and their fitted transforms.
//!
//! Layout under the artifacts root:
//! `models_repository/{stage}/{version}.json` and
//! `encoders_repository/{stage}/{kind}/{version}.json`.

use std::fs::{self, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::common::error::{PipelineError, PipelineResult};
use crate::data::cleaner::ImputationStats;
use crate::data::encoder::{EncoderBundle, MinMaxScaler, MultiLabelBinarizer, OneHotEncoder};

use super::domain::VersionLabel;
use super::forest::RandomForestClassifier;

pub const MODELS_DIR: &str = "models_repository";
pub const ENCODERS_DIR: &str = "encoders_repository";

/// Kinds of per-version artifacts stored next to the model.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncoderKind {
    Categorical,
    Multilabel,
    Numerical,
    Imputation,
}

impl EncoderKind {
    pub const ALL: [EncoderKind; 4] = [
        EncoderKind::Categorical,
        EncoderKind::Multilabel,
        EncoderKind::Numerical,
        EncoderKind::Imputation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderKind::Categorical => "categorical",
            EncoderKind::Multilabel => "multilabel",
            EncoderKind::Numerical => "numerical",
            EncoderKind::Imputation => "imputation",
        }
    }
}

/// Reads and writes version-keyed JSON artifacts.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn model_path(&self, version: &VersionLabel) -> PathBuf {
        self.root
            .join(MODELS_DIR)
            .join(version.stage.as_str())
            .join(format!("{version}.json"))
    }

    pub fn encoder_path(&self, version: &VersionLabel, kind: EncoderKind) -> PathBuf {
        self.root
            .join(ENCODERS_DIR)
            .join(version.stage.as_str())
            .join(kind.as_str())
            .join(format!("{version}.json"))
    }

    pub fn save_model(&self, version: &VersionLabel, model: &RandomForestClassifier) -> PipelineResult<PathBuf> {
        let path = self.model_path(version);
        write_json(&path, model)?;
        Ok(path)
    }

    pub fn load_model(&self, version: &VersionLabel) -> PipelineResult<RandomForestClassifier> {
        read_json(version, &self.model_path(version))
    }

    /// Persist the three fitted transforms under the version label.
    pub fn save_encoders(&self, version: &VersionLabel, encoders: &EncoderBundle) -> PipelineResult<()> {
        write_json(&self.encoder_path(version, EncoderKind::Categorical), &encoders.categorical)?;
        write_json(&self.encoder_path(version, EncoderKind::Multilabel), &encoders.multilabel)?;
        write_json(&self.encoder_path(version, EncoderKind::Numerical), &encoders.numerical)?;
        Ok(())
    }

    pub fn load_encoders(&self, version: &VersionLabel) -> PipelineResult<EncoderBundle> {
        let categorical: OneHotEncoder =
            read_json(version, &self.encoder_path(version, EncoderKind::Categorical))?;
        let multilabel: MultiLabelBinarizer =
            read_json(version, &self.encoder_path(version, EncoderKind::Multilabel))?;
        let numerical: MinMaxScaler =
            read_json(version, &self.encoder_path(version, EncoderKind::Numerical))?;
        Ok(EncoderBundle {
            categorical,
            multilabel,
            numerical,
        })
    }

    pub fn save_imputation_stats(&self, version: &VersionLabel, stats: &ImputationStats) -> PipelineResult<()> {
        write_json(&self.encoder_path(version, EncoderKind::Imputation), stats)
    }

    pub fn load_imputation_stats(&self, version: &VersionLabel) -> PipelineResult<ImputationStats> {
        read_json(version, &self.encoder_path(version, EncoderKind::Imputation))
    }

    /// Remove every artifact of a version; missing files are not an error.
    pub fn remove_version(&self, version: &VersionLabel) -> PipelineResult<usize> {
        let paths = std::iter::once(self.model_path(version))
            .chain(EncoderKind::ALL.iter().map(|k| self.encoder_path(version, *k)));
        let mut removed = 0;
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(%version, removed, "removed version artifacts");
        Ok(removed)
    }
}

/// Write through a sibling temp file and rename so readers never see a
/// partially written artifact.
fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "artifact written");
    Ok(())
}

fn read_json<T: DeserializeOwned>(version: &VersionLabel, path: &Path) -> PipelineResult<T> {
    let file = fs::File::open(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PipelineError::ArtifactNotFound {
                version: version.to_string(),
                path: path.to_path_buf(),
                source,
            }
        } else {
            PipelineError::Io(source)
        }
    })?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}
