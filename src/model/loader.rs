use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::predictor::CentroidModel;
use crate::error::{BinError, Result};
use crate::kmer::MAX_K;

const MODEL_PREFIX: &str = "model_";
const MODEL_EXTENSION: &str = ".json";

/// A predictor loaded from disk together with the k it was trained for.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub k: usize,
    pub model: CentroidModel,
}

/// Find the model artifact (`model_*.json`) in a database directory.
///
/// Entries are scanned in name order so the choice does not depend on
/// directory iteration order.
pub fn find_model(database: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(database)
        .map_err(|e| BinError::io(database, "listing database directory", e))?;

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(MODEL_PREFIX) && name.ends_with(MODEL_EXTENSION)
        })
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();

    candidates.into_iter().next().ok_or_else(|| {
        BinError::config(format!(
            "no {}*{} model found in {}",
            MODEL_PREFIX,
            MODEL_EXTENSION,
            database.display()
        ))
    })
}

/// Parse k from a model file name, e.g. `model_miniKM_4mer_s10000.json` -> 4.
pub fn parse_k(path: &Path) -> Result<usize> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let invalid = || {
        BinError::config(format!(
            "cannot parse k from model name '{}' (expected model_<name>_<k>mer_<...>)",
            name
        ))
    };

    let rest = name.strip_prefix(MODEL_PREFIX).ok_or_else(invalid)?;
    let before_mer = rest.split("mer_").next().filter(|s| s.len() < rest.len()).ok_or_else(invalid)?;
    let k_str = before_mer.rsplit('_').next().ok_or_else(invalid)?;
    let k: usize = k_str.parse().map_err(|_| invalid())?;

    if k == 0 || k > MAX_K {
        return Err(BinError::config(format!(
            "model k={} out of supported range 1..={}",
            k, MAX_K
        )));
    }
    Ok(k)
}

/// Locate, parse and validate the model of a binned database.
pub fn load_model(database: &Path) -> Result<LoadedModel> {
    let path = find_model(database)?;
    let k = parse_k(&path)?;
    debug!("got model {}, setting k={}", path.display(), k);

    let file = File::open(&path).map_err(|e| BinError::io(&path, "opening model", e))?;
    let model: CentroidModel = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| BinError::config(format!("invalid model {}: {}", path.display(), e)))?;
    model.validate(k)?;

    info!(
        "Loaded model {} (k={}, {} bins, {:?} scaling)",
        path.display(),
        k,
        model.n_bins(),
        model.normalization
    );
    Ok(LoadedModel { k, model })
}
