use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{BindingError, Result};
use crate::stack::{Code, Stack};

pub const ASSET_MANIFEST_SCHEMA_VERSION: &str = "v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedAsset {
    pub construct_id: String,
    pub source_path: PathBuf,
    pub fingerprint: String,
    pub object_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AssetManifest {
    pub schema_version: String,
    pub assets: Vec<StagedAsset>,
}

/// Content hash of a file or directory tree.
///
/// Directory entries are visited in sorted relative-path order and each entry
/// contributes its path and bytes, so the digest is stable across machines.
pub fn fingerprint_path(path: &Path) -> Result<String> {
    let metadata = fs::metadata(path).map_err(|error| BindingError::Asset {
        path: path.to_path_buf(),
        message: format!("cannot stat asset: {error}"),
    })?;

    let mut hasher = Sha256::new();
    if metadata.is_file() {
        let bytes = fs::read(path).map_err(|error| BindingError::io(path, error))?;
        hasher.update(&bytes);
    } else {
        let mut files = Vec::new();
        collect_files(path, path, &mut files)?;
        files.sort();
        if files.is_empty() {
            return Err(BindingError::Asset {
                path: path.to_path_buf(),
                message: "asset directory is empty".to_string(),
            });
        }
        for relative in files {
            let bytes = fs::read(path.join(&relative))
                .map_err(|error| BindingError::io(path.join(&relative), error))?;
            hasher.update(relative.as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(&bytes);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn asset_object_key(fingerprint: &str) -> String {
    format!("{fingerprint}.zip")
}

/// Relative file paths (with `/` separators) under `dir`.
pub fn list_asset_files(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();
    Ok(files)
}

/// Fingerprints every asset-backed layer and function in declaration order.
pub fn stage_assets(stack: &Stack, asset_root: &Path) -> Result<AssetManifest> {
    let layer_code = stack
        .layers()
        .iter()
        .map(|layer| (layer.id.as_str(), &layer.code));
    let function_code = stack
        .functions()
        .iter()
        .map(|function| (function.id.as_str(), &function.code));

    let mut assets = Vec::new();
    for (construct_id, code) in layer_code.chain(function_code) {
        let Code::Asset(source_path) = code else {
            continue;
        };
        let fingerprint = fingerprint_path(&asset_root.join(source_path))?;
        assets.push(StagedAsset {
            construct_id: construct_id.to_string(),
            source_path: source_path.clone(),
            object_key: asset_object_key(&fingerprint),
            fingerprint,
        });
    }

    Ok(AssetManifest {
        schema_version: ASSET_MANIFEST_SCHEMA_VERSION.to_string(),
        assets,
    })
}

impl AssetManifest {
    pub fn for_construct(&self, construct_id: &str) -> Option<&StagedAsset> {
        self.assets
            .iter()
            .find(|asset| asset.construct_id == construct_id)
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|error| BindingError::io(dir, error))?;
    for entry in entries {
        let entry = entry.map_err(|error| BindingError::io(dir, error))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|error| BindingError::io(&path, error))?;
        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path.strip_prefix(root).unwrap_or(&path);
            let components: Vec<String> = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(components.join("/"));
        }
    }
    Ok(())
}
