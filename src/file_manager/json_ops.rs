// Atomic JSON file operations

use crate::error::{JobError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let mut file = File::open(path)?;

    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    Ok(serde_json::from_str(&contents)?)
}

/// Sibling path unique to this write, so concurrent publishers never share a temp file
fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .ok_or_else(|| JobError::Io(std::io::Error::other(format!("not a file path: {:?}", path))))?;

    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));

    Ok(path.with_file_name(temp_name))
}

/// Writes JSON atomically using write-to-temp-then-rename
pub fn write_json_file<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json_string = serde_json::to_string_pretty(data)?;

    let temp_path = temp_sibling(path)?;
    let result = (|| -> Result<()> {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(json_string.as_bytes())?;
        temp_file.sync_all()?;
        fs::rename(&temp_path, path)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

pub fn update_json_file<T, F>(path: &Path, update_fn: F) -> Result<T>
where
    T: DeserializeOwned + Serialize + Clone,
    F: FnOnce(&mut T) -> Result<()>,
{
    let mut data: T = read_json_file(path)?;
    update_fn(&mut data)?;
    write_json_file(path, &data)?;
    Ok(data)
}

/// Copies `source` to `dest` through a temporary sibling so `dest` only ever appears complete
pub fn publish_file_copy(source: &Path, dest: &Path) -> Result<()> {
    let temp_path = temp_sibling(dest)?;

    let result = (|| -> Result<()> {
        fs::copy(source, &temp_path)?;
        File::open(&temp_path)?.sync_all()?;
        fs::rename(&temp_path, dest)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
