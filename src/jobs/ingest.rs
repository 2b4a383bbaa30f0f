// Upload ingestion: unpack the archive into the job's input directory and locate the images

use super::store::JobStore;
use crate::error::{JobError, Result};
use log::{debug, error, info, warn};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSet {
    pub image_dir: PathBuf,
    pub image_count: usize,
}

/// Hidden entries and macOS resource forks (`__MACOSX/._IMG_0001.jpg`) are never images
fn is_ignored(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || name == "__MACOSX"
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

fn unpack_entry(entry: &mut impl Read, is_dir: bool, target: &Path) -> io::Result<()> {
    if is_dir {
        return fs::create_dir_all(target);
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = File::create(target)?;
    io::copy(entry, &mut out)?;
    Ok(())
}

/// Unpack a ZIP archive into `dest`; entries that would escape `dest` are skipped
pub fn extract_archive(bytes: &[u8], dest: &Path) -> Result<usize> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| JobError::InvalidArchive(e.to_string()))?;

    let mut extracted = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| JobError::InvalidArchive(e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            warn!("Skipping unsafe archive entry: {:?}", entry.name());
            continue;
        };
        let target = dest.join(relative);
        let name = entry.name().to_string();

        // colliding entries (a file `shoot` next to `shoot/a.jpg`) are an archive defect
        let is_dir = entry.is_dir();
        unpack_entry(&mut entry, is_dir, &target)
            .map_err(|e| JobError::InvalidArchive(format!("cannot extract {:?}: {}", name, e)))?;
        if is_dir {
            continue;
        }
        extracted += 1;
    }

    debug!("Extracted {} file(s) into {:?}", extracted, dest);
    Ok(extracted)
}

fn count_images(dir: &Path) -> Result<usize> {
    let count = fs::read_dir(dir)?
        .flatten()
        .filter(|entry| !is_ignored(&entry.file_name()))
        .filter(|entry| entry.path().is_file() && is_image_file(&entry.path()))
        .count();
    Ok(count)
}

/// Images directly in `input_dir`, else the first subdirectory (lexicographic) holding any
pub fn find_image_dir(input_dir: &Path) -> Result<Option<ImageSet>> {
    let direct = count_images(input_dir)?;
    if direct > 0 {
        return Ok(Some(ImageSet {
            image_dir: input_dir.to_path_buf(),
            image_count: direct,
        }));
    }

    let mut subdirs: Vec<PathBuf> = fs::read_dir(input_dir)?
        .flatten()
        .filter(|entry| !is_ignored(&entry.file_name()))
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    subdirs.sort();

    for dir in subdirs {
        let count = count_images(&dir)?;
        if count > 0 {
            return Ok(Some(ImageSet {
                image_dir: dir,
                image_count: count,
            }));
        }
    }

    Ok(None)
}

fn stage_images(bytes: &[u8], input_dir: &Path) -> Result<ImageSet> {
    extract_archive(bytes, input_dir)?;
    find_image_dir(input_dir)?.ok_or(JobError::NoImagesFound)
}

/// Extract and validate an upload for `job_id`; on failure the job is persisted as `failed`
/// before the error is returned
pub fn ingest_archive(store: &JobStore, job_id: &str, bytes: &[u8]) -> Result<ImageSet> {
    let input_dir = store.paths(job_id).input_dir();

    match stage_images(bytes, &input_dir) {
        Ok(images) => {
            store.update(job_id, |job| {
                job.image_dir = Some(images.image_dir.to_string_lossy().to_string());
                job.image_count = images.image_count;
                Ok(())
            })?;
            info!(
                "[{}] Found {} image(s) in {:?}",
                job_id, images.image_count, images.image_dir
            );
            Ok(images)
        }
        Err(e) => {
            if let Err(persist_err) = store.fail(job_id, &e) {
                error!("[{}] Failed to persist ingestion failure: {}", job_id, persist_err);
            }
            Err(e)
        }
    }
}
