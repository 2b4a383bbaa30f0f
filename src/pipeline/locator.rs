// Discovery between stages: pick the training run to export and the artifact to publish

use crate::error::{JobError, Result};
use crate::file_manager::publish_file_copy;
use crate::utils::{ARTIFACT_EXTENSION, RUN_CONFIG_FILE};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path, &fs::Metadata)) -> Result<()> {
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        // symlinks are resolved for the visitor but never descended into
        let meta = if file_type.is_symlink() {
            fs::metadata(&path)
        } else {
            entry.metadata()
        };
        let Ok(meta) = meta else {
            continue;
        };
        visit(&path, &meta);
        if meta.is_dir() && !file_type.is_symlink() {
            walk(&path, visit)?;
        }
    }
    Ok(())
}

/// Every directory under `outputs_root` holding a run config, with its mtime
pub fn find_run_dirs(outputs_root: &Path) -> Result<Vec<(PathBuf, SystemTime)>> {
    let mut runs = Vec::new();
    if !outputs_root.is_dir() {
        return Ok(runs);
    }

    walk(outputs_root, &mut |path, meta| {
        if meta.is_dir() && path.join(RUN_CONFIG_FILE).is_file() {
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            runs.push((path.to_path_buf(), modified));
        }
    })?;
    Ok(runs)
}

/// Newest run by modification time; equal times resolve to the greatest path
pub fn select_run_dir(outputs_root: &Path) -> Result<PathBuf> {
    let runs = find_run_dirs(outputs_root)?;
    debug!("Found {} run directory(ies) under {:?}", runs.len(), outputs_root);

    runs.into_iter()
        .max_by(|(a_path, a_time), (b_path, b_time)| {
            a_time.cmp(b_time).then_with(|| a_path.cmp(b_path))
        })
        .map(|(path, _)| path)
        .ok_or(JobError::NoRunDirectory)
}

/// Files with the artifact extension under `output_dir`, in `Path` order
pub fn find_artifact_candidates(output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut candidates = Vec::new();
    if !output_dir.is_dir() {
        return Ok(candidates);
    }

    walk(output_dir, &mut |path, meta| {
        let is_artifact = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(ARTIFACT_EXTENSION));
        let is_temp = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().starts_with('.'));
        if meta.is_file() && is_artifact && !is_temp {
            candidates.push(path.to_path_buf());
        }
    })?;

    candidates.sort();
    Ok(candidates)
}

/// Select the first candidate and make sure it is available at `canonical`;
/// the original file is left in place
pub fn publish_artifact(output_dir: &Path, canonical: &Path) -> Result<PathBuf> {
    let selected = find_artifact_candidates(output_dir)?
        .into_iter()
        .next()
        .ok_or(JobError::ArtifactNotFound)?;

    if selected != canonical {
        info!("Publishing artifact {:?} as {:?}", selected, canonical);
        publish_file_copy(&selected, canonical)?;
    }

    Ok(canonical.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::time::Duration;

    fn make_run(root: &Path, relative: &str, modified: SystemTime) -> PathBuf {
        let dir = root.join(relative);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(RUN_CONFIG_FILE), b"method: splatfacto").unwrap();
        File::open(&dir).unwrap().set_modified(modified).unwrap();
        dir
    }

    #[test]
    fn test_no_runs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("dataset/splatfacto")).unwrap();
        assert!(matches!(select_run_dir(dir.path()), Err(JobError::NoRunDirectory)));
        assert!(matches!(
            select_run_dir(&dir.path().join("missing")),
            Err(JobError::NoRunDirectory)
        ));
    }

    #[test]
    fn test_newest_run_wins() {
        let dir = tempfile::tempdir().unwrap();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        make_run(dir.path(), "dataset/splatfacto/2024-01-01_000000", base + Duration::from_secs(100));
        let newest = make_run(dir.path(), "dataset/splatfacto/2023-12-31_000000", base + Duration::from_secs(500));
        make_run(dir.path(), "other/run", base);

        assert_eq!(select_run_dir(dir.path()).unwrap(), newest);
    }

    #[test]
    fn test_equal_mtime_breaks_tie_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let when = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        make_run(dir.path(), "runs/a", when);
        let b = make_run(dir.path(), "runs/b", when);

        assert_eq!(select_run_dir(dir.path()).unwrap(), b);
    }

    #[test]
    fn test_artifact_candidates_sorted_by_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("zeta.ply"), b"z").unwrap();
        fs::write(dir.path().join("nested/alpha.PLY"), b"a").unwrap();
        fs::write(dir.path().join("beta.ply"), b"b").unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();

        let candidates = find_artifact_candidates(dir.path()).unwrap();
        assert_eq!(
            candidates,
            vec![
                dir.path().join("beta.ply"),
                dir.path().join("nested/alpha.PLY"),
                dir.path().join("zeta.ply"),
            ]
        );
    }

    #[test]
    fn test_publish_copies_and_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let exported = dir.path().join("exports/point_cloud.ply");
        fs::create_dir_all(exported.parent().unwrap()).unwrap();
        fs::write(&exported, b"ply\nformat binary").unwrap();
        let canonical = dir.path().join("splat.ply");

        let published = publish_artifact(dir.path(), &canonical).unwrap();
        assert_eq!(published, canonical);
        assert_eq!(fs::read(&canonical).unwrap(), b"ply\nformat binary");
        assert!(exported.is_file());
    }

    #[test]
    fn test_publish_in_place_when_already_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("splat.ply");
        fs::write(&canonical, b"ply").unwrap();

        assert_eq!(publish_artifact(dir.path(), &canonical).unwrap(), canonical);
        assert_eq!(find_artifact_candidates(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("log.txt"), b"x").unwrap();
        assert!(matches!(
            publish_artifact(dir.path(), &dir.path().join("splat.ply")),
            Err(JobError::ArtifactNotFound)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_artifact_is_published() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(&scratch).unwrap();
        fs::write(scratch.join("model.ply"), b"ply").unwrap();

        let output = dir.path().join("output");
        fs::create_dir_all(&output).unwrap();
        std::os::unix::fs::symlink(scratch.join("model.ply"), output.join("export.ply")).unwrap();

        let canonical = output.join("splat.ply");
        publish_artifact(&output, &canonical).unwrap();
        assert_eq!(fs::read(&canonical).unwrap(), b"ply");
    }
}
