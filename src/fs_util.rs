use std::fs;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tar::Archive;
use tracing::warn;
use zip::ZipArchive;

use crate::error::PipelineError;

/// Decodes a (possibly multi-member / BGZF) gzip file into `target`,
/// truncating anything already there.
pub fn gunzip(archive: &Path, target: &Path) -> Result<u64, PipelineError> {
    let file = fs::File::open(archive)
        .map_err(|err| PipelineError::Filesystem(format!("open {}: {err}", archive.display())))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let out = fs::File::create(target).map_err(|err| {
        PipelineError::Filesystem(format!("create {}: {err}", target.display()))
    })?;
    let mut writer = BufWriter::new(out);
    let bytes = io::copy(&mut decoder, &mut writer)
        .map_err(|err| PipelineError::Filesystem(format!("decode {}: {err}", archive.display())))?;
    writer
        .flush()
        .map_err(|err| PipelineError::Filesystem(format!("write {}: {err}", target.display())))?;
    Ok(bytes)
}

/// Unpacks the regular-file entries of a zip accepted by `keep`. Directories,
/// symlinks and everything else are left in the archive.
pub fn extract_zip<F>(zip_path: &Path, target_dir: &Path, keep: F) -> Result<usize, PipelineError>
where
    F: Fn(&Path) -> bool,
{
    let file = fs::File::open(zip_path).map_err(|err| {
        PipelineError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| PipelineError::Filesystem(err.to_string()))?;

    let mut unpacked = 0;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(PipelineError::Filesystem(format!(
                "zip entry {} escapes the extraction directory",
                entry.name()
            )));
        };
        if !entry.is_file() || !keep(relative.as_path()) {
            continue;
        }
        let target = target_dir.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        }
        let mut out = fs::File::create(&target).map_err(|err| {
            PipelineError::Filesystem(format!("create {}: {err}", target.display()))
        })?;
        io::copy(&mut entry, &mut out)
            .map_err(|err| PipelineError::Filesystem(format!("unzip {}: {err}", relative.display())))?;
        unpacked += 1;
    }
    Ok(unpacked)
}

/// Tar counterpart of [`extract_zip`]. Links are never materialised.
pub fn extract_tar<F>(
    tar_path: &Path,
    target_dir: &Path,
    gzipped: bool,
    keep: F,
) -> Result<usize, PipelineError>
where
    F: Fn(&Path) -> bool,
{
    let file = fs::File::open(tar_path).map_err(|err| {
        PipelineError::Filesystem(format!("open tar {}: {err}", tar_path.display()))
    })?;
    let reader: Box<dyn io::Read> = if gzipped {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;

    let mut unpacked = 0;
    for entry in entries {
        let mut entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            let name = entry.path().map(|path| path.display().to_string()).unwrap_or_default();
            warn!(archive = %tar_path.display(), entry = %name, "skipping link entry");
            continue;
        }
        let wanted = entry_type.is_file()
            && entry.path().map(|path| keep(&*path)).unwrap_or(false);
        if !wanted {
            continue;
        }
        let inside = entry
            .unpack_in(target_dir)
            .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        if !inside {
            return Err(PipelineError::Filesystem(format!(
                "tar entry in {} escapes the extraction directory",
                tar_path.display()
            )));
        }
        unpacked += 1;
    }
    Ok(unpacked)
}

pub fn list_files<F>(dir: &Path, keep: F) -> Result<Vec<PathBuf>, PipelineError>
where
    F: Fn(&Path) -> bool,
{
    let entries = fs::read_dir(dir)
        .map_err(|err| PipelineError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_file() && keep(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

pub fn list_dirs(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| PipelineError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Regular files under `root` at any depth accepted by `keep`, sorted by path.
/// Symlinks are neither followed nor returned.
pub fn walk_files<F>(root: &Path, keep: F) -> Result<Vec<PathBuf>, PipelineError>
where
    F: Fn(&Path) -> bool,
{
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path)
            .map_err(|err| PipelineError::Filesystem(format!("read {}: {err}", path.display())))?;
        for entry in entries {
            let entry = entry.map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let file_type = entry
                .file_type()
                .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() && keep(&path) {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

pub fn recreate_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|err| PipelineError::Filesystem(format!("clear {}: {err}", dir.display())))?;
    }
    fs::create_dir_all(dir)
        .map_err(|err| PipelineError::Filesystem(format!("create {}: {err}", dir.display())))
}

pub fn move_file(from: &Path, to: &Path) -> Result<(), PipelineError> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to).map_err(|err| {
        PipelineError::Filesystem(format!("move {} -> {}: {err}", from.display(), to.display()))
    })?;
    fs::remove_file(from).map_err(|err| PipelineError::Filesystem(err.to_string()))
}
