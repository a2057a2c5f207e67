//! Zip archive of selected project paths.

use super::error::BackupError;
use super::store::TEMP_SUFFIX;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A completed project archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub files_added: usize,
}

impl ArchiveHandle {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// What to put in a project archive.
#[derive(Debug, Clone)]
pub struct ArchiveSpec<'a> {
    pub project_root: &'a Path,
    /// Files or directories, relative to `project_root`.
    pub include: &'a [PathBuf],
    /// Entries whose relative path contains any of these are skipped.
    pub exclude: &'a [String],
}

impl ArchiveSpec<'_> {
    fn is_excluded(&self, relative: &Path) -> bool {
        let text = relative.to_string_lossy();
        self.exclude
            .iter()
            .any(|pattern| !pattern.is_empty() && text.contains(pattern.as_str()))
    }
}

/// True if `relative` names the project root or something below it.
fn stays_within_root(relative: &Path) -> bool {
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Zip entry name for a path relative to the project root, `/`-separated.
fn entry_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// Writes every included, non-excluded file into a deflated zip at
/// `destination`, keeping paths relative to the project root.
pub fn take_project_archive(
    spec: &ArchiveSpec<'_>,
    destination: &Path,
) -> Result<ArchiveHandle, BackupError> {
    let mut temp_name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    temp_name.push(TEMP_SUFFIX);
    let temp_path = destination.with_file_name(temp_name);

    let result = write_archive(spec, &temp_path).and_then(|files_added| {
        fs::rename(&temp_path, destination)?;
        let size_bytes = fs::metadata(destination)?.len();
        Ok(ArchiveHandle {
            path: destination.to_path_buf(),
            size_bytes,
            files_added,
        })
    });

    result.map_err(|e| {
        if temp_path.exists() {
            if let Err(remove_err) = fs::remove_file(&temp_path) {
                warn!(
                    "Failed to remove partial archive {:?}: {}",
                    temp_path, remove_err
                );
            }
        }
        BackupError::ArchiveFailed(format!("writing {:?}: {}", destination, e))
    })
}

fn write_archive(spec: &ArchiveSpec<'_>, path: &Path) -> io::Result<usize> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut files_added = 0;

    for item in spec.include {
        if !stays_within_root(item) {
            warn!("Skipping include path outside the project root: {:?}", item);
            continue;
        }
        let item_path = spec.project_root.join(item);
        if !item_path.exists() {
            debug!("Include path does not exist, skipping: {:?}", item_path);
            continue;
        }
        if item_path.is_file() {
            if let Some(item_name) = entry_name(item).filter(|_| !spec.is_excluded(item)) {
                add_file(&mut zip, &item_path, &item_name, options)?;
                files_added += 1;
            }
            continue;
        }

        let walker = WalkDir::new(&item_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                entry
                    .path()
                    .strip_prefix(spec.project_root)
                    .map(|relative| !spec.is_excluded(relative))
                    .unwrap_or(false)
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {:?}: {}", item_path, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(spec.project_root) else {
                continue;
            };
            let Some(name) = entry_name(relative) else {
                continue;
            };
            add_file(&mut zip, entry.path(), &name, options)?;
            files_added += 1;
        }
    }

    zip.finish().map_err(io::Error::other)?;
    Ok(files_added)
}

fn add_file(
    zip: &mut ZipWriter<File>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    let mut source = File::open(path)?;
    zip.start_file(name, options).map_err(io::Error::other)?;
    io::copy(&mut source, zip)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    fn archive_names(path: &Path) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    fn setup_project(root: &Path) {
        fs::create_dir_all(root.join("app/views")).unwrap();
        fs::create_dir_all(root.join("app/__pycache__")).unwrap();
        fs::create_dir_all(root.join("app/.git")).unwrap();
        fs::write(root.join("app/models.py"), "class Room: pass").unwrap();
        fs::write(root.join("app/views/rooms.py"), "def list(): pass").unwrap();
        fs::write(root.join("app/models.pyc"), "bytecode").unwrap();
        fs::write(root.join("app/__pycache__/models.cpython.pyc"), "bytecode").unwrap();
        fs::write(root.join("app/.git/HEAD"), "ref").unwrap();
        fs::write(root.join("manage.py"), "main()").unwrap();
    }

    #[test]
    fn test_archive_with_exclusions() {
        let project = TempDir::new().unwrap();
        setup_project(project.path());
        let out = TempDir::new().unwrap();
        let destination = out.path().join("project_files.zip");

        let include = vec![
            PathBuf::from("app"),
            PathBuf::from("manage.py"),
            PathBuf::from("missing.txt"),
        ];
        let exclude = vec![
            "__pycache__".to_string(),
            ".pyc".to_string(),
            ".git".to_string(),
        ];
        let spec = ArchiveSpec {
            project_root: project.path(),
            include: &include,
            exclude: &exclude,
        };

        let handle = take_project_archive(&spec, &destination).unwrap();
        assert_eq!(handle.files_added, 3);
        assert_eq!(handle.file_name(), "project_files.zip");
        assert!(handle.size_bytes > 0);

        assert_eq!(
            archive_names(&destination),
            vec!["app/models.py", "app/views/rooms.py", "manage.py"]
        );

        let mut archive = zip::ZipArchive::new(File::open(&destination).unwrap()).unwrap();
        let mut content = String::new();
        archive
            .by_name("app/views/rooms.py")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "def list(): pass");
    }

    #[test]
    fn test_rejects_paths_escaping_root() {
        let project = TempDir::new().unwrap();
        setup_project(project.path());
        let out = TempDir::new().unwrap();
        let destination = out.path().join("project_files.zip");

        let include = vec![PathBuf::from("../outside"), PathBuf::from("manage.py")];
        let spec = ArchiveSpec {
            project_root: project.path(),
            include: &include,
            exclude: &[],
        };

        let handle = take_project_archive(&spec, &destination).unwrap();
        assert_eq!(handle.files_added, 1);
        assert_eq!(archive_names(&destination), vec!["manage.py"]);
    }

    #[test]
    fn test_unwritable_destination_fails() {
        let project = TempDir::new().unwrap();
        setup_project(project.path());
        let destination = project.path().join("no/such/dir/project_files.zip");
        let include = vec![PathBuf::from("manage.py")];
        let spec = ArchiveSpec {
            project_root: project.path(),
            include: &include,
            exclude: &[],
        };

        let err = take_project_archive(&spec, &destination).unwrap_err();
        assert!(matches!(err, BackupError::ArchiveFailed(_)));
        assert!(!destination.exists());
    }
}
