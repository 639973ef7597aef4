//! On-disk face library: one directory per person holding their photos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const PHOTO_EXTENSIONS: [&str; 3] = [".jpg", ".jpeg", ".png"];

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Person name cannot be empty")]
    EmptyName,
    #[error("Invalid person name")]
    InvalidName,
    #[error("Person '{0}' already exists")]
    AlreadyExists(String),
    #[error("Person '{0}' not found")]
    NotFound(String),
    #[error("Photo '{0}' not found")]
    PhotoNotFound(String),
    #[error("Invalid filename")]
    InvalidFilename,
    #[error("Invalid file type")]
    InvalidFileType,
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub photo_count: usize,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoInfo {
    pub filename: String,
    pub path: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
}

/// Whether `filename` has a photo extension (case-insensitive).
pub fn is_photo(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    PHOTO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Keep alphanumerics, space, `_` and `-`, then trim.
pub fn sanitize_name(raw: &str) -> Result<String, LibraryError> {
    if raw.trim().is_empty() {
        return Err(LibraryError::EmptyName);
    }
    let clean: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '_' | '-'))
        .collect();
    let clean = clean.trim();
    if clean.is_empty() {
        return Err(LibraryError::InvalidName);
    }
    Ok(clean.to_string())
}

fn has_traversal(component: &str) -> bool {
    component.is_empty() || component.contains("..") || component.contains('/') || component.contains('\\')
}

/// Root of the faces folder.
#[derive(Debug, Clone)]
pub struct FaceLibrary {
    root: PathBuf,
}

impl FaceLibrary {
    /// Open (and create if needed) the faces folder.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, LibraryError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of an existing person. Names that could escape the root are
    /// reported as not found.
    fn person_dir(&self, name: &str) -> Result<PathBuf, LibraryError> {
        if has_traversal(name) {
            return Err(LibraryError::NotFound(name.to_string()));
        }
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(LibraryError::NotFound(name.to_string()));
        }
        Ok(dir)
    }

    fn describe(&self, name: &str, dir: &Path) -> Result<Person, LibraryError> {
        Ok(Person {
            name: name.to_string(),
            photo_count: photo_files(dir)?.len(),
            path: dir.to_string_lossy().into_owned(),
        })
    }

    pub fn add_person(&self, raw_name: &str) -> Result<Person, LibraryError> {
        let name = sanitize_name(raw_name)?;
        let dir = self.root.join(&name);
        if dir.exists() {
            return Err(LibraryError::AlreadyExists(name));
        }
        fs::create_dir(&dir)?;
        tracing::info!(person = %name, "created person directory");
        self.describe(&name, &dir)
    }

    pub fn get_person(&self, name: &str) -> Result<Person, LibraryError> {
        let dir = self.person_dir(name)?;
        self.describe(name, &dir)
    }

    pub fn list_people(&self) -> Result<Vec<Person>, LibraryError> {
        let mut people = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            people.push(self.describe(&name, &entry.path())?);
        }
        people.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(people)
    }

    pub fn rename_person(&self, old: &str, raw_new: &str) -> Result<Person, LibraryError> {
        let old_dir = self.person_dir(old)?;
        let new = sanitize_name(raw_new)?;
        if new == old {
            return self.describe(old, &old_dir);
        }
        let new_dir = self.root.join(&new);
        if new_dir.exists() {
            return Err(LibraryError::AlreadyExists(new));
        }
        fs::rename(&old_dir, &new_dir)?;
        tracing::info!(from = old, to = %new, "renamed person");
        self.describe(&new, &new_dir)
    }

    pub fn delete_person(&self, name: &str) -> Result<(), LibraryError> {
        let dir = self.person_dir(name)?;
        fs::remove_dir_all(&dir)?;
        tracing::info!(person = name, "deleted person");
        Ok(())
    }

    /// Photos of a person, newest first.
    pub fn list_photos(&self, name: &str) -> Result<Vec<PhotoInfo>, LibraryError> {
        let dir = self.person_dir(name)?;
        let mut photos = Vec::new();
        for path in photo_files(&dir)? {
            let meta = fs::metadata(&path)?;
            photos.push(PhotoInfo {
                filename: path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: path.to_string_lossy().into_owned(),
                size_bytes: meta.len(),
                uploaded_at: meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
            });
        }
        photos.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(photos)
    }

    /// Store a photo. Returns `false` (and writes nothing) for non-image files.
    pub fn save_photo(&self, name: &str, filename: &str, bytes: &[u8]) -> Result<bool, LibraryError> {
        let dir = self.person_dir(name)?;
        if has_traversal(filename) {
            return Err(LibraryError::InvalidFilename);
        }
        if !is_photo(filename) {
            tracing::debug!(person = name, filename, "skipping non-image upload");
            return Ok(false);
        }
        fs::write(dir.join(filename), bytes)?;
        tracing::info!(person = name, filename, size = bytes.len(), "saved photo");
        Ok(true)
    }

    /// Store a batch of uploads. Every filename is checked before the first
    /// write, so a bad name leaves the folder untouched. Returns how many
    /// images were saved.
    pub fn save_photos<B: AsRef<[u8]>>(&self, name: &str, files: &[(String, B)]) -> Result<usize, LibraryError> {
        self.person_dir(name)?;
        if files.iter().any(|(filename, _)| has_traversal(filename)) {
            return Err(LibraryError::InvalidFilename);
        }
        let mut saved = 0;
        for (filename, bytes) in files {
            if self.save_photo(name, filename, bytes.as_ref())? {
                saved += 1;
            }
        }
        Ok(saved)
    }

    pub fn delete_photo(&self, name: &str, filename: &str) -> Result<(), LibraryError> {
        let dir = self.person_dir(name)?;
        if has_traversal(filename) {
            return Err(LibraryError::InvalidFilename);
        }
        let path = dir.join(filename);
        if !path.exists() {
            return Err(LibraryError::PhotoNotFound(filename.to_string()));
        }
        if !is_photo(filename) {
            return Err(LibraryError::InvalidFileType);
        }
        fs::remove_file(&path)?;
        tracing::info!(person = name, filename, "deleted photo");
        Ok(())
    }

    /// Every person directory with its photo paths, in name order.
    pub fn training_set(&self) -> Result<Vec<(String, Vec<PathBuf>)>, LibraryError> {
        self.list_people()?
            .into_iter()
            .map(|p| {
                let photos = photo_files(Path::new(&p.path))?;
                Ok((p.name, photos))
            })
            .collect()
    }
}

fn photo_files(dir: &Path) -> Result<Vec<PathBuf>, LibraryError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() && is_photo(&entry.file_name().to_string_lossy()) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn library() -> (TempDir, FaceLibrary) {
        let dir = TempDir::new().unwrap();
        let lib = FaceLibrary::open(dir.path().join("faces")).unwrap();
        (dir, lib)
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Jane Doe-2_x ").unwrap(), "Jane Doe-2_x");
        assert_eq!(sanitize_name("../etc/passwd").unwrap(), "etcpasswd");
        assert!(matches!(sanitize_name("   "), Err(LibraryError::EmptyName)));
        assert!(matches!(sanitize_name("!!!"), Err(LibraryError::InvalidName)));
    }

    #[test]
    fn test_is_photo_case_insensitive() {
        assert!(is_photo("a.JPG"));
        assert!(is_photo("b.jpeg"));
        assert!(is_photo("c.Png"));
        assert!(!is_photo("d.gif"));
        assert!(!is_photo("jpg"));
    }

    #[test]
    fn test_add_list_and_duplicate() {
        let (_tmp, lib) = library();
        let bob = lib.add_person("bob").unwrap();
        assert_eq!(bob.photo_count, 0);
        lib.add_person("alice!").unwrap();
        let names: Vec<String> = lib.list_people().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert!(matches!(lib.add_person("bob"), Err(LibraryError::AlreadyExists(n)) if n == "bob"));
    }

    #[test]
    fn test_list_ignores_loose_files() {
        let (_tmp, lib) = library();
        fs::write(lib.root().join("stray.jpg"), b"x").unwrap();
        lib.add_person("carol").unwrap();
        assert_eq!(lib.list_people().unwrap().len(), 1);
    }

    #[test]
    fn test_get_person_counts_only_photos() {
        let (_tmp, lib) = library();
        lib.add_person("dave").unwrap();
        assert!(lib.save_photo("dave", "one.jpg", b"1").unwrap());
        assert!(lib.save_photo("dave", "two.PNG", b"22").unwrap());
        assert!(!lib.save_photo("dave", "notes.txt", b"333").unwrap());
        assert_eq!(lib.get_person("dave").unwrap().photo_count, 2);
        assert!(matches!(lib.get_person("nobody"), Err(LibraryError::NotFound(_))));
        assert!(matches!(lib.get_person(".."), Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn test_rename_person() {
        let (_tmp, lib) = library();
        lib.add_person("erin").unwrap();
        lib.add_person("frank").unwrap();
        lib.save_photo("erin", "a.jpg", b"1").unwrap();

        assert_eq!(lib.rename_person("erin", "erin").unwrap().name, "erin");
        assert!(matches!(lib.rename_person("erin", "frank"), Err(LibraryError::AlreadyExists(_))));
        assert!(matches!(lib.rename_person("ghost", "x"), Err(LibraryError::NotFound(_))));

        let renamed = lib.rename_person("erin", "Erin B.").unwrap();
        assert_eq!(renamed.name, "Erin B");
        assert_eq!(renamed.photo_count, 1);
        assert!(lib.get_person("erin").is_err());
    }

    #[test]
    fn test_delete_person() {
        let (_tmp, lib) = library();
        lib.add_person("gina").unwrap();
        lib.save_photo("gina", "a.jpg", b"1").unwrap();
        lib.delete_person("gina").unwrap();
        assert!(lib.list_people().unwrap().is_empty());
        assert!(matches!(lib.delete_person("gina"), Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn test_photo_listing_and_deletion() {
        let (_tmp, lib) = library();
        lib.add_person("hank").unwrap();
        lib.save_photo("hank", "a.jpg", b"abc").unwrap();
        fs::write(lib.root().join("hank").join("readme.txt"), b"x").unwrap();

        let photos = lib.list_photos("hank").unwrap();
        assert_eq!(photos.len(), 1);
        assert_eq!(photos[0].filename, "a.jpg");
        assert_eq!(photos[0].size_bytes, 3);

        assert!(matches!(lib.delete_photo("hank", "../a.jpg"), Err(LibraryError::InvalidFilename)));
        assert!(matches!(lib.delete_photo("hank", "missing.jpg"), Err(LibraryError::PhotoNotFound(_))));
        assert!(matches!(lib.delete_photo("hank", "readme.txt"), Err(LibraryError::InvalidFileType)));
        lib.delete_photo("hank", "a.jpg").unwrap();
        assert!(lib.list_photos("hank").unwrap().is_empty());
    }

    #[test]
    fn test_save_photo_rejects_traversal() {
        let (_tmp, lib) = library();
        lib.add_person("ivy").unwrap();
        assert!(matches!(lib.save_photo("ivy", "../x.jpg", b"1"), Err(LibraryError::InvalidFilename)));
        assert!(matches!(lib.save_photo("ghost", "x.jpg", b"1"), Err(LibraryError::NotFound(_))));
    }

    #[test]
    fn test_save_photos_checks_every_name_first() {
        let (_tmp, lib) = library();
        lib.add_person("ivy").unwrap();
        let batch = vec![("a.jpg".to_string(), b"1".to_vec()), ("../b.jpg".to_string(), b"2".to_vec())];
        assert!(matches!(lib.save_photos("ivy", &batch), Err(LibraryError::InvalidFilename)));
        assert!(lib.list_photos("ivy").unwrap().is_empty());

        let batch = vec![("a.jpg".to_string(), b"1".to_vec()), ("notes.txt".to_string(), b"2".to_vec())];
        assert_eq!(lib.save_photos("ivy", &batch).unwrap(), 1);
        assert_eq!(lib.list_photos("ivy").unwrap().len(), 1);
    }

    #[test]
    fn test_training_set_includes_empty_people() {
        let (_tmp, lib) = library();
        lib.add_person("jack").unwrap();
        lib.add_person("kate").unwrap();
        lib.save_photo("kate", "b.jpg", b"1").unwrap();
        lib.save_photo("kate", "a.png", b"1").unwrap();
        let set = lib.training_set().unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set[0].0, "jack");
        assert!(set[0].1.is_empty());
        assert!(set[1].1[0].ends_with("a.png"));
    }
}
