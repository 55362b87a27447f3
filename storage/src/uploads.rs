use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

const WRITE_PROBE: &str = ".pixrefiner-write-probe";

/// True if new files can be created in `dir`. Creates and removes a probe file, since the mode
/// bits alone say nothing about who owns the directory.
pub fn is_writable(dir: &Path) -> bool {
    let mode_allows = fs::metadata(dir)
        .map(|m| m.is_dir() && !m.permissions().readonly())
        .unwrap_or(false);
    if !mode_allows {
        return false;
    }

    let probe = dir.join(format!("{WRITE_PROBE}-{}", std::process::id()));
    match fs::OpenOptions::new().write(true).create_new(true).open(&probe) {
        Ok(_) => {
            fs::remove_file(&probe).ok();
            true
        }
        // Another thread is probing the same directory right now.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => true,
        Err(_) => false,
    }
}

/// Swap the last path segment of `url` for `file_name`.
pub fn replace_url_file_name(url: &str, file_name: &str) -> String {
    match url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{file_name}"),
        None => file_name.to_string(),
    }
}

/// Reduce a client-supplied file name to a safe basename with an extension.
pub fn sanitize_file_name(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect::<String>();
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '-').to_string();

    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Ok(cleaned),
        _ => Err(Error::InvalidFileName(name.to_string())),
    }
}

/// The directory uploads are written to, and the public URL it is served from.
#[derive(Debug, Clone)]
pub struct UploadsDir {
    root: PathBuf,
    base_url: String,
}

impl UploadsDir {
    pub fn new(root: impl Into<PathBuf>, base_url: &str) -> Self {
        UploadsDir {
            root: root.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(&self.root, e))
    }

    /// Public URL of a file inside the uploads directory.
    pub fn url_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>();
        Some(format!("{}/{}", self.base_url, segments.join("/")))
    }

    /// A path for `file_name` that doesn't clash with an existing file, or with the files that
    /// would be derived from it in any of `derived_extensions`. Clashes get a `-1`, `-2`, ...
    /// suffix on the stem.
    pub fn unique_path(&self, file_name: &str, derived_extensions: &[&str]) -> PathBuf {
        let (stem, ext) = file_name.rsplit_once('.').unwrap_or((file_name, ""));

        let taken = |candidate_stem: &str| {
            self.root.join(format!("{candidate_stem}.{ext}")).exists()
                || derived_extensions
                    .iter()
                    .any(|e| self.root.join(format!("{candidate_stem}.{e}")).exists())
        };

        if !taken(stem) {
            return self.root.join(file_name);
        }

        let mut n = 1u32;
        loop {
            let candidate = format!("{stem}-{n}");
            if !taken(&candidate) {
                return self.root.join(format!("{candidate}.{ext}"));
            }
            n += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use temp_dir::TempDir;

    use super::*;

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_file_name("../../etc/photo.jpg").unwrap(), "photo.jpg");
        assert_eq!(sanitize_file_name("C:\\pics\\my photo.PNG").unwrap(), "my-photo.PNG");
        assert_matches!(sanitize_file_name("noextension"), Err(Error::InvalidFileName(_)));
        assert_matches!(sanitize_file_name(".jpg"), Err(Error::InvalidFileName(_)));
    }

    #[test]
    fn urls_follow_directory_layout() {
        let uploads = UploadsDir::new("/srv/uploads", "https://example.com/uploads/");
        assert_eq!(
            uploads.url_for(Path::new("/srv/uploads/2024/05/photo.webp")),
            Some("https://example.com/uploads/2024/05/photo.webp".to_string())
        );
        assert_eq!(uploads.url_for(Path::new("/elsewhere/photo.webp")), None);
        assert_eq!(
            replace_url_file_name("https://example.com/uploads/photo.jpg", "photo.webp"),
            "https://example.com/uploads/photo.webp"
        );
    }

    #[test]
    fn unique_paths_avoid_derived_names() {
        let dir = TempDir::new().unwrap();
        let uploads = UploadsDir::new(dir.path(), "https://example.com/uploads");

        assert_eq!(uploads.unique_path("photo.jpg", &["webp"]), dir.child("photo.jpg"));

        fs::write(dir.child("photo.webp"), b"").unwrap();
        assert_eq!(uploads.unique_path("photo.jpg", &["webp"]), dir.child("photo-1.jpg"));

        fs::write(dir.child("photo-1.jpg"), b"").unwrap();
        assert_eq!(uploads.unique_path("photo.jpg", &["webp"]), dir.child("photo-2.jpg"));
    }

    #[test]
    fn writable_directory() {
        let dir = TempDir::new().unwrap();
        assert!(is_writable(dir.path()));
        assert!(!is_writable(&dir.child("missing")));

        let file = dir.child("file.txt");
        fs::write(&file, b"").unwrap();
        assert!(!is_writable(&file));
    }

    #[test]
    fn writable_check_leaves_no_probe_behind() {
        let dir = TempDir::new().unwrap();
        assert!(is_writable(dir.path()));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directory_is_not_writable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.child("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o555)).unwrap();

        assert!(!is_writable(&locked));
        assert_eq!(fs::read_dir(&locked).unwrap().count(), 0);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
