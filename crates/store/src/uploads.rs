use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::StoreError;

/// Persists uploaded bytes under a name and hands back a reference relative to
/// the static-asset root.
pub trait BlobStore {
    fn store(
        &self,
        filename: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<String, StoreError>> + Send;
}

const DEFAULT_UPLOAD_DIR: &str = "uploads";
const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Flat upload directory under the static root.
///
/// Names collide by design: storing `a.png` twice keeps the second payload.
#[derive(Debug, Clone)]
pub struct UploadStore {
    static_root: PathBuf,
    upload_dir: String,
    io_timeout: Duration,
    protected: Vec<PathBuf>,
}

impl UploadStore {
    /// `upload_dir` is a `/`-separated path below `static_root`. A blank value
    /// or one containing `.` or `..` segments falls back to `uploads`.
    pub fn new(static_root: impl Into<PathBuf>, upload_dir: &str) -> Self {
        Self {
            static_root: static_root.into(),
            upload_dir: normalize_upload_dir(upload_dir)
                .unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            io_timeout: DEFAULT_IO_TIMEOUT,
            protected: Vec::new(),
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Refuses any upload whose target resolves to `path`.
    pub fn with_protected_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.protected.push(path.into());
        self
    }

    pub fn directory(&self) -> PathBuf {
        self.static_root.join(&self.upload_dir)
    }

    pub fn static_root(&self) -> &Path {
        &self.static_root
    }

    async fn is_protected(&self, target: &Path) -> bool {
        let resolved = tokio::fs::canonicalize(target).await.ok();
        for protected in &self.protected {
            if lexical(protected) == lexical(target) {
                return true;
            }
            if let Some(resolved) = &resolved
                && let Ok(protected) = tokio::fs::canonicalize(protected).await
                && &protected == resolved
            {
                return true;
            }
        }
        false
    }
}

impl BlobStore for UploadStore {
    async fn store(&self, filename: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let name = sanitize_upload_name(filename)?;
        let dir = self.directory();
        let target = dir.join(&name);

        if self.is_protected(&target).await {
            tracing::warn!(file = %name, "upload.protected_target");
            return Err(StoreError::InvalidFilename(filename.to_string()));
        }

        let write = async {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|err| StoreError::io(&dir, err))?;
            tokio::fs::write(&target, bytes)
                .await
                .map_err(|err| StoreError::io(&target, err))
        };
        tokio::time::timeout(self.io_timeout, write)
            .await
            .map_err(|_| StoreError::Timeout)??;

        tracing::info!(file = %name, bytes = bytes.len() as u64, "upload.stored");

        Ok(format!("{}/{}", self.upload_dir, name))
    }
}

/// Joins the non-empty segments of `raw`; `None` when nothing is left or a
/// segment is `.` or `..`.
pub fn normalize_upload_dir(raw: &str) -> Option<String> {
    let mut parts = Vec::new();
    for part in raw.split(['/', '\\']).map(str::trim) {
        match part {
            "" => continue,
            "." | ".." => return None,
            part => parts.push(part),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

fn lexical(path: &Path) -> Vec<Component<'_>> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Spaces become underscores; any directory part of the client-supplied name
/// is dropped so the result always lands inside the upload directory.
pub fn sanitize_upload_name(filename: &str) -> Result<String, StoreError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace(' ', "_");

    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(StoreError::InvalidFilename(filename.to_string()));
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spaces_become_underscores() {
        assert_eq!(sanitize_upload_name("My Photo.png").unwrap(), "My_Photo.png");
        assert_eq!(sanitize_upload_name(" a b .jpg").unwrap(), "_a_b_.jpg");
    }

    #[test]
    fn directory_components_are_dropped() {
        assert_eq!(sanitize_upload_name("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(
            sanitize_upload_name("C:\\Users\\me\\My Photo.png").unwrap(),
            "My_Photo.png"
        );
    }

    #[test]
    fn empty_and_dot_names_are_rejected() {
        for name in ["", "dir/", "..", ".", "a/.."] {
            let err = sanitize_upload_name(name).unwrap_err();
            assert_eq!(err.code(), "ERR_INVALID_PARAMS", "name {:?}", name);
        }
    }

    #[test]
    fn upload_dir_defaults_when_blank() {
        let store = UploadStore::new("static", "/");
        assert_eq!(store.directory(), PathBuf::from("static").join("uploads"));
    }

    #[test]
    fn upload_dir_with_dot_segments_falls_back() {
        for raw in [".", "./", "a/./b", "..", "a/../b"] {
            assert_eq!(normalize_upload_dir(raw), None, "dir {:?}", raw);
            let store = UploadStore::new("static", raw);
            assert_eq!(store.directory(), PathBuf::from("static").join("uploads"));
        }
        assert_eq!(normalize_upload_dir("/media//img/"), Some("media/img".to_string()));
    }
}
