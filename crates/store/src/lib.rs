use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use folio_contracts::{
    Achievement, BlogPost, Experience, ProfileDocument, Project, SOCIAL_GITHUB, SOCIAL_LINKEDIN,
    Skill,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::Instrument;
use ulid::Ulid;

mod uploads;

pub use uploads::{BlobStore, UploadStore, normalize_upload_dir, sanitize_upload_name};

/// Container fields and the empty value each one is normalized to.
const LIST_FIELDS: [&str; 5] = ["skills", "achievements", "experience", "projects", "blogs"];
const MAP_FIELDS: [&str; 1] = ["social_links"];
const STRING_FIELDS: [&str; 1] = ["contact_email"];

#[derive(Debug)]
pub enum StoreError {
    Timeout,
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Encode(serde_json::Error),
    InvalidFilename(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Timeout => "ERR_STORE_TIMEOUT",
            StoreError::Io { .. } => "ERR_STORE_UNAVAILABLE",
            StoreError::Encode(_) => "ERR_INTERNAL",
            StoreError::InvalidFilename(_) => "ERR_INVALID_PARAMS",
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store operation timed out"),
            StoreError::Io { path, source } => {
                write!(f, "store io error at {}: {}", path.display(), source)
            }
            StoreError::Encode(err) => write!(f, "document encode error: {}", err),
            StoreError::InvalidFilename(name) => {
                write!(f, "upload filename {:?} is not usable", name)
            }
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io { source, .. } => Some(source),
            StoreError::Encode(err) => Some(err),
            _ => None,
        }
    }
}

/// Flat-file home of the profile document.
///
/// Holds no document state: every `load` re-reads the file, so the file is the
/// only source of truth. There is no lock between `load` and `save`; two
/// concurrent editors race and the last `save` wins. Each `save` replaces the
/// file through a rename, so readers always see one complete document.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
    io_timeout: Duration,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            io_timeout,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the document, seeding the default profile on first run.
    ///
    /// Malformed content never fails the call: it is logged and replaced by an
    /// empty, normalized document (which is not written back). Only real I/O
    /// failures surface as errors.
    pub async fn load(&self) -> Result<ProfileDocument, StoreError> {
        let raw = tokio::time::timeout(self.io_timeout, tokio::fs::read(&self.path))
            .await
            .map_err(|_| StoreError::Timeout)?;

        let raw = match raw {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };

        if raw.is_empty() {
            let document = default_document();
            self.save(&document).await?;
            tracing::info!(path = %self.path.display(), "document.seeded");
            return Ok(document);
        }

        Ok(decode_document(&raw))
    }

    pub async fn save(&self, document: &ProfileDocument) -> Result<(), StoreError> {
        let bytes = encode_document(document)?;
        let span = tracing::info_span!(
            "document.save",
            path = %self.path.display(),
            fingerprint = tracing::field::Empty,
            bytes = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async {
            let started = Instant::now();
            tracing::Span::current().record("fingerprint", document.fingerprint().as_str());
            tracing::Span::current().record("bytes", bytes.len() as u64);

            let result = self.replace_file(bytes).await;

            tracing::Span::current().record("latency_ms", started.elapsed().as_millis() as u64);
            match &result {
                Ok(()) => {
                    tracing::Span::current().record("outcome", "ok");
                    tracing::debug!("document.saved");
                }
                Err(err) => {
                    tracing::Span::current().record("outcome", "error");
                    tracing::warn!(error = %err, "document.save_failed");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Writes a sibling temp file and renames it over the document.
    ///
    /// The blocking job outlives a timed-out caller, so it checks `abandoned`
    /// before the rename and removes its temp file instead of publishing it.
    async fn replace_file(&self, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path.clone();
        let tmp = self.temp_path();
        let abandoned = Arc::new(AtomicBool::new(false));

        let job = tokio::task::spawn_blocking({
            let abandoned = Arc::clone(&abandoned);
            move || write_and_rename(&path, &tmp, &bytes, &abandoned)
        });

        match tokio::time::timeout(self.io_timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::io(
                &self.path,
                std::io::Error::other(join_err.to_string()),
            )),
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                Err(StoreError::Timeout)
            }
        }
    }

    // Unique per save so concurrent writers never share a temp file.
    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, Ulid::new()))
    }
}

fn write_and_rename(
    path: &Path,
    tmp: &Path,
    bytes: &[u8],
    abandoned: &AtomicBool,
) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
    }

    std::fs::write(tmp, bytes).map_err(|err| StoreError::io(tmp, err))?;

    if abandoned.load(Ordering::SeqCst) {
        let _ = std::fs::remove_file(tmp);
        return Err(StoreError::Timeout);
    }

    if let Err(err) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(StoreError::io(path, err));
    }

    Ok(())
}

/// Decodes stored bytes into a normalized document, never failing.
pub fn decode_document(raw: &[u8]) -> ProfileDocument {
    let mut map = match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            tracing::warn!(kind = json_kind(&other), "document.malformed_root");
            Map::new()
        }
        Err(err) => {
            tracing::warn!(error = %err, "document.malformed_json");
            Map::new()
        }
    };

    let filled = normalize(&mut map);
    if !filled.is_empty() {
        tracing::debug!(fields = ?filled, "document.normalized");
    }

    let reset = reset_mistyped_fields(&mut map);
    if !reset.is_empty() {
        tracing::warn!(fields = ?reset, "document.mistyped_fields");
    }

    serde_json::from_value::<ProfileDocument>(Value::Object(map)).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "document.malformed_fields");
        ProfileDocument::default()
    })
}

/// Replaces each known field whose value does not decode as its declared type
/// with that field's empty value. Well-typed fields and unknown keys are kept.
pub fn reset_mistyped_fields(map: &mut Map<String, Value>) -> Vec<String> {
    let Ok(Value::Object(empty)) = serde_json::to_value(ProfileDocument::default()) else {
        return Vec::new();
    };

    let mut reset = Vec::new();
    for (key, empty_value) in empty {
        let Some(value) = map.get(&key) else {
            continue;
        };

        let mut single = Map::with_capacity(1);
        single.insert(key.clone(), value.clone());
        if serde_json::from_value::<ProfileDocument>(Value::Object(single)).is_err() {
            map.insert(key.clone(), empty_value);
            reset.push(key);
        }
    }
    reset
}

/// Fills absent container fields and `contact_email` with empty values.
///
/// Returns the names of the fields that were added; running it again on the
/// result adds nothing.
pub fn normalize(map: &mut Map<String, Value>) -> Vec<&'static str> {
    let mut filled = Vec::new();

    for key in LIST_FIELDS {
        if !map.contains_key(key) {
            map.insert(key.to_string(), Value::Array(Vec::new()));
            filled.push(key);
        }
    }
    for key in MAP_FIELDS {
        if !map.contains_key(key) {
            map.insert(key.to_string(), Value::Object(Map::new()));
            filled.push(key);
        }
    }
    for key in STRING_FIELDS {
        if !map.contains_key(key) {
            map.insert(key.to_string(), Value::String(String::new()));
            filled.push(key);
        }
    }

    filled
}

/// Pretty JSON with four-space indentation.
pub fn encode_document(document: &ProfileDocument) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::with_capacity(4096);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    document
        .serialize(&mut serializer)
        .map_err(StoreError::Encode)?;
    Ok(out)
}

/// The example profile written on first run.
pub fn default_document() -> ProfileDocument {
    ProfileDocument {
        name: "Your Name".to_string(),
        title: "Software Developer".to_string(),
        subtitle: "Rust & Web Enthusiast".to_string(),
        hero_text: "I build efficient, user-friendly applications with modern web technologies."
            .to_string(),
        about_text: "Tell visitors who you are, what you study or work on, and what you care about."
            .to_string(),
        image_path: "uploads/default.jpeg".to_string(),
        contact_email: "you@example.com".to_string(),
        social_links: BTreeMap::from([
            (
                SOCIAL_LINKEDIN.to_string(),
                "https://www.linkedin.com/in/your-profile".to_string(),
            ),
            (
                SOCIAL_GITHUB.to_string(),
                "https://github.com/your-handle".to_string(),
            ),
        ]),
        skills: vec![
            Skill {
                name: "Rust".to_string(),
                icon: String::new(),
            },
            Skill {
                name: "SQL".to_string(),
                icon: String::new(),
            },
        ],
        achievements: vec![Achievement {
            title: "First Prize - Poster".to_string(),
            desc: "Won first prize at a college poster competition.".to_string(),
        }],
        experience: vec![Experience {
            year: "2025".to_string(),
            role: "Full Stack Developer".to_string(),
            company: "Example Technologies".to_string(),
            description: "Worked on front and back end.".to_string(),
        }],
        projects: vec![Project {
            name: "To-Do App".to_string(),
            desc: "Simple to-do list with local storage".to_string(),
            code: String::new(),
            demo: String::new(),
        }],
        blogs: vec![BlogPost {
            title: "My First Blog".to_string(),
            excerpt: "Intro to my journey".to_string(),
            content: "I started learning Rust...".to_string(),
            date: "2025-01-01".to_string(),
        }],
        extra: BTreeMap::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
