use folio_contracts::{EditBatch, ProfileDocument, Record, SOCIAL_GITHUB, SOCIAL_LINKEDIN};
use folio_store::{BlobStore, DocumentStore, StoreError};

/// Image file posted alongside an edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Browsers post an empty file part when no file was chosen.
    pub fn is_present(&self) -> bool {
        !self.filename.is_empty() && !self.bytes.is_empty()
    }
}

/// Replaces every editable field of `current` with the batch contents.
///
/// Scalars are trimmed and overwritten unconditionally. Only the `linkedin`
/// and `github` social links are written; other links, `image_path` and
/// unknown top-level keys carry over from `current`.
pub fn apply_fields(current: ProfileDocument, batch: EditBatch) -> ProfileDocument {
    let mut social_links = current.social_links;
    social_links.insert(SOCIAL_LINKEDIN.to_string(), trim(batch.linkedin));
    social_links.insert(SOCIAL_GITHUB.to_string(), trim(batch.github));

    ProfileDocument {
        name: trim(batch.name),
        title: trim(batch.title),
        subtitle: trim(batch.subtitle),
        hero_text: trim(batch.hero_text),
        about_text: trim(batch.about_text),
        image_path: current.image_path,
        contact_email: trim(batch.contact_email),
        social_links,
        skills: retain(batch.skills),
        achievements: retain(batch.achievements),
        experience: retain(batch.experience),
        projects: retain(batch.projects),
        blogs: retain(batch.blogs),
        extra: current.extra,
    }
}

/// [`apply_fields`] plus the optional image.
///
/// A present image is written through `blobs` and `image_path` points at the
/// stored copy; otherwise `image_path` is left as it was.
pub async fn apply_edit<B: BlobStore>(
    current: ProfileDocument,
    batch: EditBatch,
    image: Option<ImageUpload>,
    blobs: &B,
) -> Result<ProfileDocument, StoreError> {
    let mut next = apply_fields(current, batch);

    if let Some(image) = image.filter(ImageUpload::is_present) {
        next.image_path = blobs.store(&image.filename, &image.bytes).await?;
    }

    Ok(next)
}

/// Load, reduce and save in one step. Returns the document as written.
///
/// Nothing guards the window between the load and the save; a concurrent
/// submission that saves in between is overwritten.
pub async fn submit_edit<B: BlobStore>(
    store: &DocumentStore,
    blobs: &B,
    batch: EditBatch,
    image: Option<ImageUpload>,
) -> Result<ProfileDocument, StoreError> {
    let current = store.load().await?;
    let next = apply_edit(current, batch, image, blobs).await?;
    store.save(&next).await?;
    Ok(next)
}

fn trim(value: String) -> String {
    value.trim().to_string()
}

fn retain<R: Record>(records: Vec<R>) -> Vec<R> {
    let submitted = records.len();
    let kept = records
        .into_iter()
        .map(Record::trimmed)
        .filter(Record::is_retained)
        .collect::<Vec<_>>();

    if kept.len() != submitted {
        tracing::debug!(
            kind = R::KIND,
            submitted,
            dropped = submitted - kept.len(),
            "edit.records_dropped"
        );
    }

    kept
}
