//! Content-addressed image blob store.
//!
//! Blobs live at `.drost/media/<session-slug>/<sha256>.<ext>`; history
//! only holds [`ImageRef`]s, resolved lazily when a provider adapter
//! asks for the bytes. An append-only `index.jsonl` records every put.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use drost_domain::error::{Error, Result};
use drost_domain::message::ImageRef;

pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(state_dir: &Path) -> Result<Self> {
        let root = state_dir.join("media");
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store an image blob, returning its reference. Idempotent: an
    /// existing blob with the same digest is not rewritten.
    pub fn put(&self, session_slug: &str, bytes: &[u8], mime_type: &str) -> Result<ImageRef> {
        let sha256 = hex::encode(Sha256::digest(bytes));
        let ext = ext_for_mime(mime_type);
        let dir = self.root.join(session_slug);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{sha256}.{ext}"));
        if !path.exists() {
            std::fs::write(&path, bytes)?;
            self.append_index(session_slug, &sha256, ext, mime_type, bytes.len())?;
        }

        Ok(ImageRef {
            sha256,
            ext: ext.to_owned(),
            mime_type: mime_type.to_owned(),
        })
    }

    /// Read a blob back. Scans session directories since the reference
    /// itself is location-independent.
    pub fn resolve(&self, image: &ImageRef) -> Result<Vec<u8>> {
        let file_name = format!("{}.{}", image.sha256, image.ext);
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let candidate = entry.path().join(&file_name);
            if candidate.exists() {
                return Ok(std::fs::read(candidate)?);
            }
        }
        Err(Error::NotFound(format!("media blob {file_name}")))
    }

    fn append_index(
        &self,
        session_slug: &str,
        sha256: &str,
        ext: &str,
        mime_type: &str,
        bytes: usize,
    ) -> Result<()> {
        let line = serde_json::to_string(&serde_json::json!({
            "timestamp": chrono::Utc::now(),
            "sessionSlug": session_slug,
            "sha256": sha256,
            "ext": ext,
            "mimeType": mime_type,
            "bytes": bytes,
        }))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join("index.jsonl"))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn ext_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}
