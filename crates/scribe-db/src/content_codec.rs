//! Conversion between authoring-form and stored-form note content.
//!
//! Authoring form carries images inline:
//!
//! ```text
//! before <img class="wide" src="data:image/png;base64,iVBORw0KGgo=" /> after
//! ```
//!
//! Stored form replaces each `src` value with the digest of the stored payload:
//!
//! ```text
//! before <img class="wide" src="0f3c…9ab1" /> after
//! ```
//!
//! Only the `src` value changes; every other byte of the tag (attributes,
//! quoting, self-closing slash) is preserved verbatim.
//!
//! ## Tag grammar
//!
//! - A tag starts at `<img` (case-insensitive, followed by a word boundary) and
//!   ends at the first `>`.
//! - Its source is the first `src` attribute preceded by whitespace, with the
//!   value in double or single quotes.
//! - The value is classified as an [`ImageSource`].

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use scribe_core::{Digest, EmbeddedImage, Error, Result};
use tracing::{debug, error, trace, warn};

use crate::file_storage::ContentAddressedStore;

static IMG_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<img\b[^>]*>").expect("static regex is valid"));

static SRC_ATTR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("static regex is valid")
});

/// What an image tag's `src` points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// Inline base64 data URL (authoring form).
    Embedded(EmbeddedImage),
    /// Digest of a stored payload (stored form).
    Reference(Digest),
    /// A `data:` URL that does not parse as a base64 image.
    Malformed,
    /// Anything else, e.g. a remote URL. Never touched.
    External,
}

impl ImageSource {
    /// Classify a raw `src` attribute value.
    pub fn classify(src: &str) -> Self {
        if Digest::is_canonical(src) {
            return Digest::parse(src).map_or(Self::External, Self::Reference);
        }
        if let Some(image) = EmbeddedImage::parse(src) {
            return Self::Embedded(image);
        }
        if src
            .get(..5)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
        {
            return Self::Malformed;
        }
        Self::External
    }
}

/// One `<img>` tag found in content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTag {
    /// Byte range of the `src` value (inside the quotes) in the scanned text.
    pub src: Range<usize>,
    pub source: ImageSource,
}

/// Find every image tag in `text`, left to right.
pub fn scan_image_tags(text: &str) -> Vec<ImageTag> {
    IMG_TAG
        .find_iter(text)
        .filter_map(|tag| {
            let caps = SRC_ATTR.captures(tag.as_str())?;
            let value = caps.get(1).or_else(|| caps.get(2))?;
            let start = tag.start() + value.start();
            let end = tag.start() + value.end();
            Some(ImageTag {
                src: start..end,
                source: ImageSource::classify(value.as_str()),
            })
        })
        .collect()
}

/// Stored-form content plus the digests it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedContent {
    pub stored_text: String,
    /// Digests in order of appearance, duplicates included.
    pub digests: Vec<Digest>,
}

/// Bidirectional authoring ⇄ stored transform.
///
/// The codec knows nothing about notes; it only drives the store.
#[derive(Clone)]
pub struct ContentCodec {
    store: Arc<ContentAddressedStore>,
}

impl ContentCodec {
    pub fn new(store: Arc<ContentAddressedStore>) -> Self {
        Self { store }
    }

    /// Rewrite embedded images as digest references, storing each payload.
    ///
    /// Malformed embeds are left untouched. Tags that already hold a digest
    /// are kept and reported, provided the store backs them.
    ///
    /// # Errors
    ///
    /// `Error::MissingPayload` if a digest reference has no stored payload;
    /// store errors are returned unchanged.
    pub async fn encode(&self, authoring: &str) -> Result<EncodedContent> {
        let tags = scan_image_tags(authoring);
        let mut stored_text = String::with_capacity(authoring.len());
        let mut digests = Vec::with_capacity(tags.len());
        let mut cursor = 0;

        for tag in tags {
            let digest = match tag.source {
                ImageSource::Embedded(image) => {
                    trace!(
                        subsystem = "codec",
                        op = "encode",
                        media_type = image.media_type(),
                        "Storing embedded image"
                    );
                    self.store.put(&image.stored_bytes()).await?
                }
                ImageSource::Reference(digest) => {
                    if !self.store.exists(&digest).await? {
                        return Err(Error::MissingPayload(digest));
                    }
                    digest
                }
                ImageSource::Malformed => {
                    warn!(
                        subsystem = "codec",
                        op = "encode",
                        offset = tag.src.start,
                        "Malformed embedded image left untouched"
                    );
                    continue;
                }
                ImageSource::External => continue,
            };

            trace!(subsystem = "codec", op = "encode", digest = %digest, "Image tag rewritten");
            stored_text.push_str(&authoring[cursor..tag.src.start]);
            stored_text.push_str(digest.as_str());
            cursor = tag.src.end;
            digests.push(digest);
        }
        stored_text.push_str(&authoring[cursor..]);

        debug!(
            subsystem = "codec",
            op = "encode",
            image_count = digests.len(),
            "Content encoded"
        );
        Ok(EncodedContent {
            stored_text,
            digests,
        })
    }

    /// Expand digest references back into embedded data URLs.
    ///
    /// Each distinct digest is read from the store once.
    ///
    /// # Errors
    ///
    /// `Error::MissingPayload` if a referenced payload is absent,
    /// `Error::CorruptPayload` if it is not an embedded image.
    pub async fn decode(&self, stored: &str) -> Result<String> {
        let mut authoring = String::with_capacity(stored.len());
        let mut resolved: HashMap<Digest, String> = HashMap::new();
        let mut cursor = 0;

        for tag in scan_image_tags(stored) {
            let ImageSource::Reference(digest) = tag.source else {
                continue;
            };

            if !resolved.contains_key(&digest) {
                let data_url = self.resolve(&digest).await?;
                resolved.insert(digest.clone(), data_url);
            }

            authoring.push_str(&stored[cursor..tag.src.start]);
            authoring.push_str(&resolved[&digest]);
            cursor = tag.src.end;
        }
        authoring.push_str(&stored[cursor..]);

        Ok(authoring)
    }

    async fn resolve(&self, digest: &Digest) -> Result<String> {
        let bytes = match self.store.get(digest).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                error!(
                    subsystem = "codec",
                    op = "decode",
                    digest = %digest,
                    "Image reference has no stored payload"
                );
                return Err(Error::MissingPayload(digest.clone()));
            }
            Err(e) => return Err(e),
        };
        EmbeddedImage::from_stored(&bytes)
            .map(|image| image.to_data_url())
            .ok_or_else(|| Error::CorruptPayload(digest.clone()))
    }
}
