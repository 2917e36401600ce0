//! Base64 data-URL grammar for images embedded in note content.
//!
//! Authoring-form content carries images as `src` values of the shape
//!
//! ```text
//! data:<type>/<subtype>[;<param>=<value>]*;base64,<standard base64>
//! ```
//!
//! Only `image/*` media types are recognised. The header is kept verbatim so
//! that rendering an [`EmbeddedImage`] reproduces the exact text it was
//! parsed from.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

const DATA_SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// An image carried inline as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// Everything between `data:` and the comma, e.g. `image/png;base64`.
    header: String,
    /// Standard-alphabet, padded base64 text.
    payload: String,
}

impl EmbeddedImage {
    /// Parse a data URL. Returns `None` for anything that is not a
    /// well-formed base64 image data URL.
    pub fn parse(src: &str) -> Option<Self> {
        let rest = src.strip_prefix(DATA_SCHEME)?;
        let (header, payload) = rest.split_once(',')?;

        let params = header.strip_suffix(BASE64_MARKER)?;
        let media_type = params.split(';').next()?;
        if !is_image_media_type(media_type) {
            return None;
        }
        if payload.is_empty() || STANDARD.decode(payload).is_err() {
            return None;
        }

        Some(Self {
            header: header.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Build an embedded image from raw bytes.
    pub fn from_bytes(media_type: &str, data: &[u8]) -> Self {
        Self {
            header: format!("{}{}", media_type, BASE64_MARKER),
            payload: STANDARD.encode(data),
        }
    }

    /// Rebuild an embedded image from a stored payload.
    pub fn from_stored(bytes: &[u8]) -> Option<Self> {
        std::str::from_utf8(bytes).ok().and_then(Self::parse)
    }

    /// Declared media type, e.g. `image/png`.
    pub fn media_type(&self) -> &str {
        self.header.split(';').next().unwrap_or_default()
    }

    /// Render back to `data:` URL text.
    pub fn to_data_url(&self) -> String {
        format!("{}{},{}", DATA_SCHEME, self.header, self.payload)
    }

    /// The bytes persisted in the content-addressed store.
    pub fn stored_bytes(&self) -> Vec<u8> {
        self.to_data_url().into_bytes()
    }
}

fn is_image_media_type(media_type: &str) -> bool {
    let Some((kind, subtype)) = media_type.split_once('/') else {
        return false;
    };
    kind.eq_ignore_ascii_case("image")
        && !subtype.is_empty()
        && subtype
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$&^_.+-".contains(&b))
}
