use base64::{prelude::BASE64_STANDARD, Engine};
use std::fmt::Display;

/// MIME type implied by a data URL which doesn't declare one (RFC 2397)
pub const DEFAULT_MEDIA_TYPE: &str = "text/plain;charset=US-ASCII";

/// A decoded `data:<mediatype>;base64,<payload>` URL, as produced by the browser's
/// FileReader.readAsDataURL() when a photo is uploaded
#[derive(Debug, PartialEq, Eq)]
pub struct DataUrl {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// Split the given string into its media type and its base64-decoded payload
    pub fn parse(url: &str) -> Result<Self, DataUrlError> {
        let rest = url.strip_prefix("data:").ok_or(DataUrlError::NotADataUrl)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUrlError::NotADataUrl)?;

        // Only base64-encoded payloads are supported, the marker must be the last parameter
        let media_type = header.split(';').next().unwrap_or("").trim();
        let is_base64 = header.rsplit(';').next()
            .map(|p| p.trim().eq_ignore_ascii_case("base64"))
            .unwrap_or(false);
        if !is_base64 || !header.contains(';') {
            return Err(DataUrlError::NotBase64);
        }

        let media_type = if media_type.is_empty() {
            DEFAULT_MEDIA_TYPE.to_string()
        } else {
            media_type.to_string()
        };
        let bytes = BASE64_STANDARD.decode(payload.trim())?;
        Ok(Self { media_type, bytes })
    }

    /// Keep this data URL only if it holds a raster image, which browsers never execute.
    /// SVG is excluded since it can embed scripts.
    pub fn into_raster_image(self) -> Result<Self, DataUrlError> {
        let media_type = self.media_type.to_ascii_lowercase();
        let is_raster = media_type.strip_prefix("image/")
            .map(|subtype| !subtype.is_empty() && !subtype.starts_with("svg"))
            .unwrap_or(false);
        if is_raster {
            Ok(self)
        } else {
            Err(DataUrlError::NotARasterImage(self.media_type))
        }
    }
}

/// Possible errors that can happen when decoding a data URL
#[derive(Debug)]
pub enum DataUrlError {
    NotADataUrl,
    NotBase64,
    Base64DecodeError(base64::DecodeError),
    NotARasterImage(String),
}

/// Create a Base64DecodeError variant from a base64::DecodeError, intended
/// to use for automatic transtyping
impl From<base64::DecodeError> for DataUrlError {
    fn from(error: base64::DecodeError) -> Self {
        DataUrlError::Base64DecodeError(error)
    }
}

impl Display for DataUrlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataUrlError::NotADataUrl => f.write_str("not a data URL"),
            DataUrlError::NotBase64 => f.write_str("data URL payload is not base64-encoded"),
            DataUrlError::Base64DecodeError(error) => write!(f, "invalid base64 payload : {}", error),
            DataUrlError::NotARasterImage(media_type) => write!(f, "\"{}\" is not a raster image type", media_type),
        }
    }
}
