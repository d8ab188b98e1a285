use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

pub const JPEG_MIME: &str = "image/jpeg";

#[derive(Error, Debug)]
pub enum DataUrlError {
    #[error("not a data URL")]
    MissingScheme,
    #[error("data URL has no payload separator")]
    MissingPayload,
    #[error("only base64 data URLs are supported")]
    NotBase64,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A compressed still image ready to travel over the wire.
///
/// Both remote services exchange images as base64, either bare or wrapped
/// in a `data:` URL; this type owns the decoded bytes and the MIME type so
/// callers never juggle strings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedImage {
    mime: String,
    bytes: Vec<u8>,
}

impl EncodedImage {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    pub fn jpeg(bytes: Vec<u8>) -> Self {
        Self::new(JPEG_MIME, bytes)
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn from_data_url(url: &str) -> Result<Self, DataUrlError> {
        let rest = url.strip_prefix("data:").ok_or(DataUrlError::MissingScheme)?;
        let (header, payload) = rest.split_once(',').ok_or(DataUrlError::MissingPayload)?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or(DataUrlError::NotBase64)?;
        let mime = if mime.is_empty() { "text/plain" } else { mime };
        Ok(Self::new(mime, STANDARD.decode(payload.trim())?))
    }

    /// Decodes a bare base64 JPEG payload, as pushed by the streaming service.
    pub fn from_base64_jpeg(payload: &str) -> Result<Self, DataUrlError> {
        Ok(Self::jpeg(STANDARD.decode(payload.trim())?))
    }
}
