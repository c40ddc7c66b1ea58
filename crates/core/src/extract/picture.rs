use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use url::Url;

use crate::fetch::HttpClient;
use crate::img::{Encoded, Filter, Transcoder};
use crate::{Result, ScrapbookError};

/// A remote picture, fetched and resized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Picture {
    pub href: String,
    /// MIME type, `image/{format}`.
    #[serde(rename = "type")]
    pub mime: String,
    /// Pixel size as `[width, height]`.
    pub size: [u32; 2],
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl Picture {
    /// A picture for `src`, resolved against `base`.
    pub fn new(src: &str, base: &Url) -> Result<Self> {
        let href = base.join(src).map_err(|e| ScrapbookError::InvalidUrl(format!("{src}: {e}")))?;
        Ok(Self { href: href.to_string(), ..Default::default() })
    }

    /// Fetch the picture and fit it in a `size` square, encoded to `format`
    /// (empty keeps the source format).
    pub async fn load(&mut self, client: &HttpClient, transcoder: &Transcoder, size: u32, format: &str) -> Result<()> {
        let url = Url::parse(&self.href).map_err(|e| ScrapbookError::InvalidUrl(format!("{}: {e}", self.href)))?;
        let bytes = client.fetch(&url).await?.bytes().await?;
        let encoded = transcoder.transcode(bytes.to_vec(), filters(size, format)).await?;
        self.set(encoded);
        Ok(())
    }

    /// A resized copy of this picture.
    pub async fn copy(&self, transcoder: &Transcoder, size: u32, format: &str) -> Result<Picture> {
        let encoded = transcoder.transcode(self.bytes.clone(), filters(size, format)).await?;
        let mut picture = Picture { href: self.href.clone(), ..Default::default() };
        picture.set(encoded);
        Ok(picture)
    }

    fn set(&mut self, encoded: Encoded) {
        self.size = [encoded.width, encoded.height];
        self.mime = format!("image/{}", encoded.format);
        self.bytes = encoded.bytes;
    }

    /// `name` with the extension of the picture type.
    pub fn name(&self, name: &str) -> String {
        format!("{}.{}", name, self.mime.strip_prefix("image/").unwrap_or(&self.mime))
    }

    /// Base64 picture data, empty when nothing was loaded.
    pub fn encoded(&self) -> String {
        if self.bytes.is_empty() {
            return String::new();
        }
        STANDARD.encode(&self.bytes)
    }
}

fn filters(size: u32, format: &str) -> Vec<Filter> {
    vec![Filter::Fit(size, size), Filter::Format(format.to_string())]
}
