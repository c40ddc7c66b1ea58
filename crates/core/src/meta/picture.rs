use async_trait::async_trait;

use crate::extract::{Extractor, Flow, Picture, ProcessMessage, Processor, Step};

const PICTURE_SIZE: u32 = 800;
const PHOTO_SIZE: u32 = 1280;
const THUMBNAIL_SIZE: u32 = 380;

/// Loads the main picture of the first drop as `image`, plus a smaller
/// `thumbnail` copy.
///
/// Runs after [`super::ExtractMeta`], [`super::ExtractOembed`] and
/// [`super::SetDropProperties`].
pub struct ExtractPicture;

#[async_trait]
impl Processor for ExtractPicture {
    fn name(&self) -> &'static str {
        "extract_picture"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom || m.position() > 0 {
            return Flow::Continue;
        }
        let Some(d) = x.drop() else {
            return Flow::Continue;
        };

        let href =
            d.meta.lookup_get(&["x.picture_url", "graph.image", "twitter.image", "oembed.thumbnail_url"]).to_string();
        if href.is_empty() {
            return Flow::Continue;
        }
        let size = if d.document_type == "photo" { PHOTO_SIZE } else { PICTURE_SIZE };

        let mut picture = match Picture::new(&href, &d.url) {
            Ok(picture) => picture,
            Err(err) => {
                x.log().warn("invalid picture URL", &[("error", &err)]);
                return Flow::Continue;
            }
        };

        x.log().debug("loading picture", &[("href", &href)]);
        let client = x.client().clone();
        let transcoder = x.transcoder().clone();
        if let Err(err) = picture.load(&client, &transcoder, size, "").await {
            x.log().warn("cannot load picture", &[("error", &err), ("url", &href)]);
            return Flow::Continue;
        }
        x.log().debug("picture loaded", &[("size", &format!("{:?}", picture.size))]);

        let thumbnail = picture.copy(&transcoder, THUMBNAIL_SIZE, "").await;
        if let Some(d) = x.drop_mut() {
            d.pictures.insert("image".to_string(), picture);
        }
        match thumbnail {
            Ok(thumbnail) => {
                if let Some(d) = x.drop_mut() {
                    d.pictures.insert("thumbnail".to_string(), thumbnail);
                }
            }
            Err(err) => x.log().warn("cannot create thumbnail", &[("error", &err)]),
        }
        Flow::Continue
    }
}
