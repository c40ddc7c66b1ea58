use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

use crate::dom::Dom;
use crate::extract::{Extractor, Flow, Picture, ProcessMessage, Processor, Step};

static RX_ICON_SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)x\d+").expect("valid icon size regex"));

const ICON_SIZE: u32 = 48;
const DEFAULT_ICON_SIZE: u32 = 32;

/// Declared icons, largest first, then `/favicon.ico`.
fn candidates(dom: &Dom, base: &Url) -> Vec<Picture> {
    let doc = dom.document();
    let links = doc
        .xpath_elements(
            "//link[@href][@rel='icon' or @rel='shortcut icon' or @rel='shortcut-icon' or @rel='apple-touch-icon']",
        )
        .unwrap_or_default();

    let mut icons: Vec<Picture> = links
        .iter()
        .filter_map(|link| {
            let mut icon = Picture::new(link.attr("href")?.trim(), base).ok()?;
            let size = RX_ICON_SIZE
                .captures_iter(link.attr("sizes").unwrap_or_default())
                .filter_map(|c| c[1].parse::<u32>().ok())
                .max()
                .unwrap_or(DEFAULT_ICON_SIZE);
            icon.size = [size, size];
            Some(icon)
        })
        .collect();
    icons.sort_by(|a, b| b.size[0].cmp(&a.size[0]));

    if let Ok(mut icon) = Picture::new("/favicon.ico", base) {
        icon.size = [DEFAULT_ICON_SIZE, DEFAULT_ICON_SIZE];
        icons.push(icon);
    }
    icons
}

/// Loads the site icon of the first drop as the `icon` picture.
pub struct ExtractFavicon;

#[async_trait]
impl Processor for ExtractFavicon {
    fn name(&self) -> &'static str {
        "extract_favicon"
    }

    async fn process(&self, m: &mut ProcessMessage, x: &mut Extractor) -> Flow {
        if m.step() != Step::Dom || m.position() > 0 {
            return Flow::Continue;
        }
        let (Some(dom), Some(base)) = (m.dom.as_ref(), x.drop().map(|d| d.url.clone())) else {
            return Flow::Continue;
        };

        x.log().debug("loading icon", &[]);
        let client = x.client().clone();
        let transcoder = x.transcoder().clone();

        for mut icon in candidates(dom, &base) {
            if let Err(err) = icon.load(&client, &transcoder, ICON_SIZE, "png").await {
                x.log().debug("cannot load icon", &[("href", &icon.href), ("error", &err)]);
                continue;
            }
            x.log().debug("icon loaded", &[("href", &icon.href), ("size", &format!("{:?}", icon.size))]);
            if let Some(d) = x.drop_mut() {
                d.pictures.insert("icon".to_string(), icon);
            }
            break;
        }
        Flow::Continue
    }
}
