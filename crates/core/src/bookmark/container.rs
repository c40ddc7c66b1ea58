//! Zip container holding a saved bookmark.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use uuid::Uuid;
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use super::{BookmarkFile, drop_properties};
use crate::archiver::Archiver;
use crate::extract::Extractor;
use crate::{Result, ScrapbookError};

/// Archived document, relative to the container root.
pub const ARTICLE_FILE: &str = "article.html";
/// Folder holding archived resources.
pub const RESOURCE_DIR: &str = "_resources";

const IMAGE_DIR: &str = "img";

const EXTENSIONS: &[(&str, &str)] = &[
    ("application/javascript", ".js"),
    ("application/json", ".json"),
    ("application/ogg", ".ogx"),
    ("application/pdf", ".pdf"),
    ("application/rtf", ".rtf"),
    ("application/vnd.ms-fontobject", ".eot"),
    ("application/xhtml+xml", ".xhtml"),
    ("application/xml", ".xml"),
    ("audio/aac", ".aac"),
    ("audio/midi", ".midi"),
    ("audio/x-midi", ".midi"),
    ("audio/mpeg", ".mp3"),
    ("audio/ogg", ".oga"),
    ("audio/opus", ".opus"),
    ("audio/wav", ".wav"),
    ("audio/webm", ".weba"),
    ("font/otf", ".otf"),
    ("font/ttf", ".ttf"),
    ("font/woff", ".woff"),
    ("font/woff2", ".woff2"),
    ("image/bmp", ".bmp"),
    ("image/gif", ".gif"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/svg+xml", ".svg"),
    ("image/tiff", ".tiff"),
    ("image/vnd.microsoft.icon", ".ico"),
    ("image/webp", ".webp"),
    ("text/calendar", ".ics"),
    ("text/css", ".css"),
    ("text/csv", ".csv"),
    ("text/html", ".html"),
    ("text/javascript", ".js"),
    ("text/plain", ".txt"),
    ("video/mp2t", ".ts"),
    ("video/mp4", ".mp4"),
    ("video/mpeg", ".mpeg"),
    ("video/ogg", ".ogv"),
    ("video/webm", ".webm"),
    ("video/x-msvideo", ".avi"),
];

/// File extension for a content type, `.bin` when unknown.
pub fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    EXTENSIONS.iter().find(|(mime, _)| *mime == essence).map_or(".bin", |&(_, ext)| ext)
}

/// Stable file name of an archived resource.
pub fn resource_name(uri: &str, content_type: &str) -> String {
    format!("{}{}", Uuid::new_v5(&Uuid::NAMESPACE_URL, uri.as_bytes()).simple(), extension_for(content_type))
}

/// Write the zip container of an extraction to `path` and return its manifest.
///
/// Pictures and resources are stored as is, text entries are deflated.
/// The archived document is only written when there is one.
pub fn write_container(
    path: &Path, ex: &Extractor, archived: Option<&str>, archiver: Option<&Archiver>,
) -> Result<BTreeMap<String, BookmarkFile>> {
    let drop = ex.drop().ok_or(ScrapbookError::NoContent)?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(path)?);
    let mut files = BTreeMap::new();

    zip.add_directory(IMAGE_DIR, deflated)?;
    for (key, picture) in &drop.pictures {
        let name = format!("{IMAGE_DIR}/{}", picture.name(key));
        zip.start_file(name.as_str(), stored)?;
        zip.write_all(&picture.bytes)?;
        files.insert(
            key.clone(),
            BookmarkFile { name, content_type: picture.mime.clone(), size: Some(picture.size) },
        );
    }

    if let Some(html) = archived.filter(|h| !h.is_empty()) {
        zip.start_file(ARTICLE_FILE, deflated)?;
        zip.write_all(html.as_bytes())?;
        files.insert("article".to_string(), BookmarkFile::new(ARTICLE_FILE));
    }

    let assets = archiver.map(Archiver::assets).unwrap_or_default();
    if !assets.is_empty() {
        zip.add_directory(RESOURCE_DIR, deflated)?;
        for (uri, asset) in &assets {
            zip.start_file(format!("{RESOURCE_DIR}/{}", resource_name(uri, &asset.content_type)), stored)?;
            zip.write_all(&asset.data)?;
        }
    }

    zip.start_file("log", deflated)?;
    zip.write_all(ex.logs().join("\n").as_bytes())?;
    files.insert("log".to_string(), BookmarkFile::new("log"));

    zip.start_file("props.json", deflated)?;
    zip.write_all(&drop_properties(drop)?)?;
    files.insert("props".to_string(), BookmarkFile::new("props.json"));

    zip.finish()?;
    Ok(files)
}
