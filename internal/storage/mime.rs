use std::path::Path;

/// Outcome of content identification for one uploaded object.
#[derive(Debug, Clone)]
pub struct Detection {
    pub content_type: String,
    pub extension: Option<String>,
    pub method: DetectionMethod,
    pub is_mismatch: bool,
    pub is_dangerous_mismatch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionMethod {
    Magic,
    Extension,
    Header,
    Heuristic,
    Fallback,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Magic => "magic",
            Self::Extension => "extension",
            Self::Header => "header",
            Self::Heuristic => "heuristic",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "magic" => Some(Self::Magic),
            "extension" => Some(Self::Extension),
            "header" => Some(Self::Header),
            "heuristic" => Some(Self::Heuristic),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

const ZIP_MIME: &str = "application/zip";
const OLE2_MIME: &str = "application/x-ole-storage";
const FALLBACK_MIME: &str = "application/octet-stream";

// Longest signatures first so e.g. PNG wins over any 2-byte prefix.
const MAGIC_TABLE: &[(&[u8], &str, &str)] = &[
    (
        &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1],
        OLE2_MIME,
        "bin",
    ),
    (
        &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
        "image/png",
        "png",
    ),
    (
        &[0x52, 0x61, 0x72, 0x21, 0x1A, 0x07, 0x00],
        "application/x-rar-compressed",
        "rar",
    ),
    (b"GIF87a", "image/gif", "gif"),
    (b"GIF89a", "image/gif", "gif"),
    (
        &[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C],
        "application/x-7z-compressed",
        "7z",
    ),
    (b"{\\rtf", "application/rtf", "rtf"),
    (b"<?xml", "application/xml", "xml"),
    (b"%PDF", "application/pdf", "pdf"),
    (&[0x50, 0x4B, 0x03, 0x04], ZIP_MIME, "zip"),
    (&[0x49, 0x49, 0x2A, 0x00], "image/tiff", "tif"),
    (&[0x4D, 0x4D, 0x00, 0x2A], "image/tiff", "tif"),
    (&[0x7F, 0x45, 0x4C, 0x46], "application/x-executable", "bin"),
    (&[0xFF, 0xD8, 0xFF], "image/jpeg", "jpg"),
    (&[0x42, 0x5A, 0x68], "application/x-bzip2", "bz2"),
    (&[0x49, 0x44, 0x33], "audio/mpeg", "mp3"),
    (&[0x1F, 0x8B], "application/gzip", "gz"),
    (&[0x4D, 0x5A], "application/x-msdownload", "exe"),
    (&[0x42, 0x4D], "image/bmp", "bmp"),
];

const MIME_EXTENSIONS: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/jpeg", "jpeg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/tiff", "tif"),
    ("image/tiff", "tiff"),
    ("image/bmp", "bmp"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/html", "htm"),
    ("text/csv", "csv"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
    ("application/json", "json"),
    (ZIP_MIME, "zip"),
    ("application/gzip", "gz"),
    ("application/x-7z-compressed", "7z"),
    ("application/x-rar-compressed", "rar"),
    ("application/msword", "doc"),
    ("application/vnd.ms-excel", "xls"),
    ("application/vnd.ms-powerpoint", "ppt"),
    ("application/vnd.ms-outlook", "msg"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/rtf", "rtf"),
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("video/mp4", "mp4"),
    ("video/x-msvideo", "avi"),
    ("application/x-msdownload", "exe"),
    (FALLBACK_MIME, "bin"),
];

const DANGEROUS_TYPES: &[&str] = &[
    "application/x-msdownload",
    "application/x-executable",
    "application/x-dosexec",
    "application/vnd.microsoft.portable-executable",
    "application/x-sh",
    "application/x-bat",
    "application/x-httpd-php",
    "application/javascript",
    "text/javascript",
    "text/html",
];

/// Identify content from the first chunk of an object, its filename and
/// the content type the client claimed. Resolution order: magic bytes
/// (with ZIP/OLE2 refinement), RIFF container, claimed type, filename
/// extension, printable-text heuristic, octet-stream fallback.
pub fn identify(
    first_chunk: &[u8],
    filename: Option<&str>,
    claimed_content_type: Option<&str>,
) -> Detection {
    let (content_type, extension, method) = detect(first_chunk, filename, claimed_content_type);
    let is_mismatch = claimed_content_type
        .map(|claimed| !claimed.eq_ignore_ascii_case(&content_type))
        .unwrap_or(false);
    let is_dangerous_mismatch = is_mismatch && is_dangerous_type(&content_type);
    Detection {
        content_type,
        extension,
        method,
        is_mismatch,
        is_dangerous_mismatch,
    }
}

pub fn is_dangerous_type(content_type: &str) -> bool {
    DANGEROUS_TYPES
        .iter()
        .any(|dangerous| dangerous.eq_ignore_ascii_case(content_type))
}

fn detect(
    first_chunk: &[u8],
    filename: Option<&str>,
    claimed_content_type: Option<&str>,
) -> (String, Option<String>, DetectionMethod) {
    if let Some((mime, ext)) = match_magic(first_chunk) {
        let (mime, ext) = refine_magic(first_chunk, filename, mime, ext);
        return (mime, Some(ext), DetectionMethod::Magic);
    }
    if let Some((mime, ext)) = match_riff(first_chunk) {
        return (mime.to_string(), Some(ext.to_string()), DetectionMethod::Magic);
    }
    if let Some(claimed) = claimed_content_type {
        if let Some(ext) = extension_for_mime(claimed) {
            return (
                claimed.to_ascii_lowercase(),
                Some(ext.to_string()),
                DetectionMethod::Header,
            );
        }
    }
    if let Some((mime, ext)) = match_extension(filename) {
        return (mime.to_string(), Some(ext), DetectionMethod::Extension);
    }
    if looks_like_text(first_chunk) {
        return (
            "text/plain".to_string(),
            Some("txt".to_string()),
            DetectionMethod::Heuristic,
        );
    }
    (
        FALLBACK_MIME.to_string(),
        Some("bin".to_string()),
        DetectionMethod::Fallback,
    )
}

fn match_magic(chunk: &[u8]) -> Option<(&'static str, &'static str)> {
    MAGIC_TABLE
        .iter()
        .find(|(signature, _, _)| chunk.starts_with(signature))
        .map(|(_, mime, ext)| (*mime, *ext))
}

fn refine_magic(
    chunk: &[u8],
    filename: Option<&str>,
    mime: &'static str,
    ext: &'static str,
) -> (String, String) {
    if mime == ZIP_MIME {
        if let Some((mime, ext)) = refine_zip(chunk) {
            return (mime.to_string(), ext.to_string());
        }
    }
    if mime == OLE2_MIME {
        if let Some((mime, ext)) = refine_ole2(filename) {
            return (mime.to_string(), ext.to_string());
        }
    }
    (mime.to_string(), ext.to_string())
}

// Walk the local file headers of a truncated ZIP looking for the OOXML
// content directories. Anything unparseable leaves the plain ZIP result.
fn refine_zip(chunk: &[u8]) -> Option<(&'static str, &'static str)> {
    if chunk.len() < 30 {
        return None;
    }
    let mut offset = 0usize;
    for _ in 0..64 {
        let header = chunk.get(offset..offset + 30)?;
        if &header[0..4] != [0x50, 0x4B, 0x03, 0x04] {
            return None;
        }
        let compressed_size = u32::from_le_bytes([header[18], header[19], header[20], header[21]]);
        let name_len = u16::from_le_bytes([header[26], header[27]]) as usize;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as usize;
        let name = chunk.get(offset + 30..offset + 30 + name_len)?;
        if name.starts_with(b"word/") {
            return Some((
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "docx",
            ));
        }
        if name.starts_with(b"xl/") {
            return Some((
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
                "xlsx",
            ));
        }
        if name.starts_with(b"ppt/") {
            return Some((
                "application/vnd.openxmlformats-officedocument.presentationml.presentation",
                "pptx",
            ));
        }
        if compressed_size == 0 {
            // Streamed entry sizes live in a trailing descriptor; the
            // next header offset is unknowable from a partial read.
            return None;
        }
        offset = offset + 30 + name_len + extra_len + compressed_size as usize;
    }
    None
}

fn refine_ole2(filename: Option<&str>) -> Option<(&'static str, &'static str)> {
    let ext = file_extension(filename?)?;
    match ext.as_str() {
        "doc" => Some(("application/msword", "doc")),
        "xls" => Some(("application/vnd.ms-excel", "xls")),
        "ppt" => Some(("application/vnd.ms-powerpoint", "ppt")),
        "msg" => Some(("application/vnd.ms-outlook", "msg")),
        _ => None,
    }
}

fn match_riff(chunk: &[u8]) -> Option<(&'static str, &'static str)> {
    if chunk.len() < 12 || &chunk[0..4] != b"RIFF" {
        return None;
    }
    match &chunk[8..12] {
        b"WEBP" => Some(("image/webp", "webp")),
        b"WAVE" => Some(("audio/wav", "wav")),
        b"AVI " => Some(("video/x-msvideo", "avi")),
        _ => None,
    }
}

fn extension_for_mime(mime: &str) -> Option<&'static str> {
    MIME_EXTENSIONS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(mime))
        .map(|(_, ext)| *ext)
}

fn match_extension(filename: Option<&str>) -> Option<(&'static str, String)> {
    let ext = file_extension(filename?)?;
    MIME_EXTENSIONS
        .iter()
        .find(|(_, known)| *known == ext)
        .map(|(mime, _)| (*mime, ext))
}

fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

const TEXT_THRESHOLD: f64 = 0.85;

fn looks_like_text(chunk: &[u8]) -> bool {
    if chunk.is_empty() {
        return false;
    }
    let printable = chunk
        .iter()
        .filter(|&&b| (0x20..0x7F).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r'))
        .count();
    printable as f64 / chunk.len() as f64 >= TEXT_THRESHOLD
}
