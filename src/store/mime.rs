/// Sniff the MIME type from content, falling back to the file name
pub fn detect_mime_type(buffer: &[u8], filename: &str) -> String {
    if let Some(kind) = infer::get(buffer) {
        return kind.mime_type().to_string();
    }
    let guessed = guess_mime_from_extension(filename);
    if guessed == "application/octet-stream" && is_probably_text(buffer) {
        return "text/plain".to_string();
    }
    guessed
}

/// Guess MIME type based on filename extension
pub fn guess_mime_from_extension(filename: &str) -> String {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        // Office documents
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "rtf" => "application/rtf",
        "epub" => "application/epub+zip",
        // Mail
        "eml" => "message/rfc822",
        "msg" => "application/vnd.ms-outlook",
        // Text
        "txt" => "text/plain",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "xml" => "application/xml",
        "json" => "application/json",
        // Images and scans
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "heic" => "image/heic",
        "svg" => "image/svg+xml",
        // Archives
        "zip" => "application/zip",
        "7z" => "application/x-7z-compressed",
        "rar" => "application/vnd.rar",
        "gz" => "application/gzip",
        "tar" => "application/x-tar",
        // Media
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Best-effort heuristic for deciding if a buffer is plain text.
pub fn is_probably_text(buffer: &[u8]) -> bool {
    if buffer.is_empty() {
        return true;
    }

    // NUL is a strong binary signal.
    if buffer.contains(&0) {
        return false;
    }

    if std::str::from_utf8(buffer).is_err() {
        return false;
    }

    let control_count = buffer
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
        .count();

    // If >10% of bytes are control characters, treat as binary-ish.
    control_count * 10 <= buffer.len()
}
