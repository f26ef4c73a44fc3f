use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::client::ClientError;
use crate::relay::types::{Attachment, AttachmentKind};

/// Media type for a file name, by extension.
pub fn media_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" | "log" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

/// Read a file and encode it as an attachment.
pub async fn load_attachment(path: &Path) -> Result<Attachment, ClientError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ClientError::Attachment(format!("{}: {e}", path.display())))?;

    let media_type = media_type_for(path);
    let kind = if media_type.starts_with("image/") {
        AttachmentKind::Image
    } else {
        AttachmentKind::File
    };

    Ok(Attachment {
        kind,
        data: STANDARD.encode(&bytes),
        media_type: Some(media_type.to_string()),
        name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
        size: Some(bytes.len() as u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for(Path::new("cat.PNG")), "image/png");
        assert_eq!(media_type_for(Path::new("report.pdf")), "application/pdf");
        assert_eq!(media_type_for(Path::new("notes.md")), "text/markdown");
        assert_eq!(media_type_for(Path::new("blob")), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_load_image_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pixel.png");
        std::fs::write(&image, b"png").unwrap();
        let attachment = load_attachment(&image).await.unwrap();
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.data, "cG5n");
        assert_eq!(attachment.name.as_deref(), Some("pixel.png"));
        assert_eq!(attachment.size, Some(3));

        let text = dir.path().join("notes.txt");
        std::fs::write(&text, "hello").unwrap();
        let attachment = load_attachment(&text).await.unwrap();
        assert_eq!(attachment.kind, AttachmentKind::File);
        assert_eq!(attachment.media_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_missing_file_is_attachment_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_attachment(&dir.path().join("nope.png")).await.unwrap_err();
        assert!(matches!(err, ClientError::Attachment(_)));
    }
}
