//! Attachment loading.
//!
//! Resolves an [`Attachment`](crate::types::Attachment) into in-memory
//! bytes with a presented filename and media type. Path-based entries
//! are normalized, resolved against the process CWD, and read fully;
//! inline entries adopt their bytes directly.

use std::path::{Component, Path, PathBuf};

use crate::errors::{MailError, MailResult};
use crate::mime::resolve_media_type;
use crate::types::{Attachment, AttachmentContent};

/// An attachment resolved to bytes, ready for composition.
#[derive(Debug, Clone)]
pub struct LoadedAttachment {
    /// Filename presented to the recipient.
    pub filename: String,
    /// Media type of the part.
    pub content_type: String,
    /// Raw content.
    pub data: Vec<u8>,
}

/// Loads one attachment entry.
///
/// Returns `Ok(None)` for entries with neither a path nor inline
/// content; such entries are skipped. Path failures (missing file,
/// unreadable file, directory instead of file) surface as
/// `EATTACHMENT`.
pub async fn load(attachment: &Attachment) -> MailResult<Option<LoadedAttachment>> {
    if let Some(path) = &attachment.path {
        return load_from_path(attachment, path).await.map(Some);
    }

    if let Some(content) = &attachment.content {
        let data = match content {
            AttachmentContent::Bytes(bytes) => bytes.clone(),
            AttachmentContent::Text(text) => text.clone().into_bytes(),
        };
        let filename = attachment
            .filename
            .clone()
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = attachment
            .content_type
            .clone()
            .unwrap_or_else(|| resolve_media_type(&filename));
        return Ok(Some(LoadedAttachment {
            filename,
            content_type,
            data,
        }));
    }

    Ok(None)
}

async fn load_from_path(attachment: &Attachment, path: &Path) -> MailResult<LoadedAttachment> {
    let resolved = resolve(path)
        .map_err(|e| attachment_error(path, format!("cannot resolve path: {}", e)))?;

    let metadata = tokio::fs::metadata(&resolved)
        .await
        .map_err(|e| attachment_error(&resolved, format!("not accessible: {}", e)))?;
    if !metadata.is_file() {
        return Err(attachment_error(&resolved, "not a regular file"));
    }

    let data = tokio::fs::read(&resolved)
        .await
        .map_err(|e| attachment_error(&resolved, format!("cannot read: {}", e)))?;

    let filename = derive_filename(attachment.filename.as_deref(), &resolved);
    let content_type = attachment
        .content_type
        .clone()
        .unwrap_or_else(|| resolve_media_type(&filename));

    Ok(LoadedAttachment {
        filename,
        content_type,
        data,
    })
}

/// Makes the path absolute against the CWD and resolves `.`/`..`
/// components lexically.
fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Uses the caller's filename when given, borrowing the resolved path's
/// extension if the caller's name lacks one; otherwise the basename of
/// the resolved path.
fn derive_filename(requested: Option<&str>, resolved: &Path) -> String {
    let basename = resolved
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "attachment".to_string());

    match requested {
        None => basename,
        Some(name) => {
            let has_extension = Path::new(name).extension().is_some();
            match (has_extension, resolved.extension()) {
                (false, Some(ext)) => format!("{}.{}", name, ext.to_string_lossy()),
                _ => name.to_string(),
            }
        }
    }
}

fn attachment_error(path: &Path, detail: impl std::fmt::Display) -> MailError {
    MailError::attachment(format!("Attachment {}: {}", path.display(), detail))
        .with_context("path", path.display().to_string())
}
