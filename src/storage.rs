use rusqlite::Connection;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db;

/// Object-store location for homework submission files. Loaded from the
/// workspace `storage` settings; the daemon only builds URLs and keys, the
/// upload itself happens out of band.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub base_url: String,
    pub bucket: String,
}

pub fn load_settings(conn: &Connection) -> StorageSettings {
    let cfg = db::settings_get_json(conn, "storage").ok().flatten();
    let get = |key: &str, default: &str| {
        cfg.as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or(default)
            .to_string()
    };
    StorageSettings {
        base_url: get("baseUrl", "https://storage.classportal.example"),
        bucket: get("bucket", "submissions"),
    }
}

pub fn public_url(settings: &StorageSettings, key: &str) -> String {
    format!(
        "{}/{}/{}",
        settings.base_url.trim_end_matches('/'),
        settings.bucket,
        key
    )
}

/// Submission object key: scoped by uploader and assignment, stamped so
/// re-uploads of the same filename never collide.
pub fn generate_unique_key(user_id: &str, assignment_id: &str, filename: &str) -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!(
        "submissions/{}/{}/{}-{}",
        user_id,
        assignment_id,
        stamp,
        sanitize_filename(filename)
    )
}

fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

const MAX_DOCUMENT_BYTES: i64 = 10 * 1024 * 1024;
const MAX_VIDEO_BYTES: i64 = 50 * 1024 * 1024;

const ALLOWED_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "video/mp4",
    "video/quicktime",
    "video/x-msvideo",
    "video/webm",
];

/// Upload gate: fixed content-type allowlist, 10 MB for documents and
/// images, 50 MB for video.
pub fn validate_upload(content_type: &str, size: i64) -> Result<(), String> {
    if !ALLOWED_TYPES.contains(&content_type) {
        return Err(
            "invalid file type; allowed: PDF, images, Word documents, video (MP4, MOV, AVI, WebM)"
                .to_string(),
        );
    }
    let is_video = content_type.starts_with("video/");
    let max = if is_video {
        MAX_VIDEO_BYTES
    } else {
        MAX_DOCUMENT_BYTES
    };
    if size <= 0 {
        return Err("file size must be positive".to_string());
    }
    if size > max {
        return Err(if is_video {
            "video size must be less than 50MB".to_string()
        } else {
            "file size must be less than 10MB".to_string()
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_joins_base_bucket_key() {
        let settings = StorageSettings {
            base_url: "https://files.example.com/".to_string(),
            bucket: "portal".to_string(),
        };
        assert_eq!(
            public_url(&settings, "submissions/u/a/1-x.pdf"),
            "https://files.example.com/portal/submissions/u/a/1-x.pdf"
        );
    }

    #[test]
    fn unique_key_sanitizes_filename() {
        let key = generate_unique_key("user-1", "hw-1", "my report (final).pdf");
        assert!(key.starts_with("submissions/user-1/hw-1/"));
        assert!(key.ends_with("-my_report__final_.pdf"));
        assert!(!key.contains(' '));
    }

    #[test]
    fn validate_upload_enforces_allowlist_and_limits() {
        assert!(validate_upload("application/pdf", 1024).is_ok());
        assert!(validate_upload("video/mp4", 20 * 1024 * 1024).is_ok());
        assert!(validate_upload("application/zip", 10).is_err());
        assert!(validate_upload("application/pdf", 11 * 1024 * 1024).is_err());
        assert!(validate_upload("video/mp4", 51 * 1024 * 1024).is_err());
        assert!(validate_upload("application/pdf", 0).is_err());
    }
}
