//! MIME payload construction.
//!
//! Builds the full `multipart/mixed` message with CRLF line endings:
//! sanitized headers, optional text and HTML parts, and base64
//! attachment parts folded at 76 columns. The composer's output is the
//! canonical message and survives a lenient MIME parse verbatim;
//! dot-stuffing and the SMTP end-of-message terminator are wire framing,
//! applied by [`prepare_data`] when the transaction engine writes the
//! DATA payload.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use uuid::Uuid;

use crate::attachment::LoadedAttachment;
use crate::types::MailRequest;

/// Fallback media type for unknown extensions.
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Removes header-injection characters (CR, LF, TAB, VT, FF) from a
/// header value. Idempotent; no quoting or RFC 2047 encoding is applied.
pub fn sanitize_header(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t' | '\u{0B}' | '\u{0C}'))
        .collect()
}

/// Resolves a media type from a filename extension, case-insensitively.
/// Unknown or missing extensions fall back to `application/octet-stream`.
pub fn resolve_media_type(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_raw()
        .map(str::to_string)
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}

/// Builds SMTP DATA payloads from mail requests.
#[derive(Debug, Default)]
pub struct MimeComposer;

impl MimeComposer {
    /// Creates a composer.
    pub fn new() -> Self {
        Self
    }

    /// Composes the MIME message: headers, body parts, attachments, and
    /// the closing boundary. The output carries no SMTP framing; pass it
    /// through [`prepare_data`] before writing it in the DATA phase.
    pub fn compose(
        &self,
        from: &str,
        request: &MailRequest,
        attachments: &[LoadedAttachment],
    ) -> String {
        let boundary = generate_boundary();
        let mut message = String::new();

        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str(&format!("From: {}\r\n", sanitize_header(from)));
        message.push_str(&format!(
            "To: {}\r\n",
            sanitize_header(&request.to.join(", "))
        ));
        if !request.cc.is_empty() {
            message.push_str(&format!(
                "Cc: {}\r\n",
                sanitize_header(&request.cc.join(", "))
            ));
        }
        message.push_str(&format!(
            "Subject: {}\r\n",
            sanitize_header(&request.subject)
        ));
        message.push_str(&format!(
            "Content-Type: multipart/mixed; boundary=\"{}\"\r\n",
            boundary
        ));
        message.push_str("\r\n");

        if let Some(text) = &request.text {
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
            message.push_str("\r\n");
            message.push_str(text);
            message.push_str("\r\n\r\n");
        }

        if let Some(html) = &request.html {
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str("Content-Type: text/html; charset=utf-8\r\n");
            message.push_str("\r\n");
            message.push_str(html);
            message.push_str("\r\n\r\n");
        }

        for attachment in attachments {
            message.push_str(&format!("--{}\r\n", boundary));
            message.push_str(&format!("Content-Type: {}\r\n", attachment.content_type));
            message.push_str(&format!(
                "Content-Disposition: attachment; filename=\"{}\"\r\n",
                attachment.filename
            ));
            message.push_str("Content-Transfer-Encoding: base64\r\n");
            message.push_str("\r\n");
            let encoded = BASE64.encode(&attachment.data);
            for chunk in encoded.as_bytes().chunks(76) {
                message.push_str(std::str::from_utf8(chunk).unwrap_or_default());
                message.push_str("\r\n");
            }
            message.push_str("\r\n");
        }

        message.push_str(&format!("--{}--\r\n", boundary));

        message
    }
}

/// Generates a per-message boundary: `----` plus 32 hex characters from
/// a cryptographic RNG.
fn generate_boundary() -> String {
    format!("----{}", Uuid::new_v4().simple())
}

/// Frames a composed message for the DATA phase: dot-stuffs lines that
/// begin with `.` and appends the `<CRLF>.<CRLF>` end-of-message marker.
pub fn prepare_data(message: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(message.len() + 8);
    let mut at_line_start = true;

    for &byte in message {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        if output.ends_with(b"\n") {
            output.pop();
        }
        output.extend_from_slice(b"\r\n");
    }
    output.extend_from_slice(b".\r\n");
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MailRequest;

    fn request() -> MailRequest {
        MailRequest::builder()
            .to("recipient@example.com")
            .subject("Test Subject")
            .text("Hello World!")
            .build()
            .unwrap()
    }

    #[test]
    fn sanitizer_strips_control_characters() {
        assert_eq!(sanitize_header("a\r\nb\tc\u{0B}d\u{0C}e"), "abcde");
        assert_eq!(sanitize_header("plain subject"), "plain subject");
    }

    #[test]
    fn sanitizer_is_idempotent() {
        let once = sanitize_header("Subject\r\nX-Injected: gotcha");
        assert_eq!(sanitize_header(&once), once);
        assert!(!once.contains('\r'));
        assert!(!once.contains('\n'));
    }

    #[test]
    fn resolver_defaults_and_case() {
        assert_eq!(resolve_media_type("file.unknown"), OCTET_STREAM);
        assert_eq!(resolve_media_type("report.PDF"), "application/pdf");
        assert_eq!(resolve_media_type("photo.jpg"), "image/jpeg");
        assert_eq!(resolve_media_type("noextension"), OCTET_STREAM);
    }

    #[test]
    fn boundary_shape() {
        let boundary = generate_boundary();
        assert!(boundary.starts_with("----"));
        assert_eq!(boundary.len(), 4 + 32);
        assert!(boundary[4..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(boundary, generate_boundary());
    }

    #[test]
    fn composes_headers_and_text_part() {
        let message = MimeComposer::new().compose("sender@example.com", &request(), &[]);

        assert!(message.starts_with("MIME-Version: 1.0\r\n"));
        assert!(message.contains("From: sender@example.com\r\n"));
        assert!(message.contains("To: recipient@example.com\r\n"));
        assert!(message.contains("Subject: Test Subject\r\n"));
        assert!(message.contains("Content-Type: multipart/mixed; boundary=\"----"));
        assert!(message.contains("Content-Type: text/plain; charset=utf-8\r\n\r\nHello World!"));
        assert!(message.ends_with("--\r\n"));
        assert!(!message.ends_with(".\r\n"));
        assert!(!message.contains("Cc:"));
    }

    #[test]
    fn header_injection_is_defeated() {
        let request = MailRequest::builder()
            .to("recipient@example.com")
            .subject("Hi\r\nBcc: attacker@evil.com")
            .text("x")
            .build()
            .unwrap();
        let message = MimeComposer::new().compose("sender@example.com", &request, &[]);
        assert!(message.contains("Subject: HiBcc: attacker@evil.com\r\n"));
        assert!(!message.contains("\r\nBcc: attacker@evil.com"));
    }

    #[test]
    fn attachment_part_layout() {
        let attachment = LoadedAttachment {
            filename: "hello.txt".to_string(),
            content_type: "text/plain".to_string(),
            data: b"Hello, World!".to_vec(),
        };
        let message = MimeComposer::new().compose("sender@example.com", &request(), &[attachment]);

        assert!(message.contains("Content-Type: text/plain\r\n"));
        assert!(message.contains("Content-Disposition: attachment; filename=\"hello.txt\"\r\n"));
        assert!(message.contains("Content-Transfer-Encoding: base64\r\n"));
        assert!(message.contains(&BASE64.encode(b"Hello, World!")));
    }

    #[test]
    fn base64_lines_fold_at_76() {
        let attachment = LoadedAttachment {
            filename: "blob.bin".to_string(),
            content_type: OCTET_STREAM.to_string(),
            data: vec![0xAB; 600],
        };
        let message = MimeComposer::new().compose("sender@example.com", &request(), &[attachment]);
        for line in message.lines() {
            assert!(line.len() <= 78, "line too long: {}", line.len());
        }
    }

    #[test]
    fn compose_preserves_leading_dots() {
        let request = MailRequest::builder()
            .to("recipient@example.com")
            .subject("dots")
            .text("first\r\n.hidden\r\n..double")
            .build()
            .unwrap();
        let message = MimeComposer::new().compose("sender@example.com", &request, &[]);
        assert!(message.contains("\r\n.hidden\r\n"));
        assert!(!message.contains("\r\n..hidden"));
    }

    #[test]
    fn prepare_data_stuffs_dots_and_terminates() {
        let framed = prepare_data(b"first\r\n.hidden\r\n..double\r\n");
        let framed = String::from_utf8(framed).unwrap();
        assert!(framed.contains("\r\n..hidden\r\n"));
        assert!(framed.contains("\r\n...double"));
        assert!(framed.ends_with("\r\n.\r\n"));
    }

    #[test]
    fn prepare_data_completes_trailing_line() {
        assert_eq!(prepare_data(b"body"), b"body\r\n.\r\n".to_vec());
        assert_eq!(prepare_data(b"body\r\n"), b"body\r\n.\r\n".to_vec());
    }

    #[test]
    fn parts_recoverable_by_lenient_parse() {
        let attachment = LoadedAttachment {
            filename: "data.bin".to_string(),
            content_type: OCTET_STREAM.to_string(),
            data: vec![1, 2, 3, 4, 5],
        };
        let request = MailRequest::builder()
            .to("recipient@example.com")
            .cc("copy@example.com")
            .subject("Round trip")
            .text("plain body\r\n.leading dot line")
            .html("<p>html body</p>")
            .build()
            .unwrap();
        let message = MimeComposer::new().compose("sender@example.com", &request, &[attachment]);

        // Recover the boundary from the Content-Type header.
        let boundary_line = message
            .lines()
            .find(|l| l.starts_with("Content-Type: multipart/mixed"))
            .unwrap();
        let boundary = boundary_line.split('"').nth(1).unwrap();

        let parts: Vec<&str> = message.split(&format!("--{}", boundary)).collect();
        // Preamble, text, html, attachment, closing.
        assert_eq!(parts.len(), 5);
        assert!(parts[1].contains("plain body\r\n.leading dot line"));
        assert!(parts[2].contains("<p>html body</p>"));

        let body = parts[3].splitn(2, "\r\n\r\n").nth(1).unwrap();
        let b64: String = body.lines().filter(|l| !l.is_empty()).collect();
        assert_eq!(BASE64.decode(b64).unwrap(), vec![1, 2, 3, 4, 5]);
    }
}
