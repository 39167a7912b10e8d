//! Response classification.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use percent_encoding::percent_decode_str;
use serde_json::{Value, json};

use crate::HttpResponse;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePayload {
    Json(Value),
    Text(String),
    /// A `Content-Disposition: attachment` download.
    Attachment {
        filename: Option<String>,
        content_type: String,
        bytes: Bytes,
    },
    Binary {
        content_type: String,
        bytes: Bytes,
    },
}

impl ResponsePayload {
    /// Classifies a response by its `Content-Disposition` and `Content-Type`.
    ///
    /// Attachments win over everything else. JSON content types that fail to
    /// parse degrade to text. Without a content type the body is sniffed: JSON
    /// first, then UTF-8 text, then raw bytes.
    pub fn classify(response: &HttpResponse) -> Self {
        let content_type = response
            .header("content-type")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();

        if let Some(disposition) = response.header("content-disposition")
            && disposition.to_ascii_lowercase().starts_with("attachment")
        {
            return ResponsePayload::Attachment {
                filename: attachment_filename(disposition),
                content_type: non_empty_or_octet(&content_type),
                bytes: response.body.clone(),
            };
        }

        if response.body.is_empty() {
            return ResponsePayload::Json(Value::Null);
        }

        if content_type.contains("json") {
            return match serde_json::from_slice(&response.body) {
                Ok(value) => ResponsePayload::Json(value),
                Err(_) => ResponsePayload::Text(response.text()),
            };
        }

        if is_textual(&content_type) {
            return ResponsePayload::Text(response.text());
        }

        if content_type.is_empty() {
            if let Ok(value) = serde_json::from_slice(&response.body) {
                return ResponsePayload::Json(value);
            }
            if let Ok(text) = std::str::from_utf8(&response.body) {
                return ResponsePayload::Text(text.to_string());
            }
        }

        ResponsePayload::Binary {
            content_type: non_empty_or_octet(&content_type),
            bytes: response.body.clone(),
        }
    }

    /// JSON representation stored in state.
    ///
    /// Binary payloads become `{filename?, contentType, size, data}` with the
    /// bytes base64-encoded.
    pub fn into_value(self) -> Value {
        match self {
            ResponsePayload::Json(value) => value,
            ResponsePayload::Text(text) => Value::String(text),
            ResponsePayload::Attachment {
                filename,
                content_type,
                bytes,
            } => json!({
                "filename": filename,
                "contentType": content_type,
                "size": bytes.len(),
                "data": STANDARD.encode(&bytes),
            }),
            ResponsePayload::Binary { content_type, bytes } => json!({
                "contentType": content_type,
                "size": bytes.len(),
                "data": STANDARD.encode(&bytes),
            }),
        }
    }
}

fn is_textual(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.contains("xml")
        || content_type.contains("javascript")
        || content_type.contains("x-www-form-urlencoded")
}

fn non_empty_or_octet(content_type: &str) -> String {
    if content_type.is_empty() {
        "application/octet-stream".to_string()
    } else {
        content_type.to_string()
    }
}

/// Extracts `filename*=` (RFC 5987) or `filename=` from a disposition header.
fn attachment_filename(disposition: &str) -> Option<String> {
    let mut plain = None;
    for parameter in disposition.split(';').skip(1) {
        let Some((key, value)) = parameter.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let encoded = value.rsplit("''").next().unwrap_or(value);
                return Some(percent_decode_str(encoded).decode_utf8_lossy().into_owned());
            }
            "filename" if !value.is_empty() => plain = Some(value.to_string()),
            _ => {}
        }
    }
    plain
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response(headers: &[(&str, &str)], body: &'static [u8]) -> HttpResponse {
        HttpResponse {
            status: 200,
            headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            body: Bytes::from_static(body),
        }
    }

    #[test]
    fn json_content_type_parses() {
        let payload = ResponsePayload::classify(&response(&[("Content-Type", "application/json; charset=utf-8")], br#"[{"id":1}]"#));
        assert_eq!(payload, ResponsePayload::Json(json!([{ "id": 1 }])));
    }

    #[test]
    fn malformed_json_degrades_to_text() {
        let payload = ResponsePayload::classify(&response(&[("content-type", "application/json")], b"not json"));
        assert_eq!(payload, ResponsePayload::Text("not json".into()));
    }

    #[test]
    fn attachment_keeps_filename() {
        let payload = ResponsePayload::classify(&response(
            &[
                ("content-type", "text/csv"),
                ("content-disposition", "attachment; filename=\"report.csv\""),
            ],
            b"a,b\n1,2\n",
        ));
        let value = payload.into_value();
        assert_eq!(value["filename"], "report.csv");
        assert_eq!(value["contentType"], "text/csv");
        assert_eq!(value["size"], 8);
        assert_eq!(value["data"], STANDARD.encode(b"a,b\n1,2\n"));
    }

    #[test]
    fn encoded_filename_is_decoded() {
        assert_eq!(
            attachment_filename("attachment; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf").as_deref(),
            Some("résumé.pdf")
        );
    }

    #[test]
    fn untyped_bodies_are_sniffed() {
        assert_eq!(ResponsePayload::classify(&response(&[], b"{\"ok\":true}")), ResponsePayload::Json(json!({ "ok": true })));
        assert_eq!(ResponsePayload::classify(&response(&[], b"plain")), ResponsePayload::Text("plain".into()));
        assert!(matches!(
            ResponsePayload::classify(&response(&[], &[0xff, 0xfe, 0x00])),
            ResponsePayload::Binary { .. }
        ));
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(ResponsePayload::classify(&response(&[("content-type", "application/json")], b"")), ResponsePayload::Json(Value::Null));
    }
}
