//! Request body reconstruction and classification.
//!
//! Bodies are delivered as a list of binary fragments, or as an already parsed
//! multi-part form. Raw fragments are merged up to a byte ceiling, decoded as
//! UTF-8 and classified by content type. Decoding never fails: anything that
//! can't be parsed falls back to a coarser kind.

use crate::headers::header_value;
use crate::types::{BodyContent, DecodedBody, FormFields, Header};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Request body as reported by the notification source.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestBody {
    /// Set when the source already parsed a multi-part form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<FormFields>,
    #[serde(default)]
    pub raw: Vec<RawFragment>,
}

impl RequestBody {
    pub fn from_fragments<I, B>(fragments: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        RequestBody {
            form_data: None,
            raw: fragments.into_iter().map(RawFragment::new).collect(),
        }
    }

    pub fn from_form(fields: FormFields) -> Self {
        RequestBody {
            form_data: Some(fields),
            raw: Vec::new(),
        }
    }
}

/// One upload element. File uploads carry no bytes and are skipped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFragment {
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Bytes>,
}

impl RawFragment {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        RawFragment {
            bytes: Some(bytes.into()),
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Bytes>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&STANDARD.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Bytes>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| {
                STANDARD
                    .decode(s.as_bytes())
                    .map(Bytes::from)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[derive(Debug, PartialEq)]
pub struct MergedBytes {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

/// Concatenates fragments in order, keeping at most `max_bytes` bytes in total.
pub fn merge_fragments<'a, I>(fragments: I, max_bytes: usize) -> MergedBytes
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut bytes = Vec::new();
    let mut accepted = 0;

    for fragment in fragments {
        let remaining = max_bytes.saturating_sub(bytes.len());
        if remaining == 0 {
            break;
        }
        let take = fragment.len().min(remaining);
        bytes.extend_from_slice(&fragment[..take]);
        accepted += 1;
    }

    // Nothing accepted means nothing was cut, even for a zero ceiling.
    let truncated = accepted > 0 && bytes.len() >= max_bytes;
    MergedBytes { bytes, truncated }
}

/// Decodes and classifies a request body. Returns `None` when the request had no body.
pub fn decode_body(
    body: Option<&RequestBody>,
    headers: &[Header],
    max_bytes: usize,
) -> Option<DecodedBody> {
    let body = body?;

    if let Some(fields) = &body.form_data {
        return Some(DecodedBody::new(BodyContent::FormData(fields.clone()), false));
    }

    let merged = merge_fragments(
        body.raw.iter().filter_map(|f| f.bytes.as_deref()),
        max_bytes,
    );
    let truncated = merged.truncated;
    let decoded = String::from_utf8_lossy(&merged.bytes);
    // A leading byte order mark is not part of the content.
    let text = decoded.strip_prefix('\u{feff}').unwrap_or(&*decoded);

    if text.is_empty() {
        return Some(DecodedBody::new(BodyContent::Raw(String::new()), truncated));
    }

    if header_value(headers, "content-type").contains(FORM_URLENCODED) {
        return Some(DecodedBody::new(
            BodyContent::Urlencoded(parse_urlencoded(text)),
            truncated,
        ));
    }

    let content = match serde_json::from_str(text) {
        Ok(value) => BodyContent::Json(value),
        Err(_) => BodyContent::Text(text.to_string()),
    };
    Some(DecodedBody::new(content, truncated))
}

fn parse_urlencoded(text: &str) -> FormFields {
    let text = text.strip_prefix('?').unwrap_or(text);
    let mut fields = FormFields::new();
    for (key, value) in url::form_urlencoded::parse(text.as_bytes()) {
        fields
            .entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }
    fields
}
