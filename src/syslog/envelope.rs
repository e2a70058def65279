//! RFC 5424 envelope decoding
//!
//! ```text
//! <PRI>VERSION SP TIMESTAMP SP HOSTNAME SP APP-NAME SP PROCID SP MSGID SP SD [SP MSG]
//! ```
//!
//! [`decode`] produces a typed [`Envelope`] in which every NILVALUE is `None`.
//! [`Envelope::normalize`] then turns it into a [`SyslogMessage`] with the
//! `"unknown"` sentinel for absent fields, or `None` when the hostname (the
//! device identity) is missing.

use chrono::{DateTime, FixedOffset};
use std::net::SocketAddr;
use thiserror::Error;

/// Sentinel stored for fields absent on the wire
pub const UNKNOWN: &str = "unknown";

const NILVALUE: &str = "-";
const BOM: char = '\u{feff}';
const MAX_PRIORITY: u8 = 191;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("datagram is empty")]
    Empty,
    #[error("missing <PRI> header")]
    MissingPriority,
    #[error("invalid priority '{0}'")]
    InvalidPriority(String),
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
    #[error("missing header field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("malformed structured data")]
    InvalidStructuredData,
}

/// Decoded envelope, exactly as present on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub priority: u8,
    pub facility: u8,
    pub severity: u8,
    pub version: u16,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub proc_id: Option<String>,
    pub msg_id: Option<String>,
    pub structured_data: Option<String>,
    pub message: Option<String>,
}

/// Normalized message handed to the parser
#[derive(Debug, Clone, PartialEq)]
pub struct SyslogMessage {
    /// Device identity (envelope hostname)
    pub device: String,
    /// Sender socket address
    pub client: SocketAddr,
    pub priority: u8,
    pub facility: u8,
    pub severity: u8,
    pub version: u16,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub app_name: String,
    pub proc_id: String,
    pub msg_id: String,
    pub structured_data: String,
    pub message: String,
    pub tls_peer: String,
}

impl Envelope {
    /// Apply the "unknown" sentinel to absent fields.
    ///
    /// Returns `None` when the hostname is absent: without an identity the
    /// message has no store key and is discarded.
    pub fn normalize(self, client: SocketAddr, tls_peer: Option<String>) -> Option<SyslogMessage> {
        let device = self.hostname?;
        let or_unknown = |field: Option<String>| field.unwrap_or_else(|| UNKNOWN.to_string());

        Some(SyslogMessage {
            device,
            client,
            priority: self.priority,
            facility: self.facility,
            severity: self.severity,
            version: self.version,
            timestamp: self.timestamp,
            app_name: or_unknown(self.app_name),
            proc_id: or_unknown(self.proc_id),
            msg_id: or_unknown(self.msg_id),
            structured_data: or_unknown(self.structured_data),
            message: or_unknown(self.message),
            tls_peer: or_unknown(tls_peer),
        })
    }
}

/// Decode one datagram
pub fn decode(datagram: &[u8]) -> Result<Envelope, DecodeError> {
    let text = String::from_utf8_lossy(datagram);
    let text = text.trim_end_matches(['\n', '\r', '\0']);
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut reader = Reader { rest: text };

    let priority = reader.priority()?;
    let version = reader.version()?;
    let timestamp = parse_timestamp(reader.header_field("timestamp")?)?;
    let hostname = nil(reader.header_field("hostname")?);
    let app_name = nil(reader.header_field("app-name")?);
    let proc_id = nil(reader.header_field("procid")?);
    let msg_id = nil(reader.header_field("msgid")?);
    let structured_data = reader.structured_data()?;
    let message = reader.message();

    Ok(Envelope {
        priority,
        facility: priority / 8,
        severity: priority % 8,
        version,
        timestamp,
        hostname,
        app_name,
        proc_id,
        msg_id,
        structured_data,
        message,
    })
}

fn nil(token: &str) -> Option<String> {
    if token.is_empty() || token == NILVALUE {
        None
    } else {
        Some(token.to_string())
    }
}

fn parse_timestamp(token: &str) -> Result<Option<DateTime<FixedOffset>>, DecodeError> {
    if token == NILVALUE {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(token)
        .map(Some)
        .map_err(|_| DecodeError::InvalidTimestamp(token.to_string()))
}

struct Reader<'a> {
    rest: &'a str,
}

impl<'a> Reader<'a> {
    fn priority(&mut self) -> Result<u8, DecodeError> {
        let rest = self.rest.strip_prefix('<').ok_or(DecodeError::MissingPriority)?;
        let end = rest.find('>').ok_or(DecodeError::MissingPriority)?;
        let digits = &rest[..end];

        if digits.is_empty() || digits.len() > 3 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DecodeError::InvalidPriority(digits.to_string()));
        }
        let value: u8 = digits
            .parse()
            .map_err(|_| DecodeError::InvalidPriority(digits.to_string()))?;
        if value > MAX_PRIORITY {
            return Err(DecodeError::InvalidPriority(digits.to_string()));
        }

        self.rest = &rest[end + 1..];
        Ok(value)
    }

    fn version(&mut self) -> Result<u16, DecodeError> {
        let end = self.rest.find(' ').unwrap_or(self.rest.len());
        let digits = &self.rest[..end];
        let version: u16 = digits
            .parse()
            .ok()
            .filter(|v| *v > 0 && digits.len() <= 3)
            .ok_or_else(|| DecodeError::InvalidVersion(digits.to_string()))?;

        self.rest = &self.rest[end..];
        Ok(version)
    }

    /// Read ` SP TOKEN`
    fn header_field(&mut self, name: &'static str) -> Result<&'a str, DecodeError> {
        let rest = self.rest.strip_prefix(' ').ok_or(DecodeError::MissingField(name))?;
        let end = rest.find(' ').unwrap_or(rest.len());
        if end == 0 {
            return Err(DecodeError::MissingField(name));
        }
        self.rest = &rest[end..];
        Ok(&rest[..end])
    }

    fn structured_data(&mut self) -> Result<Option<String>, DecodeError> {
        let rest = self
            .rest
            .strip_prefix(' ')
            .ok_or(DecodeError::MissingField("structured-data"))?;

        if let Some(after) = rest.strip_prefix(NILVALUE) {
            self.rest = after;
            return Ok(None);
        }
        if !rest.starts_with('[') {
            return Err(DecodeError::InvalidStructuredData);
        }

        let mut consumed = 0;
        while rest[consumed..].starts_with('[') {
            consumed += sd_element_len(&rest[consumed..])?;
        }

        self.rest = &rest[consumed..];
        Ok(Some(rest[..consumed].to_string()))
    }

    fn message(&mut self) -> Option<String> {
        let msg = self.rest.strip_prefix(' ').unwrap_or(self.rest);
        let msg = msg.strip_prefix(BOM).unwrap_or(msg);
        self.rest = "";
        if msg.is_empty() {
            None
        } else {
            Some(msg.to_string())
        }
    }
}

/// Byte length of one `[...]` element, honouring quoted values and escapes
fn sd_element_len(input: &str) -> Result<usize, DecodeError> {
    let mut in_quotes = false;
    let mut escaped = false;

    for (i, c) in input.char_indices().skip(1) {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ']' if !in_quotes => return Ok(i + 1),
            _ => {}
        }
    }

    Err(DecodeError::InvalidStructuredData)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SocketAddr {
        "192.168.1.50:514".parse().unwrap()
    }

    #[test]
    fn test_decode_full_envelope() {
        let datagram = b"<134>1 2024-05-01T12:00:00.123Z aa:bb:cc:dd:ee:ff buddy 12 metrics [meta id=\"1\"] temp_mcu v=42.5";
        let env = decode(datagram).unwrap();

        assert_eq!(env.priority, 134);
        assert_eq!(env.facility, 16);
        assert_eq!(env.severity, 6);
        assert_eq!(env.version, 1);
        assert!(env.timestamp.is_some());
        assert_eq!(env.hostname.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(env.app_name.as_deref(), Some("buddy"));
        assert_eq!(env.proc_id.as_deref(), Some("12"));
        assert_eq!(env.msg_id.as_deref(), Some("metrics"));
        assert_eq!(env.structured_data.as_deref(), Some("[meta id=\"1\"]"));
        assert_eq!(env.message.as_deref(), Some("temp_mcu v=42.5"));
    }

    #[test]
    fn test_nil_fields_become_none() {
        let env = decode(b"<13>1 - host - - - -").unwrap();
        assert!(env.timestamp.is_none());
        assert!(env.app_name.is_none());
        assert!(env.proc_id.is_none());
        assert!(env.msg_id.is_none());
        assert!(env.structured_data.is_none());
        assert!(env.message.is_none());
    }

    #[test]
    fn test_multiline_message_is_preserved() {
        let env = decode(b"<13>1 - host app - - - temp_bed v=60\ntemp_noz v=215\n").unwrap();
        assert_eq!(env.message.as_deref(), Some("temp_bed v=60\ntemp_noz v=215"));
    }

    #[test]
    fn test_bom_is_stripped() {
        let env = decode("<13>1 - host app - - - \u{feff}temp_mcu v=40".as_bytes()).unwrap();
        assert_eq!(env.message.as_deref(), Some("temp_mcu v=40"));
    }

    #[test]
    fn test_structured_data_with_escaped_bracket() {
        let env = decode(br#"<13>1 - host app - - [a k="x\]y"][b j="2"] msg"#).unwrap();
        assert_eq!(env.structured_data.as_deref(), Some(r#"[a k="x\]y"][b j="2"]"#));
        assert_eq!(env.message.as_deref(), Some("msg"));
    }

    #[test]
    fn test_malformed_envelopes() {
        assert_eq!(decode(b""), Err(DecodeError::Empty));
        assert_eq!(decode(b"hello"), Err(DecodeError::MissingPriority));
        assert!(matches!(decode(b"<999>1 - h - - - -"), Err(DecodeError::InvalidPriority(_))));
        assert!(matches!(decode(b"<13>x - h - - - -"), Err(DecodeError::InvalidVersion(_))));
        assert!(matches!(decode(b"<13>1 yesterday h - - - -"), Err(DecodeError::InvalidTimestamp(_))));
        assert_eq!(decode(b"<13>1 - h - -"), Err(DecodeError::MissingField("msgid")));
        assert_eq!(decode(b"<13>1 - h - - - [open"), Err(DecodeError::InvalidStructuredData));
    }

    #[test]
    fn test_normalize_applies_unknown_sentinel() {
        let msg = decode(b"<13>1 - host - - - - payload")
            .unwrap()
            .normalize(client(), None)
            .unwrap();

        assert_eq!(msg.device, "host");
        assert_eq!(msg.app_name, UNKNOWN);
        assert_eq!(msg.proc_id, UNKNOWN);
        assert_eq!(msg.msg_id, UNKNOWN);
        assert_eq!(msg.structured_data, UNKNOWN);
        assert_eq!(msg.tls_peer, UNKNOWN);
        assert_eq!(msg.message, "payload");
    }

    #[test]
    fn test_normalize_without_hostname_discards() {
        let env = decode(b"<13>1 - - app - - - temp_mcu v=1").unwrap();
        assert!(env.normalize(client(), None).is_none());
    }
}
