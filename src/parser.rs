//! Line parser: turns one syslog payload into store observations
//!
//! A payload may carry several newline-separated sub-messages. Every pattern
//! of the library is evaluated against every sub-message, in library order,
//! and every match occurrence yields one observation per non-empty field.
//! When the matched pattern declares an index role, the metric name is
//! suffixed with `_<index>` before any field is recorded.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::patterns::{PatternLibrary, Role};
use crate::syslog::SyslogMessage;

/// Housekeeping metric holding the sender address
pub const IP_METRIC: &str = "ip";
/// Housekeeping metric holding the arrival time (RFC 3339)
pub const TIMESTAMP_METRIC: &str = "timestamp";
/// Field key of the housekeeping metrics and of single-valued patterns
pub const VALUE_FIELD: &str = "value";

/// What a captured value stands for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueKind {
    /// Numeric reading, may become a sample
    #[default]
    Number,
    /// Quoted string or housekeeping text
    Text,
    /// Dimension key already folded into the metric name
    Index,
}

impl From<Role> for ValueKind {
    fn from(role: Role) -> Self {
        match role {
            Role::Index(_) => ValueKind::Index,
            Role::Text(_) => ValueKind::Text,
            Role::Name | Role::Field(_) => ValueKind::Number,
        }
    }
}

/// One `(metric, field, value)` upsert instruction
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Observation {
    pub metric: String,
    pub field: String,
    pub value: String,
    pub kind: ValueKind,
}

impl Observation {
    /// Numeric observation
    pub fn new(metric: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_kind(metric, field, value, ValueKind::Number)
    }

    pub fn with_kind(
        metric: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        Self {
            metric: metric.into(),
            field: field.into(),
            value: value.into(),
            kind,
        }
    }
}

/// Observations for one message, housekeeping first
pub fn parse_message(
    library: &PatternLibrary,
    message: &SyslogMessage,
    received_at: DateTime<Utc>,
) -> Vec<Observation> {
    let mut observations = vec![
        Observation::with_kind(IP_METRIC, VALUE_FIELD, message.client.ip().to_string(), ValueKind::Text),
        Observation::with_kind(
            TIMESTAMP_METRIC,
            VALUE_FIELD,
            received_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            ValueKind::Text,
        ),
    ];
    observations.extend(parse_payload(library, &message.message));
    observations
}

/// Observations extracted from a payload, in emission order
pub fn parse_payload(library: &PatternLibrary, payload: &str) -> Vec<Observation> {
    let mut observations = Vec::new();

    for line in payload.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        parse_line(library, line, &mut observations);
    }

    observations
}

fn parse_line(library: &PatternLibrary, line: &str, out: &mut Vec<Observation>) {
    for pattern in library.patterns() {
        let roles = pattern.roles();

        for caps in pattern.regex().captures_iter(line) {
            // Group i + 1 carries roles[i]
            let capture = |i: usize| caps.get(i + 1).map_or("", |m| m.as_str());

            let suffix = roles
                .iter()
                .position(|r| matches!(r, Role::Index(_)))
                .map(capture)
                .filter(|index| !index.is_empty())
                .map(|index| format!("_{}", index))
                .unwrap_or_default();

            let Some(name_at) = roles.iter().position(|r| matches!(r, Role::Name)) else {
                continue;
            };
            let base = capture(name_at);
            if base.is_empty() {
                continue;
            }
            let metric = format!("{}{}", base, suffix);

            tracing::trace!(pattern = pattern.id(), metric = %metric, "Pattern matched");

            for (i, role) in roles.iter().enumerate() {
                let Some(key) = role.key() else {
                    continue;
                };
                let value = capture(i);
                if !value.is_empty() {
                    out.push(Observation::with_kind(metric.as_str(), key, value, (*role).into()));
                }
            }
        }
    }
}
