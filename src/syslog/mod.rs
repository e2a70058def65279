//! Syslog transport: RFC 5424 envelope decoding and the UDP listener

pub mod envelope;
pub mod listener;

pub use envelope::{decode, DecodeError, Envelope, SyslogMessage, UNKNOWN};
pub use listener::{handle_datagram, DatagramOutcome, SyslogListener};
