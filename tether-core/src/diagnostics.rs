//! Operator-facing diagnostics. Sessions report through an injected `Diagnostics`
//! so tests can record events instead of capturing process output.

use std::error::Error as _;
use std::fmt;

use serde_json::Value;
use tracing::Level;

use crate::connection::{Side, TransportError};
use crate::relay::{Direction, Forward};

/// Something worth telling the operator about a session.
#[derive(Debug)]
pub enum DiagnosticEvent<'a> {
    Created,
    UpstreamEnded { reason: &'a str },
    TransportError { side: Side, error: &'a TransportError },
    RejectionEmpty,
    RejectionWithoutReason { payload: &'a Value },
    RejectionNonString { reason: &'a Value },
    RejectionRaw { reason: &'a str },
    RejectionParsed { pretty: &'a str },
    RejectionUnparsable { error: &'a str },
    /// Per-packet forwarding decision.
    Forwarded {
        name: &'a str,
        direction: Direction,
        decision: &'a Forward,
    },
    Destroyed,
}

impl DiagnosticEvent<'_> {
    pub fn level(&self) -> Level {
        match self {
            DiagnosticEvent::TransportError { .. } => Level::ERROR,
            DiagnosticEvent::UpstreamEnded { .. } => Level::WARN,
            DiagnosticEvent::Forwarded { .. } => Level::TRACE,
            _ => Level::INFO,
        }
    }

    /// `source()` chain of a transport error, outermost cause first.
    pub fn trace(&self) -> Vec<String> {
        let DiagnosticEvent::TransportError { error, .. } = self else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            out.push(cause.to_string());
            source = cause.source();
        }
        out
    }
}

impl fmt::Display for DiagnosticEvent<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticEvent::Created => f.write_str("Created upstream session"),
            DiagnosticEvent::UpstreamEnded { reason } => {
                write!(f, "Upstream connection ended: {}", reason)
            }
            DiagnosticEvent::TransportError { side, error } => {
                write!(f, "{} connection error: {}", side, error)
            }
            DiagnosticEvent::RejectionEmpty => f.write_str("Upstream disconnect with no payload"),
            DiagnosticEvent::RejectionWithoutReason { payload } => {
                write!(f, "Upstream disconnect payload without reason: {}", payload)
            }
            DiagnosticEvent::RejectionNonString { reason } => {
                write!(f, "Upstream disconnect reason (non-string): {}", reason)
            }
            DiagnosticEvent::RejectionRaw { reason } => {
                write!(f, "Upstream disconnect reason (raw string): {}", reason)
            }
            DiagnosticEvent::RejectionParsed { pretty } => {
                write!(f, "Upstream disconnect reason (parsed JSON): {}", pretty)
            }
            DiagnosticEvent::RejectionUnparsable { error } => {
                write!(f, "Unable to parse disconnect reason JSON: {}", error)
            }
            DiagnosticEvent::Forwarded {
                name,
                direction,
                decision,
            } => write!(f, "{} {}: {}", name, direction, decision),
            DiagnosticEvent::Destroyed => f.write_str("Session destroyed"),
        }
    }
}

pub trait Diagnostics: Send + Sync {
    fn record(&self, label: &str, event: &DiagnosticEvent<'_>);
}

/// Default sink: `tracing` events with the session label as a field.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn record(&self, label: &str, event: &DiagnosticEvent<'_>) {
        let level = event.level();
        if level == Level::ERROR {
            tracing::error!(session = label, "{}", event);
            for cause in event.trace() {
                tracing::error!(session = label, "caused by: {}", cause);
            }
        } else if level == Level::WARN {
            tracing::warn!(session = label, "{}", event);
        } else if level == Level::TRACE {
            tracing::trace!(session = label, "{}", event);
        } else {
            tracing::info!(session = label, "{}", event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::DropReason;

    #[test]
    fn transport_error_trace_walks_sources() {
        let error = TransportError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "peer reset",
        ));
        let event = DiagnosticEvent::TransportError {
            side: Side::Upstream,
            error: &error,
        };
        assert_eq!(event.level(), Level::ERROR);
        assert_eq!(event.to_string(), "Upstream connection error: io error");
        assert_eq!(event.trace(), vec!["peer reset".to_string()]);
    }

    #[test]
    fn non_error_events_have_no_trace() {
        assert!(DiagnosticEvent::Created.trace().is_empty());
        assert_eq!(
            DiagnosticEvent::UpstreamEnded { reason: "bye" }.to_string(),
            "Upstream connection ended: bye"
        );
    }

    #[test]
    fn forwarding_decision_is_trace_level() {
        let decision = Forward::Drop(DropReason::Cancelled);
        let event = DiagnosticEvent::Forwarded {
            name: "chat",
            direction: Direction::Outgoing,
            decision: &decision,
        };
        assert_eq!(event.level(), Level::TRACE);
        assert_eq!(event.to_string(), "chat Client -> Upstream: dropped, cancelled");
    }
}
