//! Relay wire protocol: command frames in, acknowledgement frames out.
//!
//! Plain text is the default: any text frame is a command and the ack is plain text.
//! A client may instead send `{ "kind": "command", "payload", "correlationId" }` and gets
//! `{ "kind": "ack", "payload", "correlationId", "ok" }` back, so acks can be matched to commands.

use serde::{Deserialize, Serialize};

/// Ack text when the command handler succeeded.
pub const ACK_RECEIVED: &str = "Command received by laptop";

const ACK_FAILED_PREFIX: &str = "Command failed: ";

/// Wire envelope for a command: `{ "kind": "command", "payload", "correlationId" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub kind: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Wire envelope for an ack: `{ "kind": "ack", "payload", "correlationId", "ok" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckEnvelope {
    pub kind: String,
    pub payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub ok: bool,
}

/// One received command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command text handed to the command handler.
    pub payload: String,
    pub correlation_id: Option<String>,
    /// True when the client used the JSON envelope; the ack mirrors the form.
    pub enveloped: bool,
}

impl CommandFrame {
    /// Parse a text frame. Only a JSON object with `"kind": "command"` is an envelope; anything else is plain text.
    pub fn parse(text: &str) -> Self {
        if text.trim_start().starts_with('{') {
            if let Ok(env) = serde_json::from_str::<CommandEnvelope>(text) {
                if env.kind == "command" {
                    return Self {
                        payload: env.payload,
                        correlation_id: env.correlation_id,
                        enveloped: true,
                    };
                }
            }
        }
        Self {
            payload: text.to_string(),
            correlation_id: None,
            enveloped: false,
        }
    }
}

/// Acknowledgement for exactly one CommandFrame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub ok: bool,
    pub payload: String,
    pub correlation_id: Option<String>,
    pub enveloped: bool,
}

impl AckFrame {
    /// Ack carrying the handler outcome for `command`.
    pub fn for_outcome(command: &CommandFrame, outcome: &Result<(), String>) -> Self {
        let (ok, payload) = match outcome {
            Ok(()) => (true, ACK_RECEIVED.to_string()),
            Err(e) => (false, format!("{}{}", ACK_FAILED_PREFIX, e)),
        };
        Self {
            ok,
            payload,
            correlation_id: command.correlation_id.clone(),
            enveloped: command.enveloped,
        }
    }

    /// Text sent on the wire.
    pub fn to_text(&self) -> String {
        if !self.enveloped {
            return self.payload.clone();
        }
        let env = AckEnvelope {
            kind: "ack".to_string(),
            payload: self.payload.clone(),
            correlation_id: self.correlation_id.clone(),
            ok: self.ok,
        };
        serde_json::to_string(&env).unwrap_or_else(|_| self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_command() {
        let frame = CommandFrame::parse("run_command");
        assert_eq!(frame.payload, "run_command");
        assert!(!frame.enveloped);
        assert_eq!(frame.correlation_id, None);
    }

    #[test]
    fn success_ack_is_fixed_text() {
        let frame = CommandFrame::parse("run_command");
        let ack = AckFrame::for_outcome(&frame, &Ok(()));
        assert!(ack.ok);
        assert_eq!(ack.to_text(), "Command received by laptop");
    }

    #[test]
    fn failure_ack_carries_reason() {
        let frame = CommandFrame::parse("shutdown");
        let ack = AckFrame::for_outcome(&frame, &Err("command not allowlisted: shutdown".to_string()));
        assert!(!ack.ok);
        assert_eq!(ack.to_text(), "Command failed: command not allowlisted: shutdown");
    }

    #[test]
    fn envelope_round_trips_correlation_id() {
        let frame = CommandFrame::parse(r#"{"kind":"command","payload":"run_command","correlationId":"c-7"}"#);
        assert!(frame.enveloped);
        assert_eq!(frame.payload, "run_command");
        assert_eq!(frame.correlation_id.as_deref(), Some("c-7"));

        let text = AckFrame::for_outcome(&frame, &Ok(())).to_text();
        let ack: AckEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(ack.kind, "ack");
        assert_eq!(ack.payload, ACK_RECEIVED);
        assert_eq!(ack.correlation_id.as_deref(), Some("c-7"));
        assert!(ack.ok);
    }

    #[test]
    fn other_json_is_plain_text() {
        let text = r#"{"kind":"ping","payload":"x"}"#;
        let frame = CommandFrame::parse(text);
        assert!(!frame.enveloped);
        assert_eq!(frame.payload, text);

        let frame = CommandFrame::parse(r#"{"volume": 3}"#);
        assert!(!frame.enveloped);
    }
}
