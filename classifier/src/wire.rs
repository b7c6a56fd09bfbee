//! The line-oriented wire protocol spoken to the external DPI engine.
//!
//! Command frames use `|` as a field separator (a historical variant used
//! `:`; this implementation only emits the current form). Reply frames are
//! zero or more `KEY: VALUE\r\n` lines terminated by a blank line.

use std::net::IpAddr;

/// Classification state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassificationState {
    Terminated,
    Inspecting,
    Monitoring,
    Classified,
}

impl ClassificationState {
    fn from_code(code: u32) -> Self {
        match code {
            1 => ClassificationState::Inspecting,
            2 => ClassificationState::Monitoring,
            3 => ClassificationState::Classified,
            // parse errors and the literal 0 both fold to terminated.
            _ => ClassificationState::Terminated,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ClassificationState::Terminated | ClassificationState::Classified)
    }
}

/// A parsed reply from the DPI engine. Unrecognized keys are ignored;
/// missing keys leave the corresponding field `None`.
#[derive(Debug, Clone, Default)]
pub struct ClassifyReply {
    pub application_guid: Option<String>,
    pub protochain: Option<String>,
    pub detail: Option<String>,
    pub confidence: u32,
    pub state: ClassificationState,
}

impl Default for ClassificationState {
    fn default() -> Self {
        ClassificationState::Terminated
    }
}

pub fn create_frame(ctid: u32, protocol: u8, client_addr: IpAddr, client_port: u16, server_addr: IpAddr, server_port: u16) -> String {
    format!("CREATE|{ctid}|{protocol}|{client_addr}|{client_port}|{server_addr}|{server_port}\r\n")
}

pub fn packet_header(session_id: u64, family_label: &str, len: usize) -> String {
    format!("PACKET|{session_id}|{family_label}|{len}\r\n")
}

pub fn remove_frame(ctid: u32) -> String {
    format!("REMOVE|{ctid}\r\n")
}

/// Parses a reply consisting of `KEY: VALUE` lines (CRLF-terminated, blank
/// line ends the reply). Unrecognized keys are ignored; numeric parse
/// failures on `CONFIDENCE`/`STATE` default to `0`.
pub fn parse_reply(raw: &str) -> ClassifyReply {
    let mut reply = ClassifyReply::default();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "APPLICATION" => reply.application_guid = Some(value.to_string()),
            "PROTOCHAIN" => reply.protochain = Some(value.to_string()),
            "DETAIL" => reply.detail = Some(value.to_string()),
            "CONFIDENCE" => reply.confidence = value.parse().unwrap_or(0),
            "STATE" => {
                let code: u32 = value.parse().unwrap_or(0);
                reply.state = ClassificationState::from_code(code);
            }
            _ => {}
        }
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_reply() {
        let reply = parse_reply("APPLICATION: 0x1a\r\nSTATE: 3\r\nCONFIDENCE: 90\r\n\r\n");
        assert_eq!(reply.application_guid.as_deref(), Some("0x1a"));
        assert_eq!(reply.confidence, 90);
        assert_eq!(reply.state, ClassificationState::Classified);
    }

    #[test]
    fn malformed_numeric_fields_default_to_zero() {
        let reply = parse_reply("CONFIDENCE: not-a-number\r\nSTATE: also-bad\r\n");
        assert_eq!(reply.confidence, 0);
        assert_eq!(reply.state, ClassificationState::Terminated);
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let reply = parse_reply("FUTURE_FIELD: x\r\nCONFIDENCE: 12\r\n");
        assert_eq!(reply.confidence, 12);
    }

    #[test]
    fn create_frame_uses_pipe_separator() {
        let frame = create_frame(7, 6, "10.0.0.1".parse().unwrap(), 1, "10.0.0.2".parse().unwrap(), 2);
        assert_eq!(frame, "CREATE|7|6|10.0.0.1|1|10.0.0.2|2\r\n");
    }
}
