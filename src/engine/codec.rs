//! JSON framing of gateway messages: `{"type": "...", "data": {...}}`, one
//! frame per WebSocket message.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::common::model::Frame;
use crate::errors::{CommandError, Error, Result};

#[derive(Serialize, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

pub fn encode(frame: &Frame) -> Result<String> {
    let data = match frame {
        Frame::JoinPing(v) => serde_json::to_value(v)?,
        Frame::JoinPong(v) => serde_json::to_value(v)?,
        Frame::HeartbeatPing(v) => serde_json::to_value(v)?,
        Frame::HeartbeatPong(v) => serde_json::to_value(v)?,
        Frame::Command(v) => serde_json::to_value(v)?,
        Frame::Unknown(kind) => return Err(CommandError::Unrecognized(kind.clone()).into()),
    };
    let raw = RawFrame {
        kind: frame.kind().to_string(),
        data,
    };
    Ok(serde_json::to_string(&raw)?)
}

pub fn decode(text: &str) -> Result<Frame> {
    decode_bytes(text.as_bytes())
}

pub fn decode_bytes(bytes: &[u8]) -> Result<Frame> {
    let raw: RawFrame = serde_json::from_slice(bytes)?;
    let frame = match raw.kind.as_str() {
        "join_ping" => Frame::JoinPing(serde_json::from_value(raw.data)?),
        "join_pong" => Frame::JoinPong(serde_json::from_value(raw.data)?),
        "heartbeat_ping" => Frame::HeartbeatPing(serde_json::from_value(raw.data)?),
        "heartbeat_pong" => Frame::HeartbeatPong(serde_json::from_value(raw.data)?),
        "command" => Frame::Command(serde_json::from_value(raw.data)?),
        _ => Frame::Unknown(raw.kind),
    };
    Ok(frame)
}

pub fn encode_message(frame: &Frame) -> Result<Message> {
    Ok(Message::Text(encode(frame)?.into()))
}

/// Decodes a data message. Control messages carry no frame and yield `None`.
pub fn decode_message(message: Message) -> Option<Result<Frame>> {
    match message {
        Message::Text(text) => Some(decode(&text)),
        Message::Binary(bytes) => Some(decode_bytes(&bytes)),
        Message::Close(_) => Some(Err(Error::invalid_argument("close is not a data frame"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::{
        Command, CommandData, CommandRequest, HeartbeatPing, JoinPong,
    };

    #[test]
    fn test_decode_join_pong() {
        let frame = decode(r#"{"type":"join_pong","data":{"heartbeatInterval":15000,"networkDelay":3}}"#)
            .unwrap();
        assert_eq!(
            frame,
            Frame::JoinPong(JoinPong {
                heartbeat_interval: 15000,
                network_delay: 3,
            })
        );
    }

    #[test]
    fn test_decode_command_request() {
        let text = r#"{
            "type": "command",
            "data": {
                "timestamp": 1700000000000,
                "nodeId": "",
                "data": {"request": {"tracingId": "t1", "url": "https://www.asos.com/us/women"}}
            }
        }"#;
        let Frame::Command(command) = decode(text).unwrap() else {
            panic!("expected a command frame");
        };
        let CommandData::Request(request) = command.data else {
            panic!("expected a request");
        };
        assert_eq!(request.tracing_id, "t1");
        assert_eq!(request.url, "https://www.asos.com/us/women");
    }

    #[test]
    fn test_unknown_type_is_kept() {
        let frame = decode(r#"{"type":"drain","data":{}}"#).unwrap();
        assert_eq!(frame, Frame::Unknown("drain".to_string()));
        assert!(encode(&frame).unwrap_err().is_command());
    }

    #[test]
    fn test_garbage_is_invalid_argument() {
        assert!(decode("not json").unwrap_err().is_command());
        assert!(decode(r#"{"type":"join_pong","data":{"heartbeatInterval":"soon"}}"#)
            .unwrap_err()
            .is_command());
    }

    #[test]
    fn test_encode_shape() {
        let frame = Frame::HeartbeatPing(HeartbeatPing {
            timestamp: 42,
            idle_concurrency: 3,
        });
        let value: Value = serde_json::from_str(&encode(&frame).unwrap()).unwrap();
        assert_eq!(value["type"], "heartbeat_ping");
        assert_eq!(value["data"]["idleConcurrency"], 3);

        let command = Frame::Command(Command::new(
            "node-a",
            CommandData::Request(CommandRequest::new("https://www.asos.com/")),
        ));
        let decoded = decode(&encode(&command).unwrap()).unwrap();
        assert_eq!(decoded, command);
    }

    #[test]
    fn test_control_messages_are_skipped() {
        assert!(decode_message(Message::Ping(Default::default())).is_none());
        let frame = decode_message(Message::Text(r#"{"type":"heartbeat_pong","data":{}}"#.into()));
        assert!(matches!(frame, Some(Ok(Frame::HeartbeatPong(_)))));
    }
}
