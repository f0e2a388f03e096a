use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::context::{ShareContext, SharingData};
use super::cookies::CookieItem;
use super::request::Request;
use crate::errors::{Error, Result};

pub const PRODUCT_TYPE_URL: &str = "type.crawlet/Product";

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One message on the gateway stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    JoinPing(JoinPing),
    JoinPong(JoinPong),
    HeartbeatPing(HeartbeatPing),
    HeartbeatPong(HeartbeatPong),
    Command(Command),
    /// A frame whose declared type this node does not know.
    Unknown(String),
}

impl Frame {
    pub fn kind(&self) -> &str {
        match self {
            Frame::JoinPing(_) => "join_ping",
            Frame::JoinPong(_) => "join_pong",
            Frame::HeartbeatPing(_) => "heartbeat_ping",
            Frame::HeartbeatPong(_) => "heartbeat_pong",
            Frame::Command(_) => "command",
            Frame::Unknown(kind) => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    pub timestamp: i64,
    pub node_id: String,
    pub data: CommandData,
}

impl Command {
    pub fn new(node_id: impl AsRef<str>, data: CommandData) -> Self {
        Command {
            timestamp: now_millis(),
            node_id: node_id.as_ref().into(),
            data,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.data {
            CommandData::Request(_) => "request",
            CommandData::Item(_) => "item",
            CommandData::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandData {
    Request(CommandRequest),
    Item(CommandItem),
    Error(CommandError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    /// Seconds; zero or negative falls back to the controller default.
    pub max_ttl_per_request: i64,
    pub disable_proxy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandRequest {
    pub tracing_id: String,
    pub job_id: String,
    pub req_id: String,
    pub url: String,
    pub method: String,
    pub body: String,
    pub custom_headers: BTreeMap<String, String>,
    pub custom_cookies: Vec<CookieItem>,
    pub parent: Option<Box<CommandRequest>>,
    pub sharing_data: SharingData,
    pub options: RequestOptions,
}

impl CommandRequest {
    pub fn new(url: impl AsRef<str>) -> Self {
        CommandRequest {
            url: url.as_ref().into(),
            method: "GET".into(),
            ..Default::default()
        }
    }

    /// Builds the follow-up request for a `request` yielded while parsing
    /// the response to `self`.
    ///
    /// Correlation ids and options are inherited, `parent` is `self` with
    /// its own parent dropped, and sharing data is `self`'s merged with the
    /// yield-time context.
    ///
    /// The wire body is a string, so a body that is not UTF-8 is rejected.
    pub fn derive_sub_request(&self, ctx: &ShareContext, request: &Request) -> Result<CommandRequest> {
        let mut parent = self.clone();
        parent.parent = None;

        let mut sharing_data = self.sharing_data.clone();
        sharing_data.merge(&ctx.sharing);

        let body = match request.body.as_deref() {
            Some(bytes) => String::from_utf8(bytes.to_vec()).map_err(|e| {
                Error::invalid_argument(format!("body of {} is not utf-8: {e}", request.url))
            })?,
            None => String::new(),
        };

        Ok(CommandRequest {
            tracing_id: self.tracing_id.clone(),
            job_id: self.job_id.clone(),
            req_id: self.req_id.clone(),
            url: request.url.to_string(),
            method: request.method.clone(),
            body,
            custom_headers: BTreeMap::from(&request.headers),
            custom_cookies: request.cookies.cookies.clone(),
            parent: Some(Box::new(parent)),
            sharing_data,
            options: self.options.clone(),
        })
    }
}

/// `google.protobuf.Any`-style payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnyData {
    pub type_url: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandItem {
    pub tracing_id: String,
    pub job_id: String,
    pub req_id: String,
    pub data: AnyData,
}

impl CommandItem {
    pub fn new(ctx: &ShareContext, data: AnyData) -> Self {
        CommandItem {
            tracing_id: ctx.tracing_id.clone(),
            job_id: ctx.job_id.clone(),
            req_id: ctx.req_id.clone(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandError {
    pub tracing_id: String,
    pub job_id: String,
    pub req_id: String,
    pub err_msg: String,
}

impl CommandError {
    pub fn for_request(request: &CommandRequest, err_msg: impl Into<String>) -> Self {
        CommandError {
            tracing_id: request.tracing_id.clone(),
            job_id: request.job_id.clone(),
            req_id: request.req_id.clone(),
            err_msg: err_msg.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeInfo {
    pub id: String,
    pub host: String,
    pub max_concurrency: u32,
    pub idle_concurrency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CrawlerInfo {
    pub id: String,
    pub version: i32,
    pub gid: String,
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinPing {
    pub timestamp: i64,
    pub node: NodeInfo,
    pub crawlers: Vec<CrawlerInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct JoinPong {
    /// Milliseconds; zero keeps the node's current cadence.
    pub heartbeat_interval: u64,
    pub network_delay: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatPing {
    pub timestamp: i64,
    pub idle_concurrency: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatPong {
    pub network_delay: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> CommandRequest {
        let mut grand_parent = CommandRequest::new("https://www.asos.com/");
        grand_parent.tracing_id = "t0".into();

        let mut origin = CommandRequest::new("https://www.asos.com/us/women");
        origin.tracing_id = "t1".into();
        origin.job_id = "j1".into();
        origin.req_id = "r1".into();
        origin.options.max_ttl_per_request = 30;
        origin.sharing_data.set("gender", "women");
        origin.sharing_data.set("page", "1");
        origin.parent = Some(Box::new(grand_parent));
        origin
    }

    #[test]
    fn test_derive_sub_request() {
        let origin = origin();
        let ctx = ShareContext::from_request(&origin)
            .with_value("page", "2")
            .with_value("category", "dresses");
        let yielded = Request::get("https://www.asos.com/us/women/dresses?page=2")
            .unwrap()
            .with_header("Accept", "text/html");

        let sub = origin.derive_sub_request(&ctx, &yielded).unwrap();

        assert_eq!(sub.tracing_id, "t1");
        assert_eq!(sub.job_id, "j1");
        assert_eq!(sub.req_id, "r1");
        assert_eq!(sub.url, "https://www.asos.com/us/women/dresses?page=2");
        assert_eq!(sub.method, "GET");
        assert_eq!(sub.custom_headers.get("Accept").map(String::as_str), Some("text/html"));
        assert_eq!(sub.options.max_ttl_per_request, 30);

        let parent = sub.parent.as_ref().unwrap();
        assert_eq!(parent.tracing_id, "t1");
        assert_eq!(parent.url, "https://www.asos.com/us/women");
        assert!(parent.parent.is_none());

        assert_eq!(sub.sharing_data.len(), 3);
        assert_eq!(sub.sharing_data.get("gender"), Some("women"));
        assert_eq!(sub.sharing_data.get("page"), Some("2"));
        assert_eq!(sub.sharing_data.get("category"), Some("dresses"));
    }

    #[test]
    fn test_sub_request_body() {
        let origin = origin();
        let ctx = ShareContext::from_request(&origin);

        let form = Request::post("https://www.asos.com/api/search", "q=dress").unwrap();
        let sub = origin.derive_sub_request(&ctx, &form).unwrap();
        assert_eq!(sub.method, "POST");
        assert_eq!(sub.body, "q=dress");

        let binary = Request::post("https://www.asos.com/api/upload", vec![0xff, 0xfe, 0x00]).unwrap();
        let err = origin.derive_sub_request(&ctx, &binary).unwrap_err();
        assert!(err.is_command());
        assert!(err.to_string().contains("not utf-8"));
    }

    #[test]
    fn test_command_wire_shape() {
        let err = CommandError::for_request(&origin(), "no crawler found");
        let command = Command::new("node-1", CommandData::Error(err));
        let value = serde_json::to_value(&command).unwrap();

        assert_eq!(value["nodeId"], "node-1");
        assert_eq!(value["data"]["error"]["tracingId"], "t1");
        assert_eq!(value["data"]["error"]["errMsg"], "no crawler found");
        assert_eq!(command.kind(), "error");
    }

    #[test]
    fn test_request_decodes_with_defaults() {
        let request: CommandRequest = serde_json::from_str(
            r#"{"tracingId":"t1","url":"https://www.asos.com/us/women","sharingData":[{"key":"a","value":"b"}]}"#,
        )
        .unwrap();
        assert_eq!(request.tracing_id, "t1");
        assert!(request.method.is_empty());
        assert!(request.parent.is_none());
        assert_eq!(request.sharing_data.get("a"), Some("b"));
        assert_eq!(request.options, RequestOptions::default());
    }
}
