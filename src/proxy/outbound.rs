//! Outbound descriptors and their synthesis from proxy links
//!
//! A descriptor is the connection-ready form of a link for an
//! xray-compatible proxy core. Descriptors are immutable: the relaxed
//! certificate variant is a separate value, never an in-place toggle.

use crate::error::ConversionError;
use crate::proxy::subscription::decode_base64_text;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use url::Url;

/// Connection parameters for one outbound, consumed by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundDescriptor {
    protocol: String,
    server: String,
    tls: bool,
    insecure: bool,
    outbound: Value,
}

impl OutboundDescriptor {
    pub fn new(protocol: &str, server: String, tls: bool, insecure: bool, outbound: Value) -> Self {
        Self {
            protocol: protocol.to_string(),
            server,
            tls,
            insecure,
            outbound,
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// `host:port` of the remote server
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Whether the transport uses TLS with certificate validation
    pub fn declares_tls(&self) -> bool {
        self.tls
    }

    /// Whether certificate validation is relaxed in this descriptor
    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn outbound(&self) -> &Value {
        &self.outbound
    }

    /// Derive the certificate-relaxed variant.
    ///
    /// Returns `None` when the descriptor has no TLS layer or is already
    /// relaxed.
    pub fn insecure_variant(&self) -> Option<Self> {
        if !self.tls || self.insecure {
            return None;
        }

        let mut outbound = self.outbound.clone();
        outbound["streamSettings"]["tlsSettings"]["allowInsecure"] = Value::Bool(true);

        Some(Self {
            protocol: self.protocol.clone(),
            server: self.server.clone(),
            tls: true,
            insecure: true,
            outbound,
        })
    }

    /// Full process configuration: a local SOCKS inbound feeding this outbound
    pub fn process_config(&self, port: u16) -> Value {
        json!({
            "log": { "loglevel": "warning" },
            "inbounds": [{
                "tag": "probe-in",
                "listen": "127.0.0.1",
                "port": port,
                "protocol": "socks",
                "settings": { "udp": false, "auth": "noauth" }
            }],
            "outbounds": [self.outbound]
        })
    }
}

/// Turns a proxy link into an outbound descriptor
pub trait OutboundSynthesizer: Send + Sync {
    fn synthesize(&self, link: &str) -> Result<OutboundDescriptor, ConversionError>;
}

/// Synthesizer producing xray outbound objects
#[derive(Debug, Clone, Default)]
pub struct XraySynthesizer;

impl XraySynthesizer {
    pub fn new() -> Self {
        Self
    }
}

impl OutboundSynthesizer for XraySynthesizer {
    fn synthesize(&self, link: &str) -> Result<OutboundDescriptor, ConversionError> {
        let link = link.trim();
        let (scheme, _) = link
            .split_once("://")
            .ok_or_else(|| ConversionError::InvalidLink("missing scheme".to_string()))?;

        match scheme.to_ascii_lowercase().as_str() {
            "vless" => vless(link),
            "trojan" => trojan(link),
            "vmess" => vmess(link),
            "ss" => shadowsocks(link),
            "socks" | "socks5" | "socks5h" => plain_server(link, "socks", false),
            "http" => plain_server(link, "http", false),
            "https" => plain_server(link, "http", true),
            other => Err(ConversionError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Transport settings shared by vless, trojan and vmess links
#[derive(Debug, Clone, Default)]
struct StreamParams {
    network: String,
    security: String,
    sni: String,
    host: String,
    path: String,
    service_name: String,
    header_type: String,
    fingerprint: String,
    public_key: String,
    short_id: String,
    alpn: String,
    allow_insecure: bool,
}

impl StreamParams {
    fn from_query(query: &HashMap<String, String>, default_security: &str) -> Self {
        let get = |key: &str| query.get(key).cloned().unwrap_or_default();
        let security = query
            .get("security")
            .cloned()
            .unwrap_or_else(|| default_security.to_string());

        Self {
            network: query.get("type").cloned().unwrap_or_else(|| "tcp".to_string()),
            security,
            sni: query.get("sni").or_else(|| query.get("peer")).cloned().unwrap_or_default(),
            host: get("host"),
            path: get("path"),
            service_name: get("serviceName"),
            header_type: get("headerType"),
            fingerprint: get("fp"),
            public_key: get("pbk"),
            short_id: get("sid"),
            alpn: get("alpn"),
            allow_insecure: matches!(
                query.get("allowInsecure").or_else(|| query.get("insecure")).map(String::as_str),
                Some("1") | Some("true")
            ),
        }
    }

    fn uses_tls(&self) -> bool {
        self.security.eq_ignore_ascii_case("tls")
    }

    fn to_json(&self) -> Value {
        let mut stream = Map::new();
        stream.insert("network".into(), json!(self.network));
        stream.insert(
            "security".into(),
            json!(if self.security.is_empty() { "none" } else { self.security.as_str() }),
        );

        match self.security.to_ascii_lowercase().as_str() {
            "tls" => {
                let mut tls = Map::new();
                tls.insert("allowInsecure".into(), json!(self.allow_insecure));
                if !self.sni.is_empty() {
                    tls.insert("serverName".into(), json!(self.sni));
                }
                if !self.fingerprint.is_empty() {
                    tls.insert("fingerprint".into(), json!(self.fingerprint));
                }
                if !self.alpn.is_empty() {
                    let alpn: Vec<&str> = self.alpn.split(',').collect();
                    tls.insert("alpn".into(), json!(alpn));
                }
                stream.insert("tlsSettings".into(), Value::Object(tls));
            }
            "reality" => {
                stream.insert(
                    "realitySettings".into(),
                    json!({
                        "serverName": self.sni,
                        "fingerprint": if self.fingerprint.is_empty() { "chrome" } else { self.fingerprint.as_str() },
                        "publicKey": self.public_key,
                        "shortId": self.short_id,
                    }),
                );
            }
            _ => {}
        }

        match self.network.as_str() {
            "ws" => {
                let mut ws = json!({ "path": if self.path.is_empty() { "/" } else { self.path.as_str() } });
                if !self.host.is_empty() {
                    ws["headers"] = json!({ "Host": self.host });
                }
                stream.insert("wsSettings".into(), ws);
            }
            "grpc" => {
                stream.insert(
                    "grpcSettings".into(),
                    json!({ "serviceName": self.service_name }),
                );
            }
            "httpupgrade" => {
                stream.insert(
                    "httpupgradeSettings".into(),
                    json!({ "path": self.path, "host": self.host }),
                );
            }
            "tcp" if self.header_type == "http" => {
                stream.insert(
                    "tcpSettings".into(),
                    json!({
                        "header": {
                            "type": "http",
                            "request": { "path": [if self.path.is_empty() { "/" } else { self.path.as_str() }],
                                         "headers": { "Host": [self.host] } }
                        }
                    }),
                );
            }
            _ => {}
        }

        Value::Object(stream)
    }
}

struct Endpoint {
    host: String,
    port: u16,
    user: String,
    password: Option<String>,
    query: HashMap<String, String>,
}

impl Endpoint {
    fn server(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_endpoint(link: &str) -> Result<Endpoint, ConversionError> {
    let url = Url::parse(link).map_err(|e| ConversionError::InvalidLink(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or(ConversionError::MissingField { field: "host" })?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = url
        .port_or_known_default()
        .ok_or(ConversionError::MissingField { field: "port" })?;

    Ok(Endpoint {
        host,
        port,
        user: url.username().to_string(),
        password: url.password().map(str::to_string),
        query: url.query_pairs().into_owned().collect(),
    })
}

fn descriptor(protocol: &str, server: String, stream: &StreamParams, outbound: Value) -> OutboundDescriptor {
    OutboundDescriptor::new(
        protocol,
        server,
        stream.uses_tls(),
        stream.uses_tls() && stream.allow_insecure,
        outbound,
    )
}

fn vless(link: &str) -> Result<OutboundDescriptor, ConversionError> {
    let endpoint = parse_endpoint(link)?;
    if endpoint.user.is_empty() {
        return Err(ConversionError::MissingField { field: "user id" });
    }
    let stream = StreamParams::from_query(&endpoint.query, "none");

    let mut user = json!({
        "id": endpoint.user,
        "encryption": endpoint.query.get("encryption").map(String::as_str).unwrap_or("none"),
    });
    if let Some(flow) = endpoint.query.get("flow").filter(|f| !f.is_empty()) {
        user["flow"] = json!(flow);
    }

    let outbound = json!({
        "tag": "proxy",
        "protocol": "vless",
        "settings": { "vnext": [{ "address": endpoint.host, "port": endpoint.port, "users": [user] }] },
        "streamSettings": stream.to_json(),
    });

    Ok(descriptor("vless", endpoint.server(), &stream, outbound))
}

fn trojan(link: &str) -> Result<OutboundDescriptor, ConversionError> {
    let endpoint = parse_endpoint(link)?;
    if endpoint.user.is_empty() {
        return Err(ConversionError::MissingField { field: "password" });
    }
    let stream = StreamParams::from_query(&endpoint.query, "tls");

    let outbound = json!({
        "tag": "proxy",
        "protocol": "trojan",
        "settings": { "servers": [{
            "address": endpoint.host,
            "port": endpoint.port,
            "password": endpoint.user,
        }] },
        "streamSettings": stream.to_json(),
    });

    Ok(descriptor("trojan", endpoint.server(), &stream, outbound))
}

fn json_text(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn vmess(link: &str) -> Result<OutboundDescriptor, ConversionError> {
    let body = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let body = body.split('#').next().unwrap_or_default();
    let decoded = decode_base64_text(body)
        .ok_or_else(|| ConversionError::InvalidLink("vmess body is not base64".to_string()))?;
    let doc: Value = serde_json::from_str(&decoded)
        .map_err(|e| ConversionError::InvalidLink(format!("vmess body is not JSON: {}", e)))?;

    let host = json_text(&doc, "add");
    if host.is_empty() {
        return Err(ConversionError::MissingField { field: "host" });
    }
    let port: u16 = json_text(&doc, "port")
        .parse()
        .map_err(|_| ConversionError::MissingField { field: "port" })?;
    let id = json_text(&doc, "id");
    if id.is_empty() {
        return Err(ConversionError::MissingField { field: "user id" });
    }

    let mut query = HashMap::new();
    for (key, field) in [
        ("type", "net"),
        ("security", "tls"),
        ("sni", "sni"),
        ("host", "host"),
        ("path", "path"),
        ("fp", "fp"),
        ("alpn", "alpn"),
        ("headerType", "type"),
    ] {
        let value = json_text(&doc, field);
        if !value.is_empty() {
            query.insert(key.to_string(), value);
        }
    }
    if query.get("type").map(String::as_str) == Some("grpc") {
        if let Some(path) = query.get("path").cloned() {
            query.insert("serviceName".to_string(), path);
        }
    }
    let stream = StreamParams::from_query(&query, "none");

    let alter_id: u32 = json_text(&doc, "aid").parse().unwrap_or(0);
    let cipher = json_text(&doc, "scy");
    let outbound = json!({
        "tag": "proxy",
        "protocol": "vmess",
        "settings": { "vnext": [{
            "address": host,
            "port": port,
            "users": [{
                "id": id,
                "alterId": alter_id,
                "security": if cipher.is_empty() { "auto" } else { cipher.as_str() },
            }],
        }] },
        "streamSettings": stream.to_json(),
    });

    let server = format!("{}:{}", host, port);
    Ok(descriptor("vmess", server, &stream, outbound))
}

fn shadowsocks(link: &str) -> Result<OutboundDescriptor, ConversionError> {
    let body = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let body = body.split('#').next().unwrap_or_default();
    let body = body.split(['?', '/']).next().unwrap_or_default();

    // SIP002 carries `userinfo@host:port`; the legacy form base64-encodes all of it.
    let (userinfo, host_port) = match body.rsplit_once('@') {
        Some((userinfo, host_port)) => {
            let userinfo = decode_base64_text(userinfo)
                .filter(|decoded| decoded.contains(':'))
                .unwrap_or_else(|| userinfo.to_string());
            (userinfo, host_port.to_string())
        }
        None => {
            let decoded = decode_base64_text(body)
                .ok_or_else(|| ConversionError::InvalidLink("ss body is not base64".to_string()))?;
            let (userinfo, host_port) = decoded
                .rsplit_once('@')
                .ok_or(ConversionError::MissingField { field: "host" })?;
            (userinfo.to_string(), host_port.to_string())
        }
    };

    let (method, password) = userinfo
        .split_once(':')
        .ok_or(ConversionError::MissingField { field: "password" })?;
    let (host, port) = host_port
        .rsplit_once(':')
        .ok_or(ConversionError::MissingField { field: "port" })?;
    let port: u16 = port
        .parse()
        .map_err(|_| ConversionError::MissingField { field: "port" })?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ConversionError::MissingField { field: "host" });
    }

    let outbound = json!({
        "tag": "proxy",
        "protocol": "shadowsocks",
        "settings": { "servers": [{
            "address": host,
            "port": port,
            "method": method,
            "password": password,
        }] },
    });

    Ok(OutboundDescriptor::new(
        "shadowsocks",
        format!("{}:{}", host, port),
        false,
        false,
        outbound,
    ))
}

fn plain_server(link: &str, protocol: &str, tls: bool) -> Result<OutboundDescriptor, ConversionError> {
    let endpoint = parse_endpoint(link)?;

    let mut server = json!({ "address": endpoint.host, "port": endpoint.port });
    if !endpoint.user.is_empty() {
        server["users"] = json!([{
            "user": endpoint.user,
            "pass": endpoint.password.clone().unwrap_or_default(),
        }]);
    }

    let mut outbound = json!({
        "tag": "proxy",
        "protocol": protocol,
        "settings": { "servers": [server] },
    });

    let stream = if tls {
        let mut query = endpoint.query.clone();
        query.insert("security".to_string(), "tls".to_string());
        query
            .entry("sni".to_string())
            .or_insert_with(|| endpoint.host.clone());
        StreamParams::from_query(&query, "tls")
    } else {
        StreamParams::from_query(&HashMap::new(), "none")
    };
    if tls {
        outbound["streamSettings"] = stream.to_json();
    }

    Ok(descriptor(protocol, endpoint.server(), &stream, outbound))
}
