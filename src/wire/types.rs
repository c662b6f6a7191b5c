//! Schema types for the scheduler RPC surface.

use serde::{Deserialize, Serialize};

/// Substring that marks a link as belonging to the topic queue.
pub const TOPIC_LINK_MARKER: &str = "p/100808";

/// Status returned by operations that carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetStatus {
    Success,
    Failed,
}

/// A login credential pair, leased exclusively to one downloader at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub pwd: String,
}

impl UserIdentity {
    pub fn new(name: impl Into<String>, pwd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pwd: pwd.into(),
        }
    }
}

/// An HTTP proxy endpoint. Proxies are shared, never leased exclusively.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub addr: String,
    pub port: u16,
}

impl ProxyAddress {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
        }
    }

    /// Render as an `http://addr:port` proxy URL for an HTTP client.
    #[must_use]
    pub fn to_proxy_url(&self) -> String {
        format!("http://{}:{}", self.addr, self.port)
    }
}

/// A session cookie submitted by the external login tool.
///
/// The reserved pair `("NULL", "")` is the sentinel meaning "none
/// available"; callers poll until a real cookie shows up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub user: String,
    pub cookie: String,
}

impl Cookie {
    pub fn new(user: impl Into<String>, cookie: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            cookie: cookie.into(),
        }
    }

    /// The "no cookie available" sentinel.
    #[must_use]
    pub fn sentinel() -> Self {
        Self {
            user: "NULL".to_string(),
            cookie: String::new(),
        }
    }

    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.user == "NULL" && self.cookie.is_empty()
    }
}

/// The two logical link queues multiplexed over the RPC surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkClass {
    /// General links: deduplicated set, no ordering promised to callers.
    General,
    /// Topic links: strict FIFO across submits.
    Topic,
}

impl LinkClass {
    /// Classify a link by the topic marker substring.
    #[must_use]
    pub fn of(link: &str) -> Self {
        if link.contains(TOPIC_LINK_MARKER) {
            LinkClass::Topic
        } else {
            LinkClass::General
        }
    }
}

/// One RPC operation with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    RegisterDownloader { name: String },
    UnregisterDownloader { name: String },
    RequestUserIdentity { name: String },
    ResignUserIdentity { identity: UserIdentity, name: String },
    GrabLinks { size: u32 },
    SubmitLinks { links: Vec<String> },
    GrabTopicLinks { size: u32 },
    SubmitTopicLinks { links: Vec<String> },
    RequestProxies { name: String, size: u32 },
    RequestCookie { name: String },
    SubmitCookies { cookies: Vec<Cookie> },
}

/// The result of one RPC operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Status(RetStatus),
    Identity(UserIdentity),
    Links(Vec<String>),
    Proxies(Vec<ProxyAddress>),
    Cookie(Cookie),
}
