//! Typed client for the scheduler RPC surface.
//!
//! One client owns one buffered TCP connection. Every transport fault
//! poisons the connection; the next call reconnects. Callers decide the
//! retry policy (workers back off and retry, the fan-in sink retries the
//! same batch).

use log::debug;
use tokio::io::BufStream;
use tokio::net::TcpStream;

use crate::wire::{
    self, Cookie, ProxyAddress, Request, Response, RetStatus, UserIdentity, WireError,
};

/// Failures surfaced to callers of the typed methods.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("failed to connect to scheduler at {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("scheduler sent a response of the wrong kind")]
    UnexpectedResponse,
}

/// A lazily connecting scheduler client.
pub struct SchedulerClient {
    addr: String,
    stream: Option<BufStream<TcpStream>>,
}

impl SchedulerClient {
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    async fn ensure_open(&mut self) -> Result<&mut BufStream<TcpStream>, ClientError> {
        if self.stream.is_none() {
            debug!("connecting to scheduler at {}", self.addr);
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|source| ClientError::Connect {
                    addr: self.addr.clone(),
                    source,
                })?;
            self.stream = Some(BufStream::new(stream));
        }
        Ok(self.stream.as_mut().expect("stream set above"))
    }

    /// One request/response turn. The connection is dropped on any wire
    /// fault so the next call starts clean.
    async fn call(&mut self, request: &Request) -> Result<Response, ClientError> {
        let stream = self.ensure_open().await?;
        let turn = async {
            wire::write_frame(stream, request).await?;
            wire::read_frame::<Response, _>(stream).await
        };
        match turn.await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.stream = None;
                Err(e.into())
            }
        }
    }

    /// Drop the connection without waiting for the peer.
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub async fn register_downloader(&mut self, name: &str) -> Result<RetStatus, ClientError> {
        match self
            .call(&Request::RegisterDownloader {
                name: name.to_string(),
            })
            .await?
        {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn unregister_downloader(&mut self, name: &str) -> Result<RetStatus, ClientError> {
        match self
            .call(&Request::UnregisterDownloader {
                name: name.to_string(),
            })
            .await?
        {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn request_user_identity(
        &mut self,
        name: &str,
    ) -> Result<UserIdentity, ClientError> {
        match self
            .call(&Request::RequestUserIdentity {
                name: name.to_string(),
            })
            .await?
        {
            Response::Identity(identity) => Ok(identity),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn resign_user_identity(
        &mut self,
        identity: UserIdentity,
        name: &str,
    ) -> Result<RetStatus, ClientError> {
        match self
            .call(&Request::ResignUserIdentity {
                identity,
                name: name.to_string(),
            })
            .await?
        {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn grab_links(&mut self, size: u32) -> Result<Vec<String>, ClientError> {
        match self.call(&Request::GrabLinks { size }).await? {
            Response::Links(links) => Ok(links),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn submit_links(&mut self, links: Vec<String>) -> Result<RetStatus, ClientError> {
        match self.call(&Request::SubmitLinks { links }).await? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn grab_topic_links(&mut self, size: u32) -> Result<Vec<String>, ClientError> {
        match self.call(&Request::GrabTopicLinks { size }).await? {
            Response::Links(links) => Ok(links),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn submit_topic_links(
        &mut self,
        links: Vec<String>,
    ) -> Result<RetStatus, ClientError> {
        match self.call(&Request::SubmitTopicLinks { links }).await? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn request_proxies(
        &mut self,
        name: &str,
        size: u32,
    ) -> Result<Vec<ProxyAddress>, ClientError> {
        match self
            .call(&Request::RequestProxies {
                name: name.to_string(),
                size,
            })
            .await?
        {
            Response::Proxies(proxies) => Ok(proxies),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn request_cookie(&mut self, name: &str) -> Result<Cookie, ClientError> {
        match self
            .call(&Request::RequestCookie {
                name: name.to_string(),
            })
            .await?
        {
            Response::Cookie(cookie) => Ok(cookie),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    pub async fn submit_cookies(&mut self, cookies: Vec<Cookie>) -> Result<RetStatus, ClientError> {
        match self.call(&Request::SubmitCookies { cookies }).await? {
            Response::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
