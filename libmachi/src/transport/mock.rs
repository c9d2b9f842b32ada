//! Scripted transport for testing
//!
//! Replies are handed out in the order they were queued and every request is
//! recorded. Available in all builds so integration tests in other crates can
//! drive a full publish cycle without network access.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::{MachiError, Result};

#[derive(Debug, Clone)]
enum Reply {
    Response(HttpResponse),
    Failure(String),
}

/// Transport that replays queued responses
///
/// Cloning shares the queue and the request log, so a test can keep one
/// handle for assertions and give the other to the code under test.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    pub fn push(&self, status: u16, body: impl Into<String>) -> &Self {
        self.lock_replies()
            .push_back(Reply::Response(HttpResponse::new(status, body)));
        self
    }

    /// Queue a JSON response
    pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.push(status, body.to_string())
    }

    /// Queue a failure where no response is received
    pub fn push_failure(&self, message: &str) -> &Self {
        self.lock_replies()
            .push_back(Reply::Failure(message.to_string()));
        self
    }

    /// All requests sent so far
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Requests whose `command` field equals the given value
    pub fn requests_with_command(&self, command: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.field("command") == Some(command))
            .collect()
    }

    /// Number of queued replies not yet consumed
    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Reply>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let description = format!("{} {}", request.method.as_str(), request.url);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }

        match self.lock_replies().pop_front() {
            Some(Reply::Response(response)) => Ok(response),
            Some(Reply::Failure(message)) => Err(MachiError::Transport(format!(
                "{} failed: {}",
                description, message
            ))),
            None => Err(MachiError::Transport(format!(
                "{}: no scripted response left",
                description
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replies_in_order_and_records_requests() {
        let transport = MockTransport::new();
        transport.push(200, "first").push(201, "second");

        let first = transport.send(HttpRequest::get("https://a.test")).await.unwrap();
        let second = transport.send(HttpRequest::post("https://b.test")).await.unwrap();

        assert_eq!(first.body, "first");
        assert_eq!(second.status, 201);
        assert_eq!(transport.requests().len(), 2);
        assert_eq!(transport.requests()[1].url, "https://b.test");
    }

    #[tokio::test]
    async fn test_exhausted_queue_is_transport_error() {
        let transport = MockTransport::new();
        let result = transport.send(HttpRequest::get("https://a.test")).await;
        assert!(matches!(result, Err(MachiError::Transport(_))));
    }

    #[tokio::test]
    async fn test_failure_reply() {
        let transport = MockTransport::new();
        transport.push_failure("connection reset");
        let err = transport
            .send(HttpRequest::get("https://a.test"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
