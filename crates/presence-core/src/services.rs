//! Capabilities provided by external collaborators
//!
//! The core only ever talks to the assistant relay, the push notifier and the
//! vendor database through these traits. Implementations live in the binary.

use crate::error::ServiceError;
use async_trait::async_trait;

/// Voice-assistant relay
#[async_trait]
pub trait Assistant: Send + Sync {
    /// Run a textual command, returning the assistant's textual answer
    async fn call(&self, command: &str) -> Result<String, ServiceError>;
}

/// Push notification sender
///
/// Calls may be redundant; delivery dedup is not guaranteed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, title: &str, body: &str, topic: &str) -> Result<(), ServiceError>;
}

/// MAC address to vendor name lookup
#[async_trait]
pub trait VendorLookup: Send + Sync {
    async fn lookup(&self, mac: &str) -> Result<String, ServiceError>;
}

/// Recording fakes shared by the test suites of downstream crates
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A notification captured by [`RecordingNotifier`]
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentNotification {
        pub title: String,
        pub body: String,
        pub topic: String,
    }

    /// Notifier that remembers every message
    #[derive(Debug, Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<SentNotification>>,
    }

    impl RecordingNotifier {
        #[must_use]
        pub fn sent(&self) -> Vec<SentNotification> {
            self.sent.lock().map(|s| s.clone()).unwrap_or_default()
        }

        /// Messages sent with the given title
        #[must_use]
        pub fn titled(&self, title: &str) -> Vec<SentNotification> {
            self.sent()
                .into_iter()
                .filter(|n| n.title == title)
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, title: &str, body: &str, topic: &str) -> Result<(), ServiceError> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(SentNotification {
                    title: title.to_string(),
                    body: body.to_string(),
                    topic: topic.to_string(),
                });
            }
            Ok(())
        }
    }

    /// Assistant that records commands and answers from a script
    ///
    /// Each call pops the next scripted answer; with an empty script every
    /// call succeeds with `"ok"`.
    #[derive(Debug, Default)]
    pub struct ScriptedAssistant {
        calls: Mutex<Vec<String>>,
        script: Mutex<VecDeque<Result<String, String>>>,
    }

    impl ScriptedAssistant {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue an answer for a future call; `Err` makes that call fail
        pub fn push(&self, answer: Result<&str, &str>) {
            if let Ok(mut script) = self.script.lock() {
                script.push_back(answer.map(str::to_string).map_err(str::to_string));
            }
        }

        /// Make the next `n` calls fail
        pub fn fail_next(&self, n: usize) {
            for _ in 0..n {
                self.push(Err("assistant offline"));
            }
        }

        #[must_use]
        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Assistant for ScriptedAssistant {
        async fn call(&self, command: &str) -> Result<String, ServiceError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(command.to_string());
            }
            let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
            match next {
                Some(Ok(answer)) => Ok(answer),
                Some(Err(reason)) => Err(ServiceError::Transport(reason)),
                None => Ok("ok".to_string()),
            }
        }
    }

    /// Vendor lookup with a fixed answer, or a fixed failure when `None`
    #[derive(Debug, Default)]
    pub struct FixedVendor(pub Option<String>);

    #[async_trait]
    impl VendorLookup for FixedVendor {
        async fn lookup(&self, _mac: &str) -> Result<String, ServiceError> {
            self.0
                .clone()
                .ok_or_else(|| ServiceError::RateLimited("429 Too Many Requests".to_string()))
        }
    }
}
