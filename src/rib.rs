//! The RIB collaborator boundary (§6).
//!
//! Routing-table installation and best-path selection live outside
//! this crate; a session only needs somewhere to hand learned/withdrawn
//! prefixes and to signal "forget everything from this session".

use crate::codec::IpPrefix;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

/// Collaborator a [`crate::session::PeerSession`] reports route churn
/// to. Implementations decide storage, best-path selection, and
/// redistribution; this crate ships only test/no-op collaborators.
#[async_trait]
pub trait RibSink: Send + Sync {
    async fn install(&self, session_id: &str, prefixes: &[IpPrefix], path_attributes: &[u8]);
    async fn withdraw(&self, session_id: &str, prefixes: &[IpPrefix]);
    async fn flush(&self, session_id: &str);
}

/// Discards everything. Used when no RIB is wired up.
#[derive(Debug, Default)]
pub struct NullRibSink;

#[async_trait]
impl RibSink for NullRibSink {
    async fn install(&self, session_id: &str, prefixes: &[IpPrefix], _path_attributes: &[u8]) {
        debug!(session_id, count = prefixes.len(), "install (null sink)");
    }

    async fn withdraw(&self, session_id: &str, prefixes: &[IpPrefix]) {
        debug!(session_id, count = prefixes.len(), "withdraw (null sink)");
    }

    async fn flush(&self, session_id: &str) {
        debug!(session_id, "flush (null sink)");
    }
}

/// Records every call verbatim. Intended for tests.
#[derive(Debug, Default)]
pub struct RecordingRibSink {
    pub installs: Mutex<Vec<(String, Vec<IpPrefix>)>>,
    pub withdrawals: Mutex<Vec<(String, Vec<IpPrefix>)>>,
    pub flushes: Mutex<Vec<String>>,
}

#[async_trait]
impl RibSink for RecordingRibSink {
    async fn install(&self, session_id: &str, prefixes: &[IpPrefix], _path_attributes: &[u8]) {
        self.installs.lock().unwrap().push((session_id.to_string(), prefixes.to_vec()));
    }

    async fn withdraw(&self, session_id: &str, prefixes: &[IpPrefix]) {
        self.withdrawals.lock().unwrap().push((session_id.to_string(), prefixes.to_vec()));
    }

    async fn flush(&self, session_id: &str) {
        self.flushes.lock().unwrap().push(session_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_sink_captures_install_and_flush() {
        let sink = RecordingRibSink::default();
        let prefix = IpPrefix {
            prefix_len: 24,
            prefix: vec![10, 0, 0],
        };
        sink.install("peer-1", &[prefix.clone()], &[]).await;
        sink.flush("peer-1").await;

        assert_eq!(sink.installs.lock().unwrap().len(), 1);
        assert_eq!(sink.flushes.lock().unwrap(), vec!["peer-1".to_string()]);
    }
}
