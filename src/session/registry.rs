use super::config::SessionConfig;
use super::session::VoiceSession;
use super::stats::SessionStats;
use crate::audio::Encoder;
use crate::config::{ChannelConfig, RecorderConfig};
use crate::delivery::DeliveryRegistry;
use crate::gateway::Gateway;
use crate::recording::Dispatcher;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionDeps {
    pub gateway: Arc<dyn Gateway>,
    pub encoder: Arc<dyn Encoder>,
    pub deliveries: DeliveryRegistry,
}

struct SessionHandle {
    stats: watch::Receiver<SessionStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Process-wide set of channel sessions
///
/// Created once the gateway is available and torn down with `shutdown` on
/// process exit.
pub struct SessionRegistry {
    sessions: BTreeMap<String, SessionHandle>,
    cancel: CancellationToken,
}

impl SessionRegistry {
    /// Spawn one session per configured channel
    ///
    /// A channel whose configuration is invalid is logged and skipped; the
    /// others start normally.
    pub fn start(channels: &[ChannelConfig], recorder: &RecorderConfig, deps: SessionDeps) -> Self {
        let cancel = CancellationToken::new();
        let mut sessions = BTreeMap::new();

        for channel in channels {
            if sessions.contains_key(&channel.id) {
                error!("Channel {} is configured more than once, skipping duplicate", channel.id);
                continue;
            }

            match Self::spawn_session(channel, recorder, &deps, cancel.child_token()) {
                Ok(handle) => {
                    sessions.insert(channel.id.clone(), handle);
                }
                Err(e) => error!("Not recording channel {}: {:#}", channel.id, e),
            }
        }

        info!("Session registry started with {} channels", sessions.len());
        Self { sessions, cancel }
    }

    fn spawn_session(
        channel: &ChannelConfig,
        recorder: &RecorderConfig,
        deps: &SessionDeps,
        cancel: CancellationToken,
    ) -> Result<SessionHandle> {
        let config = SessionConfig::from_channel(channel, recorder)?;
        let dispatcher = Dispatcher::new(&config.channel_id, &config.destinations, &deps.deliveries)?;
        let (session, stats) = VoiceSession::new(
            config,
            Arc::clone(&deps.gateway),
            Arc::clone(&deps.encoder),
            dispatcher,
        );
        let task = tokio::spawn(session.run(cancel));

        Ok(SessionHandle {
            stats,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn channel_ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn stats(&self, channel_id: &str) -> Option<SessionStats> {
        self.sessions
            .get(channel_id)
            .map(|handle| handle.stats.borrow().clone())
    }

    pub fn all_stats(&self) -> Vec<SessionStats> {
        self.sessions
            .values()
            .map(|handle| handle.stats.borrow().clone())
            .collect()
    }

    /// Stop every session and wait for final segments to be delivered
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        for (channel_id, handle) in &self.sessions {
            let task = handle.task.lock().await.take();
            if let Some(task) = task {
                if let Err(e) = task.await {
                    error!("Session task for {} failed: {}", channel_id, e);
                }
            }
        }
        info!("All sessions stopped");
    }
}
