//! WebSocket change-feed listener.
//!
//! Joins one channel per watched table on the store's realtime socket,
//! decodes record-change frames into [`ChangeEvent`]s and publishes them
//! into the REST store's broadcast senders. The socket is kept alive with
//! periodic heartbeats and reconnected with jittered exponential backoff;
//! a dropped connection degrades the client to poll-only, it never fails
//! a caller.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::StoreConfig;
use crate::error::{PitbossError, Result};

use super::rest::publish;
use super::{ChangeEvent, ChangeKind, WatchedTable};

const INITIAL_BACKOFF_SECS: u64 = 1;

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub url: String,
    pub api_key: String,
    pub heartbeat_secs: u64,
    pub max_backoff_secs: u64,
}

impl RealtimeConfig {
    /// Build from the store config; `None` when no realtime endpoint is
    /// configured (poll-only mode).
    pub fn from_store(config: &StoreConfig) -> Option<Self> {
        config.realtime_url.as_ref().map(|url| Self {
            url: url.clone(),
            api_key: config.api_key.clone(),
            heartbeat_secs: 30,
            max_backoff_secs: 60,
        })
    }

    fn socket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.url)?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

/// Incoming socket frame. Non-change frames (join acks, heartbeat replies)
/// carry events we simply do not recognize as change kinds.
#[derive(Debug, Deserialize)]
struct SocketFrame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

fn channel_topic(table: WatchedTable) -> String {
    format!("realtime:public:{}", table.as_str())
}

/// Decode one text frame into a change event, `None` for everything that
/// is not a record change on a watched table.
fn decode_frame(text: &str) -> Option<ChangeEvent> {
    let frame: SocketFrame = serde_json::from_str(text).ok()?;
    let kind = ChangeKind::from_event_name(&frame.event)?;
    let table_name = frame.topic.rsplit(':').next()?;
    let table = WatchedTable::from_name(table_name)?;
    let record = match kind {
        // Deletes carry the old row.
        ChangeKind::Delete => frame.payload.get("old_record"),
        _ => frame.payload.get("record"),
    }
    .cloned()
    .unwrap_or(frame.payload);
    Some(ChangeEvent {
        table,
        kind,
        record,
    })
}

/// Owns the socket task. Dropping the listener (or calling `shutdown`)
/// closes the connection and stops reconnecting.
pub struct RealtimeListener {
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeListener {
    pub fn spawn(
        config: RealtimeConfig,
        senders: HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(config, senders, shutdown_rx));
        Self {
            shutdown_tx,
            task: Some(task),
        }
    }

    pub fn shutdown(mut self) {
        self.signal_shutdown();
    }

    fn signal_shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for RealtimeListener {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

async fn run(
    config: RealtimeConfig,
    senders: HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff_secs = INITIAL_BACKOFF_SECS;
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        match stream_changes(&config, &senders, &mut shutdown_rx, &mut backoff_secs).await {
            Ok(()) => return,
            Err(e) => {
                let jitter_ms = rand::thread_rng().gen_range(0..500);
                let delay = Duration::from_secs(backoff_secs) + Duration::from_millis(jitter_ms);
                warn!(error = %e, ?delay, "realtime socket lost, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.changed() => return,
                }
                backoff_secs = (backoff_secs * 2).min(config.max_backoff_secs.max(1));
            }
        }
    }
}

/// One connection lifetime: join every table channel, then pump frames
/// until the socket drops or shutdown is signalled.
async fn stream_changes(
    config: &RealtimeConfig,
    senders: &HashMap<WatchedTable, broadcast::Sender<ChangeEvent>>,
    shutdown_rx: &mut watch::Receiver<bool>,
    backoff_secs: &mut u64,
) -> Result<()> {
    let url = config.socket_url()?;
    let (mut socket, _) = connect_async(url.as_str()).await?;
    info!("realtime socket connected");

    let mut frame_ref: u64 = 0;
    for table in WatchedTable::ALL {
        frame_ref += 1;
        let join = json!({
            "topic": channel_topic(table),
            "event": "phx_join",
            "payload": {},
            "ref": frame_ref.to_string(),
        });
        socket.send(Message::Text(join.to_string())).await?;
    }
    // Joined; the next failure starts backoff from scratch.
    *backoff_secs = INITIAL_BACKOFF_SECS;

    let mut heartbeat =
        tokio::time::interval(Duration::from_secs(config.heartbeat_secs.max(1)));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = socket.close(None).await;
                return Ok(());
            }
            _ = heartbeat.tick() => {
                frame_ref += 1;
                let beat = json!({
                    "topic": "phoenix",
                    "event": "heartbeat",
                    "payload": {},
                    "ref": frame_ref.to_string(),
                });
                socket.send(Message::Text(beat.to_string())).await?;
            }
            frame = socket.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = decode_frame(&text) {
                            debug!(table = %event.table, kind = ?event.kind, "change event");
                            publish(senders, event.table, event.kind, event.record);
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        socket.send(Message::Pong(payload)).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(PitbossError::Store(
                            "realtime socket closed by peer".into(),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_requires_a_realtime_url() {
        let mut store_config = StoreConfig::default();
        assert!(RealtimeConfig::from_store(&store_config).is_none());

        store_config.realtime_url = Some("wss://store.example.com/realtime/v1".into());
        let config = RealtimeConfig::from_store(&store_config).expect("config");
        assert_eq!(config.heartbeat_secs, 30);
    }

    #[test]
    fn decodes_record_change_frames() {
        let text = r#"{
            "topic": "realtime:public:trading_config",
            "event": "UPDATE",
            "payload": { "record": { "bot_status": "running" } }
        }"#;
        let event = decode_frame(text).expect("change event");
        assert_eq!(event.table, WatchedTable::TradingConfig);
        assert_eq!(event.kind, ChangeKind::Update);
        assert_eq!(event.record["bot_status"], "running");
    }

    #[test]
    fn deletes_carry_the_old_row() {
        let text = r#"{
            "topic": "realtime:public:notifications",
            "event": "DELETE",
            "payload": { "old_record": { "title": "gone" } }
        }"#;
        let event = decode_frame(text).expect("change event");
        assert_eq!(event.kind, ChangeKind::Delete);
        assert_eq!(event.record["title"], "gone");
    }

    #[test]
    fn ignores_protocol_frames_and_foreign_topics() {
        let reply = r#"{"topic":"realtime:public:trading_config","event":"phx_reply","payload":{}}"#;
        assert!(decode_frame(reply).is_none());

        let foreign = r#"{"topic":"realtime:public:some_other_table","event":"INSERT","payload":{}}"#;
        assert!(decode_frame(foreign).is_none());

        assert!(decode_frame("not json").is_none());
    }
}
