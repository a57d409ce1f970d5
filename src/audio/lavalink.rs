//! # Lavalink v4 node
//!
//! [`AudioNode`] implementation for a Lavalink v4 server.
//!
//! - Control channel: REST (`/v4/loadtracks`, `/v4/sessions/{id}/players/{guild}`)
//! - Event stream: websocket on `/v4/websocket`, translated into [`NodeEvent`]s
//!
//! The websocket task reconnects with capped exponential back-off. Player
//! calls fail with [`NodeError::NotReady`] while the socket has no session.

use anyhow::Context;
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serenity::model::id::{GuildId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, sync::Notify, task::JoinHandle};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::HeaderValue, protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audio::node::{
    AudioNode, NodeError, NodeEvent, NodeId, NodeStats, PlayOptions, TrackEndReason,
    VoiceConnection,
};
use crate::audio::track::{LoadResult, Track};
use crate::config::NodeConfig;

const CLIENT_NAME: &str = concat!("lavaqueue/", env!("CARGO_PKG_VERSION"));
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// Formato de la API REST/websocket de Lavalink v4

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTrackInfo {
    identifier: String,
    is_seekable: bool,
    author: String,
    length: u64,
    is_stream: bool,
    title: String,
    uri: Option<String>,
    artwork_url: Option<String>,
    source_name: String,
}

#[derive(Debug, Deserialize)]
struct WireTrack {
    encoded: String,
    info: WireTrackInfo,
}

impl From<WireTrack> for Track {
    fn from(wire: WireTrack) -> Self {
        Self {
            id: wire.info.identifier,
            encoded: wire.encoded,
            title: wire.info.title,
            author: wire.info.author,
            duration_ms: wire.info.length,
            source_uri: wire.info.uri,
            artwork_url: wire.info.artwork_url,
            source_name: wire.info.source_name,
            is_stream: wire.info.is_stream,
            is_seekable: wire.info.is_seekable,
            requester_id: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WirePlaylistInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct WirePlaylist {
    info: WirePlaylistInfo,
    tracks: Vec<WireTrack>,
}

#[derive(Debug, Deserialize)]
struct WireException {
    message: Option<String>,
    severity: String,
    cause: Option<String>,
}

impl WireException {
    fn describe(self) -> String {
        self.message
            .or(self.cause)
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "loadType", content = "data", rename_all = "camelCase")]
enum WireLoadResult {
    Track(WireTrack),
    Playlist(WirePlaylist),
    Search(Vec<WireTrack>),
    Empty {},
    Error(WireException),
}

impl From<WireLoadResult> for LoadResult {
    fn from(wire: WireLoadResult) -> Self {
        match wire {
            WireLoadResult::Track(track) => Self::Track(track.into()),
            WireLoadResult::Playlist(playlist) => Self::Playlist {
                name: playlist.info.name,
                tracks: playlist.tracks.into_iter().map(Track::from).collect(),
            },
            WireLoadResult::Search(tracks) => Self::Search(tracks.into_iter().map(Track::from).collect()),
            WireLoadResult::Empty {} => Self::Empty,
            WireLoadResult::Error(exception) => {
                let severity = exception.severity.clone();
                Self::Error {
                    message: exception.describe(),
                    severity,
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTrackUpdate<'a> {
    /// `null` detiene la reproducción.
    encoded: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireVoiceState<'a> {
    token: &'a str,
    endpoint: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePlayerUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    track: Option<WireTrackUpdate<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    paused: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<WireVoiceState<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireReady {
    resumed: bool,
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct WirePlayerState {
    #[serde(default)]
    position: u64,
    connected: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePlayerUpdateOp {
    guild_id: String,
    state: WirePlayerState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCpu {
    lavalink_load: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireStats {
    players: u32,
    playing_players: u32,
    uptime: u64,
    cpu: WireCpu,
}

#[derive(Debug, Deserialize)]
struct WireEventTrack {
    encoded: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
enum WireEvent {
    TrackStartEvent {
        guild_id: String,
        track: WireEventTrack,
    },
    TrackEndEvent {
        guild_id: String,
        track: WireEventTrack,
        reason: String,
    },
    TrackExceptionEvent {
        guild_id: String,
        track: WireEventTrack,
        exception: WireException,
    },
    TrackStuckEvent {
        guild_id: String,
        track: WireEventTrack,
        threshold_ms: u64,
    },
    WebSocketClosedEvent {
        guild_id: String,
        code: u16,
        reason: String,
    },
}

/// Mensaje del websocket ya interpretado.
#[derive(Debug, PartialEq)]
enum Inbound {
    Ready { session_id: String, resumed: bool },
    Event(NodeEvent),
}

fn parse_guild(raw: &str) -> Option<GuildId> {
    raw.parse::<u64>().ok().filter(|id| *id != 0).map(GuildId::new)
}

/// Translates one websocket text frame. `Ok(None)` means the frame carried
/// nothing the core cares about.
fn parse_message(node: &NodeId, text: &str) -> Result<Option<Inbound>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let op = value
        .get("op")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();

    let inbound = match op.as_str() {
        "ready" => {
            let ready: WireReady = serde_json::from_value(value)?;
            Some(Inbound::Ready {
                session_id: ready.session_id,
                resumed: ready.resumed,
            })
        }
        "playerUpdate" => {
            let update: WirePlayerUpdateOp = serde_json::from_value(value)?;
            parse_guild(&update.guild_id).map(|guild_id| {
                Inbound::Event(NodeEvent::PlayerUpdate {
                    node: node.clone(),
                    guild_id,
                    position: Duration::from_millis(update.state.position),
                    connected: update.state.connected,
                })
            })
        }
        "stats" => {
            let stats: WireStats = serde_json::from_value(value)?;
            Some(Inbound::Event(NodeEvent::Stats {
                node: node.clone(),
                stats: NodeStats {
                    players: stats.players,
                    playing_players: stats.playing_players,
                    uptime: Duration::from_millis(stats.uptime),
                    lavalink_load: stats.cpu.lavalink_load,
                },
            }))
        }
        "event" => {
            let event: WireEvent = serde_json::from_value(value)?;
            translate_event(node, event).map(Inbound::Event)
        }
        other => {
            debug!("Op desconocido del nodo {}: {}", node, other);
            None
        }
    };
    Ok(inbound)
}

fn translate_event(node: &NodeId, event: WireEvent) -> Option<NodeEvent> {
    let node = node.clone();
    match event {
        WireEvent::TrackStartEvent { guild_id, track } => Some(NodeEvent::TrackStart {
            node,
            guild_id: parse_guild(&guild_id)?,
            track: track.encoded,
        }),
        WireEvent::TrackEndEvent {
            guild_id,
            track,
            reason,
        } => {
            let Some(reason) = TrackEndReason::parse(&reason) else {
                warn!("Razón de fin desconocida: {}", reason);
                return None;
            };
            Some(NodeEvent::TrackEnd {
                node,
                guild_id: parse_guild(&guild_id)?,
                track: track.encoded,
                reason,
            })
        }
        WireEvent::TrackExceptionEvent {
            guild_id,
            track,
            exception,
        } => Some(NodeEvent::TrackException {
            node,
            guild_id: parse_guild(&guild_id)?,
            track: track.encoded,
            message: exception.describe(),
        }),
        WireEvent::TrackStuckEvent {
            guild_id,
            track,
            threshold_ms,
        } => Some(NodeEvent::TrackStuck {
            node,
            guild_id: parse_guild(&guild_id)?,
            track: track.encoded,
            threshold: Duration::from_millis(threshold_ms),
        }),
        WireEvent::WebSocketClosedEvent {
            guild_id,
            code,
            reason,
        } => Some(NodeEvent::VoiceClosed {
            node,
            guild_id: parse_guild(&guild_id)?,
            code,
            reason,
        }),
    }
}

/// 1s, 2s, 4s... hasta 30s.
fn backoff(attempt: u32) -> Duration {
    let secs = 1u64 << attempt.min(5);
    Duration::from_secs(secs).min(MAX_BACKOFF)
}

fn map_reqwest(error: reqwest::Error) -> NodeError {
    if error.is_timeout() {
        NodeError::Timeout
    } else if error.is_decode() {
        NodeError::Protocol(error.to_string())
    } else {
        NodeError::Unreachable(error.to_string())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, NodeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(NodeError::Rejected {
        status: status.as_u16(),
        message,
    })
}

pub struct LavalinkNode {
    id: NodeId,
    http: reqwest::Client,
    rest_base: String,
    ws_url: String,
    password: String,
    user_id: UserId,
    session_id: RwLock<Option<String>>,
    events: mpsc::UnboundedSender<NodeEvent>,
    reconnect: Notify,
}

impl LavalinkNode {
    pub fn new(
        config: &NodeConfig,
        user_id: UserId,
        events: mpsc::UnboundedSender<NodeEvent>,
    ) -> anyhow::Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(CLIENT_NAME)
            .build()
            .context("Error creando cliente HTTP para Lavalink")?;

        let (http_scheme, ws_scheme) = if config.secure {
            ("https", "wss")
        } else {
            ("http", "ws")
        };

        Ok(Arc::new(Self {
            id: NodeId::from(config.name.as_str()),
            http,
            rest_base: format!("{}://{}:{}", http_scheme, config.host, config.port),
            ws_url: format!("{}://{}:{}/v4/websocket", ws_scheme, config.host, config.port),
            password: config.password.clone(),
            user_id,
            session_id: RwLock::new(None),
            events,
            reconnect: Notify::new(),
        }))
    }

    /// Starts the websocket task. It stops when `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move { node.run_socket(shutdown).await })
    }

    /// Versión del servidor (`GET /version`), usada por el health check.
    pub async fn version(&self) -> Result<String, NodeError> {
        let response = self
            .http
            .get(format!("{}/version", self.rest_base))
            .header("Authorization", &self.password)
            .send()
            .await
            .map_err(map_reqwest)?;
        check(response).await?.text().await.map_err(map_reqwest)
    }

    async fn run_socket(&self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            // Un permiso pendiente de la conexión anterior no debe cerrar la nueva.
            let _ = self.reconnect.notified().now_or_never();
            if let Err(e) = self.connect_once(&shutdown).await {
                warn!("⚠️ Websocket del nodo {} falló: {:#}", self.id, e);
            }
            if self.mark_down("websocket closed") {
                attempt = 0;
            } else {
                attempt = attempt.saturating_add(1);
            }

            if shutdown.is_cancelled() {
                break;
            }
            let delay = backoff(attempt);
            debug!("Reintentando nodo {} en {:?}", self.id, delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("🔌 Socket del nodo {} detenido", self.id);
    }

    async fn connect_once(&self, shutdown: &CancellationToken) -> anyhow::Result<()> {
        let mut request = self.ws_url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", HeaderValue::from_str(&self.password)?);
        headers.insert("User-Id", HeaderValue::from_str(&self.user_id.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_static(CLIENT_NAME));

        let (socket, _) = tokio_tungstenite::connect_async(request)
            .await
            .with_context(|| format!("No se pudo conectar a {}", self.ws_url))?;
        info!("🔗 Websocket conectado al nodo {}", self.id);
        let (mut sink, mut stream) = socket.split();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = self.reconnect.notified() => {
                    info!("🔄 Reconexión solicitada para el nodo {}", self.id);
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!("Nodo {} cerró el websocket: {:?}", self.id, frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                }
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match parse_message(&self.id, text) {
            Ok(Some(Inbound::Ready {
                session_id,
                resumed,
            })) => {
                info!("✅ Nodo {} listo (sesión {})", self.id, session_id);
                *self.session_id.write() = Some(session_id);
                self.emit(NodeEvent::Ready {
                    node: self.id.clone(),
                    resumed,
                });
            }
            Ok(Some(Inbound::Event(event))) => self.emit(event),
            Ok(None) => {}
            Err(e) => warn!("Mensaje inválido del nodo {}: {}", self.id, e),
        }
    }

    /// Drops the node session; returns whether the node had been ready.
    fn mark_down(&self, reason: &str) -> bool {
        let was_ready = self.session_id.write().take().is_some();
        if was_ready {
            self.emit(NodeEvent::Disconnected {
                node: self.id.clone(),
                reason: reason.to_string(),
            });
        }
        was_ready
    }

    fn emit(&self, event: NodeEvent) {
        if self.events.send(event).is_err() {
            error!("Canal de eventos cerrado, nodo {}", self.id);
        }
    }

    fn player_url(&self, guild_id: GuildId) -> Result<String, NodeError> {
        let session_id = self.session_id.read().clone().ok_or(NodeError::NotReady)?;
        Ok(format!(
            "{}/v4/sessions/{}/players/{}",
            self.rest_base, session_id, guild_id
        ))
    }

    async fn update_player(&self, guild_id: GuildId, update: &WirePlayerUpdate<'_>) -> Result<(), NodeError> {
        let response = self
            .http
            .patch(self.player_url(guild_id)?)
            .header("Authorization", &self.password)
            .json(update)
            .send()
            .await
            .map_err(map_reqwest)?;
        check(response).await.map(|_| ())
    }
}

#[async_trait]
impl AudioNode for LavalinkNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn load_tracks(&self, identifier: &str) -> Result<LoadResult, NodeError> {
        let url = format!(
            "{}/v4/loadtracks?identifier={}",
            self.rest_base,
            urlencoding::encode(identifier)
        );
        let response = self
            .http
            .get(url)
            .header("Authorization", &self.password)
            .send()
            .await
            .map_err(map_reqwest)?;
        let wire: WireLoadResult = check(response).await?.json().await.map_err(map_reqwest)?;
        Ok(wire.into())
    }

    async fn play(
        &self,
        guild_id: GuildId,
        track: &Track,
        voice: &VoiceConnection,
        options: PlayOptions,
    ) -> Result<(), NodeError> {
        let update = WirePlayerUpdate {
            track: Some(WireTrackUpdate {
                encoded: Some(&track.encoded),
            }),
            position: Some(options.start.as_millis() as u64),
            volume: Some(u16::from(options.volume)),
            paused: Some(options.paused),
            voice: Some(WireVoiceState {
                token: &voice.token,
                endpoint: &voice.endpoint,
                session_id: &voice.session_id,
            }),
        };
        self.update_player(guild_id, &update).await
    }

    async fn stop(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let update = WirePlayerUpdate {
            track: Some(WireTrackUpdate { encoded: None }),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn set_paused(&self, guild_id: GuildId, paused: bool) -> Result<(), NodeError> {
        let update = WirePlayerUpdate {
            paused: Some(paused),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u8) -> Result<(), NodeError> {
        let update = WirePlayerUpdate {
            volume: Some(u16::from(volume)),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<(), NodeError> {
        let update = WirePlayerUpdate {
            position: Some(position.as_millis() as u64),
            ..Default::default()
        };
        self.update_player(guild_id, &update).await
    }

    async fn destroy_player(&self, guild_id: GuildId) -> Result<(), NodeError> {
        let response = self
            .http
            .delete(self.player_url(guild_id)?)
            .header("Authorization", &self.password)
            .send()
            .await
            .map_err(map_reqwest)?;
        check(response).await.map(|_| ())
    }

    /// Guarda un permiso: la petición no se pierde si el socket está entre
    /// dos iteraciones del `select!`.
    fn request_reconnect(&self) {
        self.reconnect.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn node() -> NodeId {
        NodeId::from("main")
    }

    const TRACK_JSON: &str = r#"{
        "encoded": "QAAA...",
        "info": {
            "identifier": "dQw4w9WgXcQ",
            "isSeekable": true,
            "author": "RickAstleyVEVO",
            "length": 212000,
            "isStream": false,
            "position": 0,
            "title": "Never Gonna Give You Up",
            "uri": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "artworkUrl": null,
            "isrc": null,
            "sourceName": "youtube"
        },
        "pluginInfo": {},
        "userData": {}
    }"#;

    fn load(json: &str) -> LoadResult {
        serde_json::from_str::<WireLoadResult>(json).unwrap().into()
    }

    #[test]
    fn parses_every_load_type() {
        let single = load(&format!(r#"{{"loadType":"track","data":{TRACK_JSON}}}"#));
        match single {
            LoadResult::Track(track) => {
                assert_eq!(track.id, "dQw4w9WgXcQ");
                assert_eq!(track.encoded, "QAAA...");
                assert_eq!(track.duration_ms, 212_000);
                assert!(track.is_seekable);
                assert_eq!(track.requester_id, None);
            }
            other => panic!("unexpected {other:?}"),
        }

        let search = load(&format!(r#"{{"loadType":"search","data":[{TRACK_JSON},{TRACK_JSON}]}}"#));
        assert!(matches!(search, LoadResult::Search(tracks) if tracks.len() == 2));

        let playlist = load(&format!(
            r#"{{"loadType":"playlist","data":{{"info":{{"name":"Mix","selectedTrack":-1}},"pluginInfo":{{}},"tracks":[{TRACK_JSON}]}}}}"#
        ));
        assert!(matches!(playlist, LoadResult::Playlist { ref name, ref tracks } if name == "Mix" && tracks.len() == 1));

        assert_eq!(load(r#"{"loadType":"empty","data":{}}"#), LoadResult::Empty);

        let error = load(
            r#"{"loadType":"error","data":{"message":"Video unavailable","severity":"common","cause":"..."}}"#,
        );
        assert_eq!(
            error,
            LoadResult::Error {
                message: "Video unavailable".into(),
                severity: "common".into(),
            }
        );
    }

    #[test]
    fn ready_carries_the_session_id() {
        let inbound = parse_message(&node(), r#"{"op":"ready","resumed":false,"sessionId":"abc123"}"#).unwrap();
        assert_eq!(
            inbound,
            Some(Inbound::Ready {
                session_id: "abc123".into(),
                resumed: false,
            })
        );
    }

    #[test]
    fn track_end_event_maps_reason_and_guild() {
        let text = format!(
            r#"{{"op":"event","type":"TrackEndEvent","guildId":"817327181659111454","track":{TRACK_JSON},"reason":"finished"}}"#
        );
        assert_eq!(
            parse_message(&node(), &text).unwrap(),
            Some(Inbound::Event(NodeEvent::TrackEnd {
                node: node(),
                guild_id: GuildId::new(817327181659111454),
                track: "QAAA...".into(),
                reason: TrackEndReason::Finished,
            }))
        );
    }

    #[test]
    fn exception_and_voice_close_events_are_translated() {
        let exception = format!(
            r#"{{"op":"event","type":"TrackExceptionEvent","guildId":"1","track":{TRACK_JSON},"exception":{{"message":"boom","severity":"fault","cause":"x"}}}}"#
        );
        assert!(matches!(
            parse_message(&node(), &exception).unwrap(),
            Some(Inbound::Event(NodeEvent::TrackException { message, .. })) if message == "boom"
        ));

        let closed = r#"{"op":"event","type":"WebSocketClosedEvent","guildId":"1","code":4014,"reason":"Disconnected","byRemote":true}"#;
        assert!(matches!(
            parse_message(&node(), closed).unwrap(),
            Some(Inbound::Event(NodeEvent::VoiceClosed { code: 4014, .. }))
        ));
    }

    #[test]
    fn player_update_and_stats_are_translated() {
        let update = r#"{"op":"playerUpdate","guildId":"5","state":{"time":1500467109,"position":60000,"connected":true,"ping":50}}"#;
        assert_eq!(
            parse_message(&node(), update).unwrap(),
            Some(Inbound::Event(NodeEvent::PlayerUpdate {
                node: node(),
                guild_id: GuildId::new(5),
                position: Duration::from_secs(60),
                connected: true,
            }))
        );

        let stats = r#"{"op":"stats","players":3,"playingPlayers":2,"uptime":123456,
            "memory":{"free":1,"used":1,"allocated":1,"reservable":1},
            "cpu":{"cores":4,"systemLoad":0.5,"lavalinkLoad":0.25},"frameStats":null}"#;
        assert!(matches!(
            parse_message(&node(), stats).unwrap(),
            Some(Inbound::Event(NodeEvent::Stats { stats, .. })) if stats.players == 3 && stats.playing_players == 2
        ));
    }

    #[test]
    fn invalid_guild_ids_and_unknown_ops_are_dropped() {
        let zero = r#"{"op":"playerUpdate","guildId":"0","state":{"position":1,"connected":true}}"#;
        assert_eq!(parse_message(&node(), zero).unwrap(), None);
        assert_eq!(parse_message(&node(), r#"{"op":"somethingNew"}"#).unwrap(), None);
        assert!(parse_message(&node(), "not json").is_err());
    }

    #[test]
    fn stop_update_sends_a_null_track() {
        let update = WirePlayerUpdate {
            track: Some(WireTrackUpdate { encoded: None }),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({ "track": { "encoded": null } })
        );
    }

    #[tokio::test]
    async fn reconnect_request_survives_until_the_socket_listens() {
        let config = NodeConfig {
            name: "main".to_string(),
            host: "localhost".to_string(),
            port: 2333,
            password: "youshallnotpass".to_string(),
            secure: false,
        };
        let (events, _rx) = mpsc::unbounded_channel();
        let lavalink = LavalinkNode::new(&config, UserId::new(1), events).unwrap();

        lavalink.request_reconnect();

        let woke = tokio::time::timeout(Duration::from_millis(100), lavalink.reconnect.notified()).await;
        assert!(woke.is_ok());
    }

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(0), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(8));
        assert_eq!(backoff(10), MAX_BACKOFF);
    }
}
