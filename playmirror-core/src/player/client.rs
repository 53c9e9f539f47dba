//! Player REST API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::types::*;
use super::{Player, PlayerError};
use crate::config::PlayerConfig;
use crate::sync::{PlaybackState, RepeatMode};

/// Connection timeout (short since it's localhost)
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Request timeout (short since it's localhost)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How often to poll while waiting for a new track to load
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Volume difference below which no volume request is made
const VOLUME_EPSILON: f64 = 0.01;

/// Drives a local player through its HTTP API
#[derive(Debug, Clone)]
pub struct HttpPlayer {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    seek_tolerance_secs: f64,
    load_timeout: Duration,
}

impl HttpPlayer {
    pub fn new(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            // Limit connection pool to avoid stale connections
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(10))
            .tcp_keepalive(None)
            .build()?;

        Ok(Self {
            http,
            // 127.0.0.1 rather than localhost to avoid IPv6 issues
            base_url: format!("http://127.0.0.1:{}", config.port),
            api_token: config.api_token.clone(),
            seek_tolerance_secs: config.seek_tolerance_secs,
            load_timeout: Duration::from_millis(config.load_timeout_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with optional authentication
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api/v1/playback{}", self.base_url, path);
        let mut req = self.http.request(method, &url);

        if let Some(token) = &self.api_token {
            req = req.header("apitoken", token);
        }

        req
    }

    async fn post(&self, path: &str) -> Result<(), PlayerError> {
        self.request(Method::POST, path)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Check that the player is running and accepts our token
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn check_connection(&self) -> Result<(), PlayerError> {
        debug!("Checking player connection");

        let resp = self
            .request(Method::GET, "/active")
            .send()
            .await
            .map_err(|e| {
                warn!("Connection error: {:?}", e);
                if e.is_connect() || e.is_timeout() {
                    PlayerError::NotReachable
                } else {
                    PlayerError::Http(e)
                }
            })?;

        match resp.status().as_u16() {
            200 | 204 => Ok(()),
            401 | 403 => Err(PlayerError::Unauthorized),
            code => Err(PlayerError::Api(format!("Unexpected response (HTTP {})", code))),
        }
    }

    pub async fn is_playing(&self) -> Result<bool, PlayerError> {
        let resp: ApiResponse<IsPlayingResponse> = self
            .request(Method::GET, "/is-playing")
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.data.is_playing)
    }

    /// The current track, or None if nothing is loaded
    pub async fn now_playing(&self) -> Result<Option<NowPlaying>, PlayerError> {
        let resp = self.request(Method::GET, "/now-playing").send().await?;

        if resp.status() == 404 || resp.status() == 204 {
            return Ok(None);
        }

        // An unparseable body means nothing is playing
        match resp.json::<ApiResponse<NowPlayingResponse>>().await {
            Ok(data) => Ok(Some(data.data.info)),
            Err(_) => Ok(None),
        }
    }

    pub async fn get_volume(&self) -> Result<f64, PlayerError> {
        let resp: ApiResponse<VolumeResponse> = self
            .request(Method::GET, "/volume")
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.data.volume)
    }

    pub async fn get_repeat_mode(&self) -> Result<RepeatMode, PlayerError> {
        let resp: ApiResponse<RepeatModeResponse> = self
            .request(Method::GET, "/repeat-mode")
            .send()
            .await?
            .json()
            .await?;

        Ok(repeat_mode_from_api(resp.data.value))
    }

    pub async fn play(&self) -> Result<(), PlayerError> {
        self.post("/play").await
    }

    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.post("/pause").await
    }

    pub async fn toggle_repeat(&self) -> Result<(), PlayerError> {
        self.post("/toggle-repeat").await
    }

    pub async fn seek(&self, position_secs: f64) -> Result<(), PlayerError> {
        self.request(Method::POST, "/seek")
            .json(&SeekRequest {
                position: position_secs.max(0.0),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f64) -> Result<(), PlayerError> {
        self.request(Method::POST, "/volume")
            .json(&VolumeRequest {
                volume: volume.clamp(0.0, 1.0),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn play_song(&self, id: &str) -> Result<(), PlayerError> {
        self.request(Method::POST, "/play-item")
            .json(&PlayItemRequest {
                item_type: "songs".to_string(),
                id: id.to_string(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Poll until the player reports `id` with a known duration.
    /// Returns false on timeout.
    async fn wait_for_song(&self, id: &str) -> Result<bool, PlayerError> {
        let deadline = Instant::now() + self.load_timeout;

        loop {
            if let Some(info) = self.now_playing().await? {
                if info.song_id() == Some(id) && info.has_duration() {
                    return Ok(true);
                }
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    /// Toggle until the player reports `target` (at most one full cycle)
    async fn sync_repeat_mode(&self, target: RepeatMode) -> Result<(), PlayerError> {
        let mut current = self.get_repeat_mode().await?;
        for _ in 0..2 {
            if current == target {
                return Ok(());
            }
            self.toggle_repeat().await?;
            current = self.get_repeat_mode().await?;
        }
        if current != target {
            warn!(?current, ?target, "Could not match repeat mode");
        }
        Ok(())
    }
}

#[async_trait]
impl Player for HttpPlayer {
    async fn snapshot(&self) -> Result<PlaybackState, PlayerError> {
        let (info, is_playing, volume, repeat_mode) = tokio::try_join!(
            self.now_playing(),
            self.is_playing(),
            self.get_volume(),
            self.get_repeat_mode(),
        )?;

        Ok(PlaybackState {
            song: info.as_ref().and_then(NowPlaying::to_song),
            volume,
            position: info.map(|i| i.current_playback_time).unwrap_or(0.0),
            is_playing,
            repeat_mode,
        })
    }

    async fn apply(&self, target: &PlaybackState) -> Result<(), PlayerError> {
        let current = self.snapshot().await?;

        let song_changed = match target.song_id() {
            Some(id) if current.song_id() != Some(id) => {
                debug!(song_id = id, "Loading host song");
                self.play_song(id).await?;
                if !self.wait_for_song(id).await? {
                    warn!(song_id = id, "Song did not finish loading in time");
                }
                true
            }
            _ => false,
        };

        let drift = (target.position - current.position).abs();
        if song_changed || drift > self.seek_tolerance_secs {
            debug!(position = target.position, drift, "Seeking");
            self.seek(target.position).await?;
        }

        if (target.volume - current.volume).abs() > VOLUME_EPSILON {
            self.set_volume(target.volume).await?;
        }

        // play-item starts playback on its own
        let playing_now = if song_changed { true } else { current.is_playing };
        if target.is_playing != playing_now {
            if target.is_playing {
                self.play().await?;
            } else {
                self.pause().await?;
            }
        }

        if target.repeat_mode != current.repeat_mode {
            self.sync_repeat_mode(target.repeat_mode).await?;
        }

        Ok(())
    }
}
