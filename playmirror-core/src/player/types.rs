//! Player REST API payloads

use serde::{Deserialize, Serialize};

use crate::sync::{RepeatMode, Song};

/// Response wrapper for most API endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    #[serde(flatten)]
    pub data: T,
}

/// Currently playing track information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    #[serde(default)]
    pub play_params: Option<PlayParams>,

    pub name: String,

    #[serde(default)]
    pub artist_name: String,

    /// Total duration in milliseconds (0 until the track has loaded)
    #[serde(default)]
    pub duration_in_millis: u64,

    /// Current playback position in seconds
    #[serde(default)]
    pub current_playback_time: f64,
}

impl NowPlaying {
    pub fn song_id(&self) -> Option<&str> {
        self.play_params.as_ref().map(|p| p.id.as_str())
    }

    pub fn has_duration(&self) -> bool {
        self.duration_in_millis > 0
    }

    /// Sync-facing description of the track, if it has an ID
    pub fn to_song(&self) -> Option<Song> {
        Some(Song {
            id: self.song_id()?.to_string(),
            title: self.name.clone(),
            artist: self.artist_name.clone(),
            duration_secs: self
                .has_duration()
                .then(|| self.duration_in_millis as f64 / 1000.0),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayParams {
    pub id: String,
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IsPlayingResponse {
    pub is_playing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NowPlayingResponse {
    pub info: NowPlaying,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeResponse {
    pub volume: f64,
}

/// 0 = off, 1 = repeat one, 2 = repeat all
#[derive(Debug, Clone, Deserialize)]
pub struct RepeatModeResponse {
    pub value: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayItemRequest {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeekRequest {
    pub position: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeRequest {
    pub volume: f64,
}

pub fn repeat_mode_from_api(value: u8) -> RepeatMode {
    match value {
        1 => RepeatMode::One,
        2 => RepeatMode::All,
        _ => RepeatMode::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_playing_to_song() {
        let raw = r#"{
            "status": "ok",
            "info": {
                "playParams": {"id": "1440857781", "kind": "song"},
                "name": "Intro",
                "artistName": "Band",
                "albumName": "Album",
                "durationInMillis": 215000,
                "currentPlaybackTime": 12.5
            }
        }"#;
        let resp: ApiResponse<NowPlayingResponse> = serde_json::from_str(raw).unwrap();
        let song = resp.data.info.to_song().unwrap();

        assert_eq!(song.id, "1440857781");
        assert_eq!(song.artist, "Band");
        assert_eq!(song.duration_secs, Some(215.0));
        assert_eq!(resp.data.info.current_playback_time, 12.5);
    }

    #[test]
    fn test_loading_track_has_no_duration() {
        let info: NowPlaying = serde_json::from_str(
            r#"{"playParams": {"id": "1", "kind": "song"}, "name": "x"}"#,
        )
        .unwrap();
        assert!(!info.has_duration());
        assert_eq!(info.to_song().unwrap().duration_secs, None);
    }

    #[test]
    fn test_repeat_mapping() {
        assert_eq!(repeat_mode_from_api(0), RepeatMode::None);
        assert_eq!(repeat_mode_from_api(1), RepeatMode::One);
        assert_eq!(repeat_mode_from_api(2), RepeatMode::All);
    }
}
