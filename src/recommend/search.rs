use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::SpotifyConfig;

use super::{SearchError, Track, TrackSearch};

#[derive(Deserialize)]
struct SearchResponse {
    tracks: TrackPage,
}

#[derive(Deserialize)]
struct TrackPage {
    #[serde(default)]
    items: Vec<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    id: String,
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    #[serde(default)]
    preview_url: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

impl From<SpotifyTrack> for Track {
    fn from(track: SpotifyTrack) -> Self {
        let artists: Vec<&str> = track.artists.iter().map(|a| a.name.as_str()).collect();
        let display_name = if artists.is_empty() {
            track.name.clone()
        } else {
            format!("{} - {}", track.name, artists.join(", "))
        };

        Track {
            id: track.id,
            display_name,
            preview_url: track.preview_url.filter(|url| !url.is_empty()),
            uri: track.uri,
        }
    }
}

/// `GET /v1/search?type=track` on the Spotify Web API.
pub struct SpotifySearch {
    client: reqwest::Client,
    endpoint: String,
    limit: u32,
}

impl SpotifySearch {
    pub fn new(client: reqwest::Client, config: &SpotifyConfig) -> Self {
        Self {
            client,
            endpoint: format!("{}/v1/search", config.api_base.trim_end_matches('/')),
            limit: config.search_limit,
        }
    }
}

#[async_trait]
impl TrackSearch for SpotifySearch {
    async fn search_tracks(&self, query: &str, access_token: &str) -> Result<Vec<Track>, SearchError> {
        let limit = self.limit.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(access_token)
            .query(&[("q", query), ("type", "track"), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|err| SearchError::Transport(err.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => return Err(SearchError::Unauthorized),
            status if !status.is_success() => return Err(SearchError::Status(status.as_u16())),
            _ => {}
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|err| SearchError::Malformed(err.to_string()))?;

        Ok(body.tracks.items.into_iter().map(Track::from).collect())
    }
}
