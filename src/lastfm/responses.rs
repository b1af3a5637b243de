//! Serde models for `user.getRecentTracks` and the API error envelope.
//!
//! Last.fm encodes most numbers as strings, collapses one-element lists into
//! a bare object, and uses empty strings for missing MBIDs. Everything here
//! tolerates those quirks and normalizes them before records leave the module.

use serde::{Deserialize, Deserializer};

use crate::state::ScrobbleRecord;

#[derive(Debug, Deserialize)]
pub(crate) struct RecentTracksResponse {
    pub(crate) recenttracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecentTracks {
    #[serde(default)]
    pub(crate) track: OneOrMany<RawTrack>,
    #[serde(rename = "@attr")]
    pub(crate) attr: PageAttr,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PageAttr {
    #[serde(deserialize_with = "lenient_u32")]
    pub(crate) page: u32,
    #[serde(rename = "totalPages", deserialize_with = "lenient_u32")]
    pub(crate) total_pages: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum OneOrMany<T> {
    Many(Vec<T>),
    One(Box<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub(crate) fn into_vec(self) -> Vec<T> {
        match self {
            Self::Many(items) => items,
            Self::One(item) => vec![*item],
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTrack {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) mbid: Option<String>,
    pub(crate) artist: TextWithMbid,
    #[serde(default)]
    pub(crate) album: Option<TextWithMbid>,
    #[serde(default)]
    pub(crate) date: Option<PlayedAt>,
    #[serde(rename = "@attr", default)]
    pub(crate) attr: Option<TrackAttr>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TextWithMbid {
    #[serde(rename = "#text", default)]
    pub(crate) text: String,
    #[serde(default)]
    pub(crate) mbid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PlayedAt {
    #[serde(deserialize_with = "lenient_i64")]
    pub(crate) uts: i64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TrackAttr {
    #[serde(default)]
    pub(crate) nowplaying: Option<String>,
}

/// `{"error": 10, "message": "Invalid API key ..."}`
#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    pub(crate) error: u32,
    #[serde(default)]
    pub(crate) message: String,
}

impl RawTrack {
    fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|a| a.nowplaying.as_deref())
            .is_some_and(|v| v == "true")
    }

    /// Convert into a stored record. The currently playing track has no
    /// timestamp yet and yields `None`.
    pub(crate) fn into_record(self) -> Option<ScrobbleRecord> {
        if self.is_now_playing() {
            return None;
        }
        let timestamp = self.date.as_ref()?.uts;
        let (album, album_external_id) = match self.album {
            Some(album) => (non_empty(Some(album.text)), non_empty(album.mbid)),
            None => (None, None),
        };
        Some(ScrobbleRecord {
            artist: self.artist.text,
            artist_external_id: non_empty(self.artist.mbid),
            album,
            album_external_id,
            track: self.name,
            track_external_id: non_empty(self.mbid),
            timestamp,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Number(i64),
    String(String),
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let n = lenient_i64(deserializer)?;
    u32::try_from(n).map_err(serde::de::Error::custom)
}
