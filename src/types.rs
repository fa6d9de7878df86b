//!
//! src/types.rs  Oct 2026
//!
//! Payloads of the di.fm api and the rows derived from them
//!

use serde::{Deserialize, Deserializer, Serialize};

pub type ChannelId = i64;
pub type TrackId = i64;
pub type ArtistId = i64;

/// Explicit `null` reads as the field default
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Any `{ "id": .. }` reference embedded in a payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRef {
    #[serde(default)]
    pub id: Option<i64>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub id: Option<ChannelId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub asset_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artists: Vec<IdRef>
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Votes {
    #[serde(default, deserialize_with = "null_as_default")]
    pub up: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub down: i64
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Images {
    #[serde(default)]
    pub default: Option<String>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    #[serde(default)]
    pub id: Option<TrackId>,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub length: Option<i64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub votes: Votes,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artist: IdRef,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Images,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artists: Vec<IdRef>
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default)]
    pub id: Option<ArtistId>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub bio_long: Option<String>,
    #[serde(default)]
    pub bio_short: Option<String>
}

/// One entry of `currently_playing`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub channel_id: ChannelId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track: IdRef
}

impl NowPlaying {
    /// (channel, track) pair, None while the channel plays nothing known
    pub fn play(&self) -> Option<(ChannelId, TrackId)> {
        self.track.id.map(|track_id| (self.channel_id, track_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Channel,
    Track,
    Artist
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Channel => "channel",
            EntityKind::Track   => "track",
            EntityKind::Artist  => "artist"
        }
    }

    /// Path segment under the api base
    pub fn path(self) -> &'static str {
        match self {
            EntityKind::Channel => "channels",
            EntityKind::Track   => "tracks",
            EntityKind::Artist  => "artists"
        }
    }

    /// The artists endpoint body is decoded whatever the status says
    pub fn checks_status(self) -> bool {
        !matches!(self, EntityKind::Artist)
    }
}

/// Decoded body of a single catalog fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Channel(Channel),
    Track(Track),
    Artist(Artist)
}

/// Row of `tracks` as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRow {
    pub id: TrackId,
    pub track: Option<String>,
    pub title: Option<String>,
    pub length: i64,
    pub upvotes: i64,
    pub downvotes: i64,
    pub artist_id: Option<ArtistId>,
    pub default_image: String
}

impl TrackRow {
    pub fn from_payload(id: TrackId, track: &Track) -> Self {
        Self {
            id,
            track: track.track.clone(),
            title: track.title.clone(),
            length: track.length.unwrap_or(0),
            upvotes: track.votes.up,
            downvotes: track.votes.down,
            artist_id: track.artist.id,
            default_image: track.images.default.clone().unwrap_or_default()
        }
    }
}

/// Track still waiting for a link search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCandidate {
    pub track_id: TrackId,
    pub display_name: String
}
