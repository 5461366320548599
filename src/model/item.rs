/// Fetched items (posts and user profiles)
///
/// Items keep the raw upstream JSON so the archive stores exactly what was
/// returned, and expose the few parsed fields the crawl needs: the monotonic
/// ID and the embedded references used for fan-out.
use serde::Deserialize;
use serde_json::Value;

/// One playable rendition of a video or animated GIF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoVariant {
    pub content_type: String,
    pub bitrate: Option<u64>,
    pub url: String,
}

/// A media attachment embedded in a post
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaEntity {
    /// "photo", "video" or "animated_gif"
    pub media_type: String,
    pub media_url: Option<String>,
    pub media_url_https: Option<String>,
    pub variants: Vec<VideoVariant>,
}

impl MediaEntity {
    /// The URL to download, preferring the HTTPS form when both are present
    pub fn preferred_url(&self) -> Option<&str> {
        self.media_url_https
            .as_deref()
            .filter(|u| !u.is_empty())
            .or_else(|| self.media_url.as_deref().filter(|u| !u.is_empty()))
    }

    /// Highest-bitrate MP4 rendition, for videos and animated GIFs
    pub fn best_video_variant(&self) -> Option<&VideoVariant> {
        self.variants
            .iter()
            .filter(|v| v.content_type == "video/mp4")
            .max_by_key(|v| v.bitrate.unwrap_or(0))
    }
}

/// A post as returned by the upstream API
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: u64,
    pub user_id: u64,
    /// ID of the original post when this is a retweet, 0 otherwise
    pub retweeted_id: u64,
    /// ID of the quoted post, empty when nothing is quoted
    pub quoted_status_id: String,
    pub media: Vec<MediaEntity>,
    pub raw: Value,
}

/// A user profile as returned by the upstream API
#[derive(Debug, Clone, PartialEq)]
pub struct UserProfile {
    pub id: u64,
    pub screen_name: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Post(Post),
    User(UserProfile),
}

impl Item {
    pub fn id(&self) -> u64 {
        match self {
            Self::Post(post) => post.id,
            Self::User(user) => user.id,
        }
    }

    pub fn as_post(&self) -> Option<&Post> {
        match self {
            Self::Post(post) => Some(post),
            Self::User(_) => None,
        }
    }

    pub fn raw(&self) -> &Value {
        match self {
            Self::Post(post) => &post.raw,
            Self::User(user) => &user.raw,
        }
    }

    /// Serialized bytes written to blob storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self.raw())
    }
}

#[derive(Deserialize)]
struct WireId {
    id: u64,
}

#[derive(Deserialize, Default)]
struct WireEntities {
    #[serde(default)]
    media: Vec<WireMedia>,
}

#[derive(Deserialize)]
struct WireMedia {
    #[serde(rename = "type", default)]
    media_type: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    media_url_https: Option<String>,
    #[serde(default)]
    video_info: Option<WireVideoInfo>,
}

#[derive(Deserialize)]
struct WireVideoInfo {
    #[serde(default)]
    variants: Vec<WireVariant>,
}

#[derive(Deserialize)]
struct WireVariant {
    content_type: String,
    #[serde(default)]
    bitrate: Option<u64>,
    url: String,
}

#[derive(Deserialize)]
struct WirePost {
    id: u64,
    #[serde(default)]
    user: Option<WireId>,
    #[serde(default)]
    retweeted_status: Option<WireId>,
    #[serde(default)]
    quoted_status_id_str: Option<String>,
    #[serde(default)]
    entities: Option<WireEntities>,
    #[serde(default)]
    extended_entities: Option<WireEntities>,
}

#[derive(Deserialize)]
struct WireUser {
    id: u64,
    #[serde(default)]
    screen_name: String,
}

impl From<WireMedia> for MediaEntity {
    fn from(wire: WireMedia) -> Self {
        Self {
            media_type: wire.media_type,
            media_url: wire.media_url,
            media_url_https: wire.media_url_https,
            variants: wire
                .video_info
                .map(|info| {
                    info.variants
                        .into_iter()
                        .map(|v| VideoVariant {
                            content_type: v.content_type,
                            bitrate: v.bitrate,
                            url: v.url,
                        })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

impl Post {
    /// Parses a post from the upstream JSON, keeping the raw value
    pub fn from_json(raw: Value) -> Result<Self, serde_json::Error> {
        let wire = WirePost::deserialize(&raw)?;

        // Extended entities carry every attachment; plain entities only the first.
        let media = match (wire.extended_entities, wire.entities) {
            (Some(ext), _) if !ext.media.is_empty() => ext.media,
            (_, Some(plain)) => plain.media,
            _ => Vec::new(),
        };

        Ok(Self {
            id: wire.id,
            user_id: wire.user.map(|u| u.id).unwrap_or(0),
            retweeted_id: wire.retweeted_status.map(|r| r.id).unwrap_or(0),
            quoted_status_id: wire.quoted_status_id_str.unwrap_or_default(),
            media: media.into_iter().map(MediaEntity::from).collect(),
            raw,
        })
    }
}

impl UserProfile {
    pub fn from_json(raw: Value) -> Result<Self, serde_json::Error> {
        let wire = WireUser::deserialize(&raw)?;
        Ok(Self {
            id: wire.id,
            screen_name: wire.screen_name,
            raw,
        })
    }
}
