/// Queued work messages
///
/// Every message is self-describing: it carries a full copy of the
/// `WorkContext` so it can be replayed without re-resolving configuration.
/// On the queue the discriminator and every context field are also exposed as
/// string attributes.
use crate::model::{ResourceKind, SubjectId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const ATTR_KIND: &str = "kind";
pub const ATTR_API_BASE_URL: &str = "api-base-url";
pub const ATTR_BEARER_TOKEN: &str = "bearer-token";
pub const ATTR_QUEUE_URL: &str = "queue-url";
pub const ATTR_BLOB_ROOT: &str = "blob-root";
pub const ATTR_DATABASE_PATH: &str = "database-path";

/// Errors decoding a message from the queue
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Missing message attribute: {0}")]
    MissingAttribute(&'static str),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Message kind attribute '{attribute}' does not match body kind '{body}'")]
    KindMismatch { attribute: String, body: String },

    #[error("Malformed message body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Every endpoint and credential a consumer needs to process a message
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkContext {
    pub api_base_url: String,
    pub bearer_token: String,
    pub queue_url: String,
    pub blob_root: String,
    pub database_path: String,
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("api_base_url", &self.api_base_url)
            .field("bearer_token", &"<redacted>")
            .field("queue_url", &self.queue_url)
            .field("blob_root", &self.blob_root)
            .field("database_path", &self.database_path)
            .finish()
    }
}

impl WorkContext {
    fn write_attributes(&self, attributes: &mut BTreeMap<String, String>) {
        attributes.insert(ATTR_API_BASE_URL.to_string(), self.api_base_url.clone());
        attributes.insert(ATTR_BEARER_TOKEN.to_string(), self.bearer_token.clone());
        attributes.insert(ATTR_QUEUE_URL.to_string(), self.queue_url.clone());
        attributes.insert(ATTR_BLOB_ROOT.to_string(), self.blob_root.clone());
        attributes.insert(ATTR_DATABASE_PATH.to_string(), self.database_path.clone());
    }

    /// Rebuilds a context from string attributes
    pub fn from_attributes(attributes: &BTreeMap<String, String>) -> Result<Self, MessageError> {
        let get = |key: &'static str| {
            attributes
                .get(key)
                .cloned()
                .ok_or(MessageError::MissingAttribute(key))
        };
        Ok(Self {
            api_base_url: get(ATTR_API_BASE_URL)?,
            bearer_token: get(ATTR_BEARER_TOKEN)?,
            queue_url: get(ATTR_QUEUE_URL)?,
            blob_root: get(ATTR_BLOB_ROOT)?,
            database_path: get(ATTR_DATABASE_PATH)?,
        })
    }
}

/// Discriminator for `WorkPayload`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ResolvePost,
    FetchMedia,
    CrawlResource,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResolvePost => "resolve-post",
            Self::FetchMedia => "fetch-media",
            Self::CrawlResource => "crawl-resource",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "resolve-post" => Some(Self::ResolvePost),
            "fetch-media" => Some(Self::FetchMedia),
            "crawl-resource" => Some(Self::CrawlResource),
            _ => None,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkPayload {
    /// Fetch and archive a single referenced post
    ResolvePost {
        post_id: u64,
        #[serde(default)]
        origin: Option<SubjectId>,
    },

    /// Download a media URL and store its bytes at `destination_key`
    FetchMedia {
        url: String,
        destination_key: String,
        #[serde(default)]
        origin: Option<SubjectId>,
    },

    /// Run one crawl step for one resource kind of one subject
    CrawlResource {
        subject_id: SubjectId,
        resource: ResourceKind,
    },
}

impl WorkPayload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ResolvePost { .. } => MessageKind::ResolvePost,
            Self::FetchMedia { .. } => MessageKind::FetchMedia,
            Self::CrawlResource { .. } => MessageKind::CrawlResource,
        }
    }
}

/// A self-describing unit of asynchronous work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkMessage {
    pub payload: WorkPayload,
    pub context: WorkContext,
}

impl WorkMessage {
    pub fn new(payload: WorkPayload, context: WorkContext) -> Self {
        Self { payload, context }
    }

    pub fn resolve_post(post_id: u64, origin: Option<SubjectId>, context: &WorkContext) -> Self {
        Self::new(WorkPayload::ResolvePost { post_id, origin }, context.clone())
    }

    pub fn fetch_media(
        url: impl Into<String>,
        destination_key: impl Into<String>,
        origin: Option<SubjectId>,
        context: &WorkContext,
    ) -> Self {
        Self::new(
            WorkPayload::FetchMedia {
                url: url.into(),
                destination_key: destination_key.into(),
                origin,
            },
            context.clone(),
        )
    }

    pub fn crawl_resource(
        subject_id: SubjectId,
        resource: ResourceKind,
        context: &WorkContext,
    ) -> Self {
        Self::new(
            WorkPayload::CrawlResource {
                subject_id,
                resource,
            },
            context.clone(),
        )
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// String attributes: the discriminator plus every context field
    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attributes = BTreeMap::new();
        attributes.insert(ATTR_KIND.to_string(), self.kind().as_str().to_string());
        self.context.write_attributes(&mut attributes);
        attributes
    }

    pub fn to_body(&self) -> Result<String, MessageError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restores a message from its queued body and attributes
    ///
    /// The `kind` attribute must agree with the body's discriminator.
    pub fn from_parts(
        body: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<Self, MessageError> {
        let attr_kind = attributes
            .get(ATTR_KIND)
            .ok_or(MessageError::MissingAttribute(ATTR_KIND))?;
        let kind = MessageKind::from_str_opt(attr_kind)
            .ok_or_else(|| MessageError::UnknownKind(attr_kind.clone()))?;

        let message: WorkMessage = serde_json::from_str(body)?;
        if message.kind() != kind {
            return Err(MessageError::KindMismatch {
                attribute: attr_kind.clone(),
                body: message.kind().to_string(),
            });
        }
        Ok(message)
    }
}
