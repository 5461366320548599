//! Core data model for the archiver
//!
//! This module defines the values that flow between the crawl components:
//! - `Subject` / `ResourceKind` / `ResourceFlags`: which accounts are archived and what
//! - `Watermark`: the persisted resumption point per (subject, resource kind)
//! - `Item`: one fetched post or user profile
//! - `WorkMessage` / `WorkContext`: self-describing units of queued work

mod item;
mod message;
mod subject;
mod watermark;

pub use item::{Item, MediaEntity, Post, UserProfile, VideoVariant};
pub use message::{MessageError, MessageKind, WorkContext, WorkMessage, WorkPayload};
pub use subject::{ResourceFlags, ResourceKind, Subject, SubjectId};
pub use watermark::{Watermark, CURSOR_END, CURSOR_START};
