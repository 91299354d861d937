#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Linnet is an async voice gateway client for Discord, written in Rust.
//!
//! The library offers:
//!  * A standalone [`Driver`] for one voice connection. If you can create
//!  a [`ConnectionInfo`] using any gateway library, or any other language for your
//!  bot, then you can run the driver: it handles the voice websocket, UDP IP
//!  discovery, encryption, and paced RTP transmission of Opus frames.
//!  * A [`Player`] queueing pre-encoded Opus tracks, with pause, skip and stop,
//!  which the driver pulls audio from.
//!  * A [`Manager`] tying both to the host bot's own gateway connection, one
//!  call and one player per guild, via the [`VoiceUpdate`] trait.
//!
//! Audio must already be Opus-encoded: Linnet neither decodes, mixes, nor
//! transcodes.
//!
//! ## Intents
//! The manager relies on voice state and voice server events, so the host bot
//! must request the `GUILD_VOICE_STATES` intent.
//!
//! [`Player`]: tracks::Player
//! [`VoiceUpdate`]: shards::VoiceUpdate

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    // TODO: would require significant rewriting of all existing docs
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
mod handler;
pub mod id;
pub(crate) mod info;
pub mod join;
mod manager;
pub mod model;
pub mod shards;
pub mod tracks;
mod ws;

pub use crate::{
    driver::Driver,
    events::{CoreEvent, Event, EventContext, EventHandler, TrackEvent},
    handler::*,
    manager::*,
};

pub use config::Config;
pub use info::ConnectionInfo;
