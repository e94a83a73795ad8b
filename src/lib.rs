//! Async client runtime and codec for the OptiTrack NatNet motion-capture
//! streaming protocol.
//!
//! The hard engineering lives in three interlocking pieces: the
//! version-parametric [`protocol`] codec, the dual-socket async connection
//! runtime ([`command_channel`] + [`data_channel`]) aggregated by
//! [`client::NatNetClient`], and the echo-probe [`clock_sync`] engine that
//! maps server ticks onto the client's wall clock.

pub mod buffer;
pub mod client;
pub mod clock_sync;
pub mod command_channel;
pub mod config;
pub mod data_channel;
pub mod error;
pub mod protocol;
pub mod version;

pub use client::NatNetClient;
pub use config::ClientConfig;
pub use error::{NatNetError, Result};
pub use version::VersionContext;
