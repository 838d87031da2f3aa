//! TuneVault core
//!
//! Search, browse and bulk-download tracks from the music service, with
//! title/artist/album tags, lyrics and cover art embedded, into a directory
//! of the caller's choosing.
//!
//! - `crypto` - fixed-key cipher codec used by the request protocol
//! - `api` - signed requests, encrypted transport, response decoding
//! - `audio` - container detection and tag writing
//! - `file` - naming templates, staging, destinations
//! - `download` - the per-track pipeline, orchestrator and host

pub mod api;
pub mod audio;
pub mod crypto;
pub mod download;
pub mod error;
pub mod file;

pub use api::{Credentials, MusicClient, Track, TrackKey};
pub use download::{DownloadEvent, DownloadOrchestrator, DownloadRules, OrchestrationHost};
pub use error::{Result, TuneVaultError};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_are_valid() {
        assert!(DownloadRules::default().validate().is_ok());
    }
}
