//! Full pipeline through the host actor against a mocked backend
//!
//! Requests are signed and encrypted for real; mockito answers with
//! hex-encrypted envelopes and serves a small WAV file as the CDN.

use lofty::picture::PictureType;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::ItemKey;
use mockito::{Server, ServerGuard};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tunevault_core::api::client::{ClientConfig, Credentials, MusicClient};
use tunevault_core::api::models::{Album, Artist, QualityLevel, Track, TrackKey};
use tunevault_core::audio::metadata::LoftyTagWriter;
use tunevault_core::crypto::codec::{encrypt, Encoding};
use tunevault_core::download::{
    BatchId, DownloadEvent, DownloadRules, HostConfig, OrchestrationHost, TaskState,
};
use tunevault_core::error::TuneVaultError;
use tunevault_core::file::destination::LocalDirectory;
use tunevault_core::file::paths::FileNameTemplate;

fn encrypted(json: &str) -> Vec<u8> {
    encrypt(json.as_bytes(), Encoding::Raw, Encoding::Hex).unwrap()
}

/// 1x1 transparent PNG
const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

fn wav_bytes(samples: u32) -> Vec<u8> {
    let data_len = samples * 2;
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVE");
    bytes.extend_from_slice(b"fmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes());
    bytes.extend_from_slice(&8000u32.to_le_bytes());
    bytes.extend_from_slice(&16000u32.to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.resize(bytes.len() + data_len as usize, 0);
    bytes
}

fn track(id: i64) -> Track {
    Track {
        id,
        title: "Song".to_string(),
        artists: vec![
            Artist {
                name: "A".to_string(),
                id: 10,
            },
            Artist {
                name: "B".to_string(),
                id: 11,
            },
        ],
        album: Album {
            name: "Record".to_string(),
            id: 20,
            cover_url: None,
        },
    }
}

fn host_for(server: &ServerGuard, staging: &TempDir) -> OrchestrationHost {
    let config = ClientConfig::builder().base_url(server.url()).build();
    let client = MusicClient::with_config(config).unwrap();
    OrchestrationHost::spawn(
        Arc::new(client),
        Arc::new(LoftyTagWriter::new()),
        HostConfig {
            staging_dir: Some(staging.path().to_path_buf()),
            ..Default::default()
        },
    )
}

async fn until_finished(
    events: &mut broadcast::Receiver<DownloadEvent>,
    batch_id: BatchId,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("batch did not finish in time")
            .expect("event stream closed");
        let done = matches!(event, DownloadEvent::BatchFinished { batch_id: id } if id == batch_id);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn test_download_tags_and_commits_into_directory() {
    let mut server = Server::new_async().await;
    let audio_url = format!("{}/media/1.wav", server.url());

    let url_mock = server
        .mock("POST", "/eapi/song/enhance/player/url/v1")
        .match_header("cookie", "MUSIC_U=abc")
        .with_body(encrypted(&format!(
            r#"{{"code":200,"data":[{{"id":1,"url":"{audio_url}","level":"lossless"}}]}}"#
        )))
        .create_async()
        .await;
    server
        .mock("POST", "/eapi/song/lyric/v1")
        .with_body(encrypted(
            r#"{"code":200,"lrc":{"lyric":"[00:01.00]hello\n[00:02.50]world\n"}}"#,
        ))
        .create_async()
        .await;
    let media_mock = server
        .mock("GET", "/media/1.wav")
        .with_body(wav_bytes(4000))
        .create_async()
        .await;
    let cover_mock = server
        .mock("GET", "/covers/20.png")
        .with_body(PNG)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let host = host_for(&server, &staging);
    let mut events = host.subscribe();

    let rules = DownloadRules {
        quality: QualityLevel::Lossless,
        file_name_template: FileNameTemplate::new("${level}${name} - ${artists}"),
        ..Default::default()
    };
    let mut with_cover = track(1);
    with_cover.album.cover_url = Some(format!("{}/covers/20.png", server.url()));
    let batch = host
        .submit(
            vec![with_cover],
            rules,
            Credentials::new("MUSIC_U=abc"),
            Arc::new(LocalDirectory::new(out.path())),
        )
        .await
        .unwrap();
    let seen = until_finished(&mut events, batch).await;

    url_mock.assert_async().await;
    media_mock.assert_async().await;
    cover_mock.assert_async().await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, DownloadEvent::Completed { track_id: TrackKey(1) })));

    let audio = out.path().join("[SQ]Song - A, B.wav");
    let lrc = std::fs::read_to_string(out.path().join("[SQ]Song - A, B.lrc")).unwrap();
    assert!(lrc.starts_with("[ti:Song]\n[ar:A, B]\n[al:Record]\n"));
    assert!(lrc.contains("[00:02.50]world"));

    let tagged = Probe::open(&audio)
        .unwrap()
        .guess_file_type()
        .unwrap()
        .read()
        .unwrap();
    let tag = tagged.primary_tag().unwrap();
    assert_eq!(tag.title().as_deref(), Some("Song"));
    assert_eq!(tag.artist().as_deref(), Some("A, B"));
    let embedded_lyrics = tag.get_string(&ItemKey::Lyrics).unwrap();
    assert!(embedded_lyrics.starts_with("[ti:Song]"));
    assert!(embedded_lyrics.contains("[00:02.50]world"));
    let cover = tag
        .pictures()
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .expect("front cover embedded");
    assert_eq!(cover.data(), PNG);

    // Nothing staged is left once the task is done
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    let progress = host.progress().borrow().clone();
    assert_eq!(progress.completed, 1);
    assert_eq!(progress.overall_percent, 100);

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_backend_refusal_fails_task_and_retry_recovers() {
    let mut server = Server::new_async().await;
    let audio_url = format!("{}/media/2.wav", server.url());

    let refused = server
        .mock("POST", "/eapi/song/enhance/player/url/v1")
        .with_body(encrypted(r#"{"code":-460,"message":"Cheating"}"#))
        .expect(1)
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let host = host_for(&server, &staging);
    let mut events = host.subscribe();

    let batch = host
        .submit(
            vec![track(2)],
            DownloadRules::default(),
            Credentials::anonymous(),
            Arc::new(LocalDirectory::new(out.path())),
        )
        .await
        .unwrap();
    let seen = until_finished(&mut events, batch).await;
    refused.assert_async().await;

    let reason = seen
        .iter()
        .find_map(|e| match e {
            DownloadEvent::Failed { reason, .. } => Some(reason.clone()),
            _ => None,
        })
        .expect("task should fail");
    assert!(reason.contains("Cheating"), "{reason}");
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);

    refused.remove_async().await;
    server
        .mock("POST", "/eapi/song/enhance/player/url/v1")
        .with_body(encrypted(&format!(
            r#"{{"code":200,"data":[{{"url":"{audio_url}","level":"standard"}}]}}"#
        )))
        .create_async()
        .await;
    server
        .mock("POST", "/eapi/song/lyric/v1")
        .with_body(encrypted(r#"{"code":200}"#))
        .create_async()
        .await;
    server
        .mock("GET", "/media/2.wav")
        .with_body(wav_bytes(800))
        .create_async()
        .await;

    let round = host.retry_all_failed().await.unwrap().expect("one failed task");
    until_finished(&mut events, round).await;

    let tasks = host.snapshot().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].state, TaskState::Completed);
    assert!(out.path().join("Song - A, B.wav").exists());
    // No lyrics means no sidecar
    assert!(!out.path().join("Song - A, B.lrc").exists());

    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_rejected_rules_leave_host_running() {
    let server = Server::new_async().await;
    let out = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let host = host_for(&server, &staging);

    let rules: DownloadRules =
        serde_json::from_str(r#"{"max_concurrency": 18446744073709551615}"#).unwrap();
    let err = host
        .submit(
            vec![track(3)],
            rules,
            Credentials::anonymous(),
            Arc::new(LocalDirectory::new(out.path())),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TuneVaultError::InvalidInput(_)), "{err:?}");

    assert!(host.snapshot().await.unwrap().is_empty());
    host.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_lagging_subscriber_still_sees_the_batch_finish() {
    let mut server = Server::new_async().await;
    let audio_url = format!("{}/media/shared.wav", server.url());
    server
        .mock("POST", "/eapi/song/enhance/player/url/v1")
        .with_body(encrypted(&format!(
            r#"{{"code":200,"data":[{{"url":"{audio_url}","level":"standard"}}]}}"#
        )))
        .create_async()
        .await;
    server
        .mock("POST", "/eapi/song/lyric/v1")
        .with_body(encrypted(r#"{"code":200}"#))
        .create_async()
        .await;
    server
        .mock("GET", "/media/shared.wav")
        .with_body(wav_bytes(800))
        .create_async()
        .await;

    let out = TempDir::new().unwrap();
    let staging = TempDir::new().unwrap();
    let config = ClientConfig::builder().base_url(server.url()).build();
    let host = OrchestrationHost::spawn(
        Arc::new(MusicClient::with_config(config).unwrap()),
        Arc::new(LoftyTagWriter::new()),
        HostConfig {
            event_buffer: 1,
            staging_dir: Some(staging.path().to_path_buf()),
            ..Default::default()
        },
    );
    let mut events = host.subscribe();
    let mut progress = host.progress();

    let rules = DownloadRules {
        file_name_template: FileNameTemplate::new("${name} ${id}"),
        ..Default::default()
    };
    let batch = host
        .submit(
            vec![track(4), track(5), track(6)],
            rules,
            Credentials::anonymous(),
            Arc::new(LocalDirectory::new(out.path())),
        )
        .await
        .unwrap();

    // Nobody reads events while the batch runs
    tokio::time::timeout(
        Duration::from_secs(10),
        progress.wait_for(|p| p.total() == 3 && p.in_flight() == 0),
    )
    .await
    .expect("batch did not finish in time")
    .unwrap();

    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Lagged(_))
    ));

    let tasks = host.snapshot().await.unwrap();
    let completed = tasks
        .iter()
        .filter(|t| t.batch_id == batch && t.state == TaskState::Completed)
        .count();
    assert_eq!(completed, 3);
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 3);

    host.shutdown().await.unwrap();
}
