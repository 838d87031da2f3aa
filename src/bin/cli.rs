// TuneVault - Music Library Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use tunevault_core::api::client::{ClientConfig, Credentials, MusicClient};
use tunevault_core::api::models::{QualityLevel, Track};
use tunevault_core::audio::metadata::LoftyTagWriter;
use tunevault_core::download::{
    DownloadEvent, DownloadRules, HostConfig, OrchestrationHost, TaskState, TextEncoding,
};
use tunevault_core::file::destination::LocalDirectory;
use tunevault_core::file::paths::FileNameTemplate;

#[derive(Parser)]
#[command(name = "tunevault-cli")]
#[command(about = "TuneVault CLI - search and download tracks", long_about = None)]
struct Cli {
    /// Session cookie (e.g. "MUSIC_U=...")
    #[arg(long, env = "TUNEVAULT_COOKIE", global = true, hide_env_values = true)]
    cookie: Option<String>,

    /// Override the API host
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search songs by keyword
    Search {
        keyword: String,
        #[arg(short, long, default_value_t = 20)]
        limit: u32,
    },
    /// List a playlist's tracks
    Playlist { id: i64 },
    /// List an album's tracks
    Album { id: i64 },
    /// Show the account the cookie belongs to
    Whoami,
    /// Text a login captcha to a phone number
    Captcha {
        #[arg(long)]
        phone: String,
        #[arg(long, default_value = "86")]
        country_code: String,
    },
    /// Log in with a captcha and print the session cookie
    Login {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        captcha: String,
        #[arg(long, default_value = "86")]
        country_code: String,
    },
    /// Download a playlist, an album or search results
    Download(DownloadArgs),
}

#[derive(Args)]
struct DownloadArgs {
    #[arg(long, conflicts_with_all = ["album", "search"])]
    playlist: Option<i64>,
    #[arg(long, conflicts_with = "search")]
    album: Option<i64>,
    /// Download the top results of a search
    #[arg(long)]
    search: Option<String>,
    #[arg(long, default_value_t = 10)]
    search_limit: u32,

    /// Output directory
    #[arg(short, long)]
    out: PathBuf,
    /// JSON file with download rules; flags below override it
    #[arg(long)]
    rules: Option<PathBuf>,
    /// standard, exhigh, lossless or hires
    #[arg(long)]
    quality: Option<String>,
    /// File name template, e.g. "${level}${name} - ${artists}"
    #[arg(long)]
    template: Option<String>,
    #[arg(long)]
    concurrency: Option<usize>,
    /// UTF-8, UTF-8-BOM, UTF-16LE or UTF-16BE
    #[arg(long)]
    lyrics_encoding: Option<String>,
    /// Do not write .lrc files
    #[arg(long)]
    no_lyrics_file: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::builder();
    if let Some(base_url) = &cli.base_url {
        config = config.base_url(base_url.clone());
    }
    let client = MusicClient::with_config(config.build()).context("Failed to create client")?;
    let credentials = cli
        .cookie
        .map(Credentials::new)
        .unwrap_or_else(Credentials::anonymous);

    match cli.command {
        Commands::Search { keyword, limit } => {
            let tracks = client.search(&credentials, &keyword, limit, 0).await?;
            print_tracks(&tracks);
        }
        Commands::Playlist { id } => {
            let list = client.playlist(&credentials, id).await?;
            println!("{} ({} tracks)", list.name, list.tracks.len());
            print_tracks(&list.tracks);
        }
        Commands::Album { id } => {
            let list = client.album(&credentials, id).await?;
            println!("{} ({} tracks)", list.name, list.tracks.len());
            print_tracks(&list.tracks);
        }
        Commands::Whoami => {
            let profile = client.user_detail(&credentials).await?;
            println!("{}", profile.name);
        }
        Commands::Captcha {
            phone,
            country_code,
        } => {
            client.send_captcha(&phone, &country_code).await?;
            println!("Captcha sent");
        }
        Commands::Login {
            phone,
            captcha,
            country_code,
        } => {
            let credentials = client.login_by_captcha(&phone, &country_code, &captcha).await?;
            println!("{}", credentials.cookie());
        }
        Commands::Download(args) => download(client, credentials, args).await?,
    }

    Ok(())
}

fn print_tracks(tracks: &[Track]) {
    for track in tracks {
        println!(
            "{:>12}  {} - {}  [{}]",
            track.id,
            track.title,
            track.joined_artists(", "),
            track.album.name
        );
    }
}

async fn load_rules(args: &DownloadArgs) -> Result<DownloadRules> {
    let mut rules = match &args.rules {
        Some(path) => {
            let json = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&json).with_context(|| format!("Invalid rules in {}", path.display()))?
        }
        None => DownloadRules::default(),
    };

    if let Some(quality) = &args.quality {
        rules.quality = QualityLevel::from_wire(quality)
            .with_context(|| format!("Unknown quality level: {}", quality))?;
    }
    if let Some(template) = &args.template {
        rules.file_name_template = FileNameTemplate::new(template.clone());
    }
    if let Some(concurrency) = args.concurrency {
        rules.max_concurrency = concurrency;
    }
    if let Some(encoding) = &args.lyrics_encoding {
        rules.text_encoding = encoding.parse::<TextEncoding>()?;
    }
    if args.no_lyrics_file {
        rules.save_lyrics_file = false;
    }

    rules.validate()?;
    Ok(rules)
}

async fn download(client: MusicClient, credentials: Credentials, args: DownloadArgs) -> Result<()> {
    let rules = load_rules(&args).await?;

    let tracks = if let Some(id) = args.playlist {
        client.playlist(&credentials, id).await?.tracks
    } else if let Some(id) = args.album {
        client.album(&credentials, id).await?.tracks
    } else if let Some(keyword) = &args.search {
        client.search(&credentials, keyword, args.search_limit, 0).await?
    } else {
        bail!("Specify one of --playlist, --album or --search");
    };

    if tracks.is_empty() {
        println!("Nothing to download");
        return Ok(());
    }

    let host = OrchestrationHost::spawn(
        Arc::new(client),
        Arc::new(LoftyTagWriter::new()),
        HostConfig::default(),
    );
    let mut events = host.subscribe();

    let total = tracks.len();
    let titles: std::collections::HashMap<i64, String> =
        tracks.iter().map(|t| (t.id, t.title.clone())).collect();
    let batch_id = host
        .submit(tracks, rules, credentials, Arc::new(LocalDirectory::new(&args.out)))
        .await?;
    println!("Downloading {} tracks into {}", total, args.out.display());

    let title = |id: i64| titles.get(&id).cloned().unwrap_or_else(|| id.to_string());
    let progress = host.progress();

    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = tokio::signal::ctrl_c() => {
                let cancelled = host.cancel_all().await?;
                println!("Cancelled {} tasks", cancelled);
                continue;
            }
        };

        match event {
            Ok(DownloadEvent::Progress { track_id, percent }) => {
                println!("{:>3}%  {}", percent, title(track_id.0));
            }
            Ok(DownloadEvent::Completed { track_id }) => {
                println!("done  {}", title(track_id.0));
            }
            Ok(DownloadEvent::Failed { track_id, reason }) => {
                println!("FAIL  {}: {}", title(track_id.0), reason);
            }
            Ok(DownloadEvent::Cancelled { track_id }) => {
                println!("skip  {}", title(track_id.0));
            }
            Ok(DownloadEvent::BatchFinished { batch_id: finished }) if finished == batch_id => break,
            Ok(DownloadEvent::BatchFinished { .. }) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress output lagged");
                // The batch may have finished among the skipped events
                if progress.borrow().in_flight() == 0 {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }

    let tasks = host.snapshot().await?;
    let count = |state: TaskState| {
        tasks
            .iter()
            .filter(|t| t.batch_id == batch_id && t.state == state)
            .count()
    };
    let (completed, failed) = (count(TaskState::Completed), count(TaskState::Failed));
    host.shutdown().await?;
    println!("{} completed, {} failed", completed, failed);
    Ok(())
}
