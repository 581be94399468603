//! wavecast — a LAN-synchronized radio player.
//!
//! One process is three things at once: a local player (gap-less decode,
//! parametric EQ, smart shuffle), a radio host broadcasting its current
//! track over HTTP, and a radio client that can tune into another instance
//! on the same /24 and play in tight time sync with it.

pub mod audio;
pub mod config;
pub mod error;
pub mod frontend;
pub mod library;
pub mod logging;
pub mod lyrics;
pub mod player;
pub mod radio;
pub mod recommend;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;

use audio::AudioEngine;
use frontend::{Frontend, LogFrontend};
use lyrics::{LyricCache, LyricService};
use player::{Player, PlayerControl};
use radio::{PeerScanner, RadioClient, RadioHost};
use recommend::Recommender;

#[derive(Parser, Debug)]
#[command(name = "wavecast", about = "LAN-synchronized radio player")]
struct Cli {
    /// Extra music directories to scan (repeatable)
    #[arg(long = "dir")]
    dirs: Vec<PathBuf>,

    /// Data directory for state, caches and logs (default: cwd)
    #[arg(long, env = "WAVECAST_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Do not host the radio endpoints
    #[arg(long)]
    no_host: bool,

    /// Tune into a host immediately instead of playing locally
    #[arg(long)]
    tune: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    std::fs::create_dir_all(&data_dir)?;
    logging::init(&data_dir)?;

    let cfg = config::load(&data_dir);

    // Library; with nothing configured, fall back to the OS music folder
    let mut scan_dirs = cfg.library.paths.clone();
    scan_dirs.extend(cli.dirs.iter().cloned());
    if scan_dirs.is_empty() {
        if let Some(music) = dirs::audio_dir().or_else(|| dirs::home_dir().map(|h| h.join("Music")))
        {
            scan_dirs.push(music);
        }
    }
    let tracks = library::scan(&scan_dirs);
    let playlists = library::load_playlists(&data_dir.join("Playlists.txt"));
    if !playlists.is_empty() {
        tracing::info!(count = playlists.len(), "playlist URLs on file");
    }

    // Engine, with the saved EQ curve applied
    let engine = Arc::new(AudioEngine::new(cfg.audio.gaming_mode));
    for (freq, gain) in audio::ISO_BANDS.iter().zip(cfg.audio.eq_gains) {
        engine.set_eq_gain(*freq, gain);
    }

    // Ambient services
    let recommend = Arc::new(Recommender::open(
        data_dir.join(".player_recommend_data.json"),
        recommend::DEFAULT_SAVE_INTERVAL,
    ));
    {
        let recommend = Arc::clone(&recommend);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(recommend.save_interval()).await;
                recommend.save_if_dirty();
            }
        });
    }

    let lyric_cache = Arc::new(LyricCache::open(data_dir.join(".lyricCache.json")));
    let lyric_service = LyricService::start(lyric_cache);

    let frontend: Arc<dyn Frontend> = Arc::new(LogFrontend);

    // Orchestrator on its own thread
    let player = Player::new(
        Arc::clone(&engine),
        tracks,
        cfg.shuffle.history_size,
        cfg.shuffle.artist_spacing,
        cfg.audio.volume,
        Arc::clone(&frontend),
        lyric_service.clone(),
        Arc::clone(&recommend),
        data_dir.clone(),
    );
    let shutdown = Arc::new(AtomicBool::new(false));
    let orchestrator = {
        let player = Arc::clone(&player);
        let shutdown = Arc::clone(&shutdown);
        std::thread::Builder::new()
            .name("wavecast-orchestrator".to_string())
            .spawn(move || player.run(shutdown))?
    };

    // Radio host
    if !cli.no_host {
        let local_ip = radio::local_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let host = RadioHost::new(
            Arc::clone(&player) as Arc<dyn PlayerControl>,
            cfg.radio.port,
            local_ip,
            data_dir.join(logging::LOG_FILE),
        );
        tokio::spawn(async move {
            if let Err(e) = host.serve().await {
                // The player keeps running without the host; see DESIGN.md
                // on the port-collision policy.
                tracing::error!(target: "radio::host", error = %e, "radio host unavailable");
            }
        });
    }

    // Radio client (tuning is driven by --tune or the frontend layer)
    let radio_client = RadioClient::new(Arc::clone(&engine), Arc::clone(&frontend), &data_dir);
    radio_client.set_accept_host_eq(cfg.radio.accept_host_eq);
    if let Some(host_ip) = &cli.tune {
        player.set_radio_mode(true);
        radio_client.listen_to(host_ip.clone(), cfg.radio.port);
    }

    // Periodic peer sweep
    {
        let frontend = Arc::clone(&frontend);
        let port = cfg.radio.port;
        let interval = Duration::from_secs(cfg.radio.scan_interval_secs.max(5));
        tokio::spawn(async move {
            let scanner = PeerScanner::new(port);
            let known: Mutex<Vec<String>> = Mutex::new(Vec::new());
            loop {
                scanner
                    .scan_local_all(|peer| {
                        let ip = peer.ip.to_string();
                        let mut known = known.lock();
                        if !known.contains(&ip) {
                            known.push(ip);
                            frontend.peers(&known);
                        }
                    })
                    .await;
                tokio::time::sleep(interval).await;
            }
        });
    }

    tracing::info!("wavecast up; ctrl-c to exit");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Orderly teardown: stop the loop, flush everything once
    shutdown.store(true, Ordering::Release);
    radio_client.stop_listening();
    engine.stop();
    if orchestrator.join().is_err() {
        tracing::error!("orchestrator thread panicked during shutdown");
    }
    lyric_service.close();
    recommend.close();

    // Carry volume and the EQ curve into the next launch
    let mut cfg = cfg;
    cfg.audio.volume = player.volume();
    for (slot, (_, gain)) in cfg.audio.eq_gains.iter_mut().zip(engine.eq_gains()) {
        *slot = gain;
    }
    if let Err(e) = config::save(&data_dir, &cfg) {
        tracing::error!(error = %e, "could not save config");
    }

    Ok(())
}
