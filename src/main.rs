use std::path::Path;

use tokio::io::AsyncBufReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use magi::analysis::ThumbnailClient;
use magi::config::AppConfig;
use magi::protocol::{AnalysisKind, ChatMessage};
use magi::session::ChatSession;
use magi::socket::{SocketConfig, SocketManager};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "magi=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    tracing::info!(ws = %config.ws_url, analyzer = %config.analysis_url, "starting magi");

    let socket = SocketManager::new(SocketConfig {
        url: config.ws_url.clone(),
        reconnect_delay: config.reconnect_delay,
    });

    // Print every inbound message as it arrives, independent of the log.
    let _printer = socket.add_listener(|raw| match serde_json::from_str::<ChatMessage>(raw) {
        Ok(message) => println!("{}: {}", message.sender, message.text),
        Err(e) => tracing::error!("unparseable frame from backend: {}", e),
    });

    let session = ChatSession::attach(socket.clone());
    let analyzer = ThumbnailClient::new(config.analysis_url.clone(), config.http_timeout);
    socket.connect();

    let mut kind = AnalysisKind::None;
    let mut video_id: Option<String> = None;
    let mut channel_id: Option<String> = None;

    print_help();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            [] => {}
            ["/quit"] => break,
            ["/help"] => print_help(),
            ["/status"] => println!(
                "{}",
                if socket.is_connected() {
                    "connected"
                } else {
                    "disconnected"
                }
            ),
            ["/clear"] => {
                session.clear();
                println!("log cleared");
            }
            ["/export"] => match session.save_transcript(Path::new(".")) {
                Ok(path) => println!("transcript written to {}", path.display()),
                Err(e) => println!("export failed: {}", e),
            },
            ["/mode", "none"] => {
                kind = AnalysisKind::None;
                video_id = None;
                channel_id = None;
                println!("mode: plain discussion");
            }
            ["/mode", "comments", id] => {
                kind = AnalysisKind::CommentAnalysis;
                video_id = Some(id.to_string());
                println!("mode: comment analysis for video {}", id);
            }
            ["/mode", "channels", id] => {
                kind = AnalysisKind::ChannelSubscriberPopularChannel;
                channel_id = Some(id.to_string());
                println!("mode: channel analysis for {}", id);
            }
            ["/analyze", url] => analyze(&analyzer, url).await,
            [command, ..] if command.starts_with('/') => {
                println!("unknown command: {} (try /help)", command)
            }
            _ => session.submit(&line, kind, video_id.as_deref(), channel_id.as_deref()),
        }
    }

    socket.close();
}

async fn analyze(analyzer: &ThumbnailClient, url: &str) {
    match analyzer.analyze(url).await {
        Ok(report) => {
            println!(
                "解析結果: {} ({}x{}, 検出帯 {}x{})",
                report.orientation,
                report.width,
                report.height,
                report.vertical_width,
                report.vertical_height
            );
            match report.decode_processed_image() {
                Ok(Some(bytes)) => match std::fs::write("edge.png", &bytes) {
                    Ok(()) => println!("edge overlay written to edge.png"),
                    Err(e) => println!("could not write edge overlay: {}", e),
                },
                Ok(None) => {}
                Err(e) => println!("could not decode edge overlay: {}", e),
            }
        }
        Err(e) => println!("解析に失敗しました: {}", e),
    }
}

fn print_help() {
    println!("type a topic to submit it, or:");
    println!("  /mode none | comments <videoId> | channels <channelId>");
    println!("  /clear            clear the conversation log");
    println!("  /export           write the summary transcript PDF");
    println!("  /analyze <url>    run the thumbnail orientation analyzer");
    println!("  /status           show the connection status");
    println!("  /quit             exit");
}
