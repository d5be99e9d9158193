//! Terravox chunk server.
//!
//! Serves the chunk endpoint over plain HTTP/1.1:
//!   GET  /api/worlds/{id}/chunks/{cx}/{cy}/{cz}
//!   GET  /api/worlds/{id}/manifest
//!   POST /api/worlds/{id}/invalidate-chunk
//!   POST /api/worlds/{id}/invalidate-superchunk
//!
//! Usage: terravox-server [--port 8080] [--data data] [--worlds worlds.json]
//!
//! The worlds file is a JSON object of world id -> world config; without
//! one, a single "default" world (seed 42) is served.

mod http;
mod routes;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::TcpListener;

use terravox::generation::GeneratorConfig;
use terravox::world::{WorldConfig, WorldService};

#[tokio::main]
async fn main() {
    terravox::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = arg_value(&args, "--port")
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let data = arg_value(&args, "--data").unwrap_or_else(|| "data".to_string());
    let worlds_file = arg_value(&args, "--worlds");

    let mut service = WorldService::new(PathBuf::from(&data));
    match worlds_file {
        Some(path) => match load_worlds(&path) {
            Ok(worlds) => {
                for (id, config) in worlds {
                    service.register_world(id, config);
                }
            }
            Err(e) => {
                eprintln!("failed to load worlds file {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            service.register_world(
                "default",
                WorldConfig {
                    generator: GeneratorConfig::default(),
                    spawn: [16.0, 135.0, 16.0],
                },
            );
        }
    }
    let service = Arc::new(service);

    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => {
            log::info!("chunk server listening on {}", addr);
            listener
        }
        Err(e) => {
            eprintln!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("client connected from {}", peer);
                let service = service.clone();
                tokio::spawn(async move {
                    serve_connection(stream, service).await;
                    log::debug!("client disconnected: {}", peer);
                });
            }
            Err(e) => {
                log::error!("accept error: {}", e);
            }
        }
    }
}

async fn serve_connection(stream: tokio::net::TcpStream, service: Arc<WorldService>) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request = match http::read_request(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break,
            Err(e) => {
                log::debug!("request parse error: {}", e);
                break;
            }
        };

        log::debug!("{} {}", request.method, request.path);
        let response = routes::handle(&service, &request).await;
        if let Err(e) = http::write_response(&mut writer, &response).await {
            log::debug!("response write error: {}", e);
            break;
        }
    }
}

fn load_worlds(path: &str) -> std::io::Result<HashMap<String, WorldConfig>> {
    let bytes = std::fs::read(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn arg_value(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
