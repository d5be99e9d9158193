//! Route dispatch for the chunk endpoint.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use terravox::core::Error;
use terravox::voxel::chunk::{ChunkCoord, SuperChunkCoord};
use terravox::world::WorldService;

use crate::http::{Request, Response};

#[derive(Deserialize)]
struct ChunkBody {
    cx: i32,
    cy: i32,
    cz: i32,
}

#[derive(Deserialize)]
struct SuperChunkBody {
    sx: i32,
    sz: i32,
}

fn error_response(status: u16, kind: &str, message: String) -> Response {
    Response::json(status, &json!({ "error": kind, "message": message }))
}

fn map_error(err: Error) -> Response {
    let status = match &err {
        Error::UnknownWorld(_) | Error::InvalidCoordinate(_) => 404,
        _ => 500,
    };
    error_response(status, err.kind(), err.to_string())
}

fn not_found(path: &str) -> Response {
    error_response(404, "ChunkNotFound", format!("no route for {path}"))
}

/// Dispatch one request against the world service.
pub async fn handle(service: &Arc<WorldService>, request: &Request) -> Response {
    let segments: Vec<&str> = request.path.split('/').filter(|s| !s.is_empty()).collect();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "worlds", world, "chunks", cx, cy, cz]) => {
            let (Ok(cx), Ok(cy), Ok(cz)) = (cx.parse(), cy.parse(), cz.parse()) else {
                return error_response(
                    404,
                    "InvalidCoordinate",
                    format!("non-integer chunk coordinate in {}", request.path),
                );
            };
            match service.get_chunk(world, ChunkCoord::new(cx, cy, cz)).await {
                Ok(bytes) => {
                    // Diagnostic counts straight from the header words.
                    let nodes = header_word(&bytes, 12);
                    let leaves = header_word(&bytes, 16);
                    Response::octet_stream(bytes)
                        .with_header("x-chunk-size", "32".to_string())
                        .with_header("x-material-nodes", nodes.to_string())
                        .with_header("x-material-leaves", leaves.to_string())
                }
                Err(err) => map_error(err),
            }
        }

        ("GET", ["api", "worlds", world, "manifest"]) => match service.manifest(world) {
            Ok(manifest) => Response::json(200, &serde_json::to_value(&manifest).unwrap_or_default()),
            Err(err) => map_error(err),
        },

        ("POST", ["api", "worlds", world, "invalidate-chunk"]) => {
            let Ok(body) = serde_json::from_slice::<ChunkBody>(&request.body) else {
                return error_response(400, "InvalidCoordinate", "expected {cx, cy, cz}".to_string());
            };
            match service
                .invalidate_chunk(world, ChunkCoord::new(body.cx, body.cy, body.cz))
                .await
            {
                Ok(()) => Response::json(200, &json!({ "invalidated": true })),
                Err(err) => map_error(err),
            }
        }

        ("POST", ["api", "worlds", world, "invalidate-superchunk"]) => {
            let Ok(body) = serde_json::from_slice::<SuperChunkBody>(&request.body) else {
                return error_response(400, "InvalidCoordinate", "expected {sx, sz}".to_string());
            };
            match service
                .invalidate_super_chunk(world, SuperChunkCoord::new(body.sx, body.sz))
                .await
            {
                Ok(()) => Response::json(200, &json!({ "invalidated": true })),
                Err(err) => map_error(err),
            }
        }

        ("GET" | "POST", _) => not_found(&request.path),
        _ => error_response(405, "ChunkNotFound", format!("method {} not allowed", request.method)),
    }
}

fn header_word(bytes: &[u8], offset: usize) -> u32 {
    bytes
        .get(offset..offset + 4)
        .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
        .unwrap_or(0)
}
