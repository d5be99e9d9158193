//! World pre-generator — bakes a rectangle of super-chunks and their
//! stream chunks into the disk cache ahead of serving.
//!
//! Usage: cargo run --release --bin generate_world -- [OPTIONS]
//!
//! Options:
//!   --data <DIR>      Data directory (default: "data")
//!   --world <NAME>    World id (default: "default")
//!   --seed <SEED>     World seed (default: 42)
//!   --radius <N>      Super-chunk radius around the origin (default: 1)
//!   --min-y <N>       Lowest chunk layer to bake (default: 0)
//!   --max-y <N>       Highest chunk layer to bake (default: 4)
//!
//! Output structure matches the server cache:
//!   <data>/worlds/<name>/superchunks/<sx>_<sz>/{heightmap,biome,river,block}.bin
//!   <data>/worlds/<name>/chunks/<cx>_<cy>_<cz>.svdag

use std::path::PathBuf;
use std::time::Instant;

use terravox::generation::GeneratorConfig;
use terravox::voxel::chunk::{ChunkCoord, CHUNKS_PER_SUPER_CHUNK};
use terravox::world::{WorldConfig, WorldService};

fn main() {
    terravox::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let data = parse_str_arg(&args, "--data").unwrap_or_else(|| "data".to_string());
    let world = parse_str_arg(&args, "--world").unwrap_or_else(|| "default".to_string());
    let seed = parse_i64_arg(&args, "--seed").unwrap_or(42) as u32;
    let radius = parse_i64_arg(&args, "--radius").unwrap_or(1) as i32;
    let min_y = parse_i64_arg(&args, "--min-y").unwrap_or(0) as i32;
    let max_y = parse_i64_arg(&args, "--max-y").unwrap_or(4) as i32;

    let data_dir = PathBuf::from(&data);
    println!("=== Terravox World Baker ===");
    println!("World:  {} (seed {})", world, seed);
    println!("Region: {} super-chunks, chunk layers {}..={}", (2 * radius + 1).pow(2), min_y, max_y);
    println!("Output: {}", data_dir.display());
    println!();

    let mut service = WorldService::new(&data_dir);
    service.register_world(
        &world,
        WorldConfig {
            generator: GeneratorConfig { seed, ..GeneratorConfig::default() },
            spawn: [16.0, 135.0, 16.0],
        },
    );

    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let start = Instant::now();
    let mut baked = 0usize;

    runtime.block_on(async {
        for sx in -radius..=radius {
            for sz in -radius..=radius {
                let base_x = sx * CHUNKS_PER_SUPER_CHUNK;
                let base_z = sz * CHUNKS_PER_SUPER_CHUNK;

                for cx in base_x..base_x + CHUNKS_PER_SUPER_CHUNK {
                    for cz in base_z..base_z + CHUNKS_PER_SUPER_CHUNK {
                        for cy in min_y..=max_y {
                            let coord = ChunkCoord::new(cx, cy, cz);
                            match service.get_chunk(&world, coord).await {
                                Ok(bytes) => {
                                    baked += 1;
                                    log::debug!(
                                        "chunk ({}, {}, {}): {} bytes",
                                        cx, cy, cz, bytes.len()
                                    );
                                }
                                Err(e) => {
                                    eprintln!("chunk ({}, {}, {}) failed: {}", cx, cy, cz, e);
                                    std::process::exit(1);
                                }
                            }
                        }
                    }
                }
                println!(
                    "superchunk ({}, {}) baked ({} chunks so far, {:.1}s)",
                    sx, sz, baked, start.elapsed().as_secs_f64()
                );
            }
        }
    });

    println!();
    println!("Done: {} chunks in {:.1}s", baked, start.elapsed().as_secs_f64());
}

fn parse_str_arg(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_i64_arg(args: &[String], name: &str) -> Option<i64> {
    parse_str_arg(args, name).and_then(|v| v.parse().ok())
}
