//! Turbulence box diagnostics CLI - Render animations from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use turbulence_viz::{
    animation::{ArchivePlayer, FileEncoders},
    pipeline,
    schema::RunConfig,
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json>", args[0]);
        eprintln!("       {} --inspect <file.tbv>", args[0]);
        eprintln!();
        eprintln!("Render turbulence diagnostics from a JSON run configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to the run configuration");
        eprintln!("  --inspect    Print the metadata of a frame archive");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    match args[1].as_str() {
        "--example" => {
            print_example_config();
            return;
        }
        "--inspect" => {
            let Some(path) = args.get(2) else {
                eprintln!("Usage: {} --inspect <file.tbv>", args[0]);
                std::process::exit(1);
            };
            inspect(&PathBuf::from(path));
            return;
        }
        _ => {}
    }

    let config_path = PathBuf::from(&args[1]);

    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    println!("Turbulence Diagnostics");
    println!("======================");
    println!("Snapshots: {}", config.bulk_path.display());
    println!(
        "Frames: {}..={} ({} frames)",
        config.start_frame,
        config.end_frame,
        config.frame_count()
    );
    println!("Requests: {}", config.animations.len());
    println!();

    match pipeline::run(&config, Arc::new(FileEncoders)) {
        Ok(summary) => print!("{}", summary),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

fn inspect(path: &Path) {
    let player = ArchivePlayer::open(path).unwrap_or_else(|e| {
        eprintln!("Error opening archive: {}", e);
        std::process::exit(1);
    });
    let header = player.header();
    let (rows, cols) = player.layout();
    println!("Archive: {}", path.display());
    println!("  Title: {}", player.title());
    println!("  Frames: {}", header.frame_count);
    println!("  Size: {}x{} ({}x{} panels of {} px)", header.width, header.height, rows, cols, header.panel_size);
    match header.time_span {
        Some((first, last)) => println!("  Simulated time: {:.2}s to {:.2}s", first, last),
        None => println!("  Simulated time: none (still image)"),
    }
    println!("  Frame rate: {} fps", header.fps);
    println!("  Compression: {:?}", header.compression);
}

fn print_example_config() {
    let config = RunConfig::default();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|e| {
            eprintln!("Error serializing example config: {}", e);
            std::process::exit(1);
        })
    );
}
