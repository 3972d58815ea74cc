use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand};
use splatforge_lib::{format_bytes, IoRegistry, ModelInfo, ReadOptions, WriteOptions};

#[derive(Parser, Debug)]
#[command(
    name = "splatforge",
    version,
    about = "Converts Gaussian splat point clouds between PLY, compressed PLY, SPLAT, KSPLAT, SPZ and SOG"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a splat file into another format, chosen by extension.
    Convert {
        /// Path to the input file.
        #[arg(short = 'i', long = "input")]
        input: String,

        /// Path to the output file.
        #[arg(short = 'o', long = "output")]
        output: String,

        /// Treat validation warnings as errors and check finiteness.
        #[arg(long)]
        strict: bool,
    },
    /// Print a summary of a splat file.
    Info {
        /// Path to the file to inspect.
        path: String,

        /// Override the format instead of using the file extension.
        #[arg(long)]
        format: Option<String>,
    },
}

/// Extension of `path`, honoring the two-segment `compressed.ply` suffix.
fn format_ext(path: &str) -> &str {
    const COMPRESSED: &str = ".compressed.ply";
    if path.len() > COMPRESSED.len() && path.ends_with(COMPRESSED) {
        return &COMPRESSED[1..];
    }
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
}

fn read_cloud(
    registry: &IoRegistry,
    path: &str,
    format: Option<&str>,
    strict: bool,
) -> Result<(splatforge_lib::GaussianCloud, usize), String> {
    let ext = format.unwrap_or_else(|| format_ext(path));
    let reader = registry
        .reader_for(ext)
        .ok_or_else(|| format!("no reader registered for extension '{}'", ext))?;

    let data = fs::read(path).map_err(|e| format!("failed to read '{}': {}", path, e))?;
    let size = data.len();
    let cloud = reader
        .read(&data, &ReadOptions { strict })
        .map_err(|e| format!("failed to decode '{}': {}", path, e))?;
    Ok((cloud, size))
}

fn run_convert(input: &str, output: &str, strict: bool) -> Result<(), String> {
    let registry = IoRegistry::new();

    let out_ext = format_ext(output);
    let writer = registry
        .writer_for(out_ext)
        .ok_or_else(|| format!("no writer registered for extension '{}'", out_ext))?;

    let start = Instant::now();
    let (cloud, in_size) = read_cloud(&registry, input, None, strict)?;
    let bytes = writer
        .write(&cloud, &WriteOptions { strict })
        .map_err(|e| format!("failed to encode '{}': {}", output, e))?;
    fs::write(output, &bytes).map_err(|e| format!("failed to write '{}': {}", output, e))?;

    println!(
        "{} ({}) -> {} ({}), {} points, {} ms",
        input,
        format_bytes(in_size),
        output,
        format_bytes(bytes.len()),
        cloud.num_points,
        start.elapsed().as_millis()
    );
    Ok(())
}

fn run_info(path: &str, format: Option<&str>) -> Result<(), String> {
    let registry = IoRegistry::new();
    let (cloud, file_size) = read_cloud(&registry, path, format, false)?;
    let info = ModelInfo::from_cloud(&cloud, file_size);

    println!("=== Gaussian Model Information ===\n");
    println!("Basic Info:");
    println!("  Points:          {}", info.num_points);
    if info.file_size > 0 {
        println!("  File Size:       {}", format_bytes(info.file_size));
    }
    if !info.source_format.is_empty() {
        println!("  Source Format:   {}", info.source_format);
    }
    println!();

    println!("Rendering Properties:");
    println!("  SH Degree:       {}", info.sh_degree);
    if info.antialiased {
        println!("  Antialiased:     Yes");
    }
    println!();

    if info.num_points > 0 {
        println!("Position Bounds:");
        println!("  X:  [{}, {}]", info.bounds.min_x, info.bounds.max_x);
        println!("  Y:  [{}, {}]", info.bounds.min_y, info.bounds.max_y);
        println!("  Z:  [{}, {}]", info.bounds.min_z, info.bounds.max_z);
        println!();
    }

    if info.scale_stats.count > 0 {
        println!("Scale Statistics:");
        println!("  Min:  {}", info.scale_stats.min);
        println!("  Max:  {}", info.scale_stats.max);
        println!("  Avg:  {}", info.scale_stats.avg);
        println!();
    }

    if info.alpha_stats.count > 0 {
        println!("Alpha Statistics:");
        println!("  Min:  {}", info.alpha_stats.min);
        println!("  Max:  {}", info.alpha_stats.max);
        println!("  Avg:  {}", info.alpha_stats.avg);
        println!();
    }

    println!("Data Size Breakdown:");
    println!("  Positions:       {}", format_bytes(info.positions_size));
    println!("  Scales:          {}", format_bytes(info.scales_size));
    println!("  Rotations:       {}", format_bytes(info.rotations_size));
    println!("  Alphas:          {}", format_bytes(info.alphas_size));
    println!("  Colors:          {}", format_bytes(info.colors_size));
    println!("  SH Coeffs:       {}", format_bytes(info.sh_size));
    for (name, size) in &info.extra_attrs {
        println!("  Extra {}:       {}", name, format_bytes(*size));
    }
    println!(
        "  Total:           {} (in memory)",
        format_bytes(info.total_size)
    );
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Convert {
            input,
            output,
            strict,
        } => run_convert(input, output, *strict),
        Command::Info { path, format } => run_info(path, format.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("error: {}", message);
            ExitCode::FAILURE
        }
    }
}
