//! rasterpipe CLI - streamed image processing
//!
//! A small front end over the library: inspect images, compute whole-image
//! statistics and run filter chains described in TOML files.

use anyhow::{bail, Context, Result};
use rasterpipe::io::file::probe;
use rasterpipe::prelude::*;
use std::sync::Arc;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    let program = program_name(&args);
    let Some(command) = args.get(1) else {
        print_usage(program);
        return;
    };

    let result = match command.as_str() {
        "list" => list_filters(),
        "info" => match args.get(2) {
            Some(path) => image_info(path),
            None => Err(anyhow::anyhow!("please specify an image")),
        },
        "stats" => match args.get(2) {
            Some(path) => image_stats(path),
            None => Err(anyhow::anyhow!("please specify an image")),
        },
        "process" => {
            if args.len() < 4 {
                eprintln!("Usage: {} process <input> <output> [--config file.toml] [--threads N] [--ram-mb N]", program);
                std::process::exit(2);
            }
            process_image(&args[2..])
        }
        "help" | "--help" | "-h" => {
            print_usage(program);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage(program);
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Name to show in usage lines; argv may be empty.
fn program_name(args: &[String]) -> &str {
    args.first().map_or("rasterpipe", String::as_str)
}

fn print_usage(program: &str) {
    println!("rasterpipe v{}", rasterpipe::VERSION);
    println!();
    println!("Usage: {} <command> [options]", program);
    println!();
    println!("Commands:");
    println!("  list                          List all available filters");
    println!("  info <image>                  Print image metadata as JSON");
    println!("  stats <image>                 Print per band statistics as JSON");
    println!("  process <in> <out> [options]  Run a filter chain over an image");
    println!("  help                          Show this help message");
    println!();
    println!("Process options:");
    println!("  --config <file.toml>  Pipeline settings and [[filter]] chain");
    println!("  --threads <N>         Worker threads (0 = auto)");
    println!("  --ram-mb <N>          Memory budget per streamed piece in MB");
}

fn list_filters() -> Result<()> {
    let registry = FilterRegistry::with_builtins();
    println!("Available filters ({} total):", registry.len());
    println!();
    for (id, entry) in registry.filters() {
        let metadata = &entry.metadata;
        let persistent = if metadata.persistent { " [persistent]" } else { "" };
        println!("  {} - {}{}", id, metadata.description, persistent);
        println!("      inputs: {}", metadata.input_names().join(", "));
        println!("      outputs: {}", metadata.output_names().join(", "));
        for param in &metadata.parameters {
            match &param.default {
                Some(default) => println!("      {} = {}  {}", param.name, default, param.description),
                None => println!("      {}  {}", param.name, param.description),
            }
        }
    }
    Ok(())
}

fn image_info(path: &str) -> Result<()> {
    let info = probe(path).with_context(|| format!("failed to read {}", path))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn image_stats(path: &str) -> Result<()> {
    let mut pipeline = Pipeline::new(PipelineConfig::new())?;
    let source = pipeline.add_source(ImageFileSource::open(path).with_context(|| format!("failed to read {}", path))?);
    let filter = StreamingStatisticsFilter::new();
    let handle = filter.handle();
    let stats = pipeline.add_filter(filter);
    pipeline.connect(source, stats, 0)?;

    let options = StreamingOptions::new(pipeline.config().streaming.clone());
    stream(&mut pipeline, stats, &mut DiscardSink, &options)?;

    let report = handle.report().context("statistics were not synthesized")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn process_image(args: &[String]) -> Result<()> {
    let input_path = &args[0];
    let output_path = &args[1];

    let mut chain = ChainConfig::default();
    let mut threads: Option<usize> = None;
    let mut ram_mb: Option<u64> = None;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--config" if i + 1 < args.len() => {
                chain = ChainConfig::load(&args[i + 1]).with_context(|| format!("failed to load {}", args[i + 1]))?;
                i += 2;
            }
            "--threads" if i + 1 < args.len() => {
                threads = Some(args[i + 1].parse().context("--threads expects an integer")?);
                i += 2;
            }
            "--ram-mb" if i + 1 < args.len() => {
                ram_mb = Some(args[i + 1].parse().context("--ram-mb expects an integer")?);
                i += 2;
            }
            other => bail!("unknown option: {}", other),
        }
    }

    let mut config = chain.pipeline.clone();
    if let Some(threads) = threads {
        config = config.with_threads(threads);
    }
    if let Some(mb) = ram_mb {
        if mb == 0 {
            bail!("--ram-mb must be at least 1");
        }
        config.streaming.mode = StreamingMode::RamDriven {
            budget_bytes: mb * 1024 * 1024,
        };
    }

    let registry = FilterRegistry::with_builtins();
    let mut pipeline = Pipeline::new(config)?;
    let source = ImageFileSource::open(input_path).with_context(|| format!("failed to read {}", input_path))?;
    let mut last = pipeline.add_source(source);
    for (index, step) in chain.filters.iter().enumerate() {
        let filter = registry
            .create(&step.filter_type, &step.params)
            .with_context(|| format!("filter #{} ({})", index + 1, step.filter_type))?;
        let node = pipeline.add_boxed_filter(filter);
        pipeline.connect(last, node, 0)?;
        last = node;
    }
    log::info!(
        "Processing {} -> {} through {} filter(s)",
        input_path,
        output_path,
        chain.filters.len()
    );

    let progress = ProgressTracker::new().with_callback(Box::new(|update| match update {
        ProgressUpdate::PieceCompleted { index, total, duration_ms } => {
            log::debug!("Piece {}/{} done in {}ms", index + 1, total, duration_ms);
        }
        ProgressUpdate::Error { message, .. } => log::error!("{}", message),
        _ => {}
    }));
    let options = StreamingOptions::new(pipeline.config().streaming.clone()).with_progress(Arc::new(progress));

    let mut sink = ImageFileSink::new(output_path);
    let report = stream(&mut pipeline, last, &mut sink, &options)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Sink that drops every piece; used when only persistent filter reports matter.
struct DiscardSink;

impl RegionSink for DiscardSink {
    fn begin(&mut self, _info: &ImageInfo, _region: &ImageRegion) -> PipelineResult<()> {
        Ok(())
    }

    fn write(&mut self, _piece: &ImageRegion, _buffer: &AnyBuffer) -> PipelineResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_name_without_arguments() {
        assert_eq!(program_name(&[]), "rasterpipe");
        assert_eq!(program_name(&["bin/rp".to_string()]), "bin/rp");
    }
}
