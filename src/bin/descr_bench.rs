use std::env;
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;

use descrint::io::{flatten_padded, read_fvecs};
use descrint::{math, memory, DescrInt, DescrIntConfig, DistanceStrategy, EncodedSet};
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn main() {
    if env::args().any(|arg| arg == "--help" || arg == "-h") {
        print_usage();
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = match Config::parse(args) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        eprintln!("Error: {err}");
        let mut source = err.source();
        while let Some(inner) = source {
            eprintln!("  caused by: {inner}");
            source = inner.source();
        }
        process::exit(1);
    }
}

fn load_rows(path: &Path, limit: Option<usize>, what: &str) -> CliResult<(usize, Vec<f32>)> {
    println!("Loading {what} vectors from {}...", path.display());
    let rows = read_fvecs(path, limit)?;
    if rows.is_empty() {
        return Err(Box::new(IoError::new(
            IoErrorKind::InvalidInput,
            format!("no {what} vectors were loaded"),
        )));
    }
    let dim = rows[0].len();
    let (width, flat) = flatten_padded(&rows)?;
    println!("Loaded {} {what} vectors with dimension {dim} (padded to {width}).", rows.len());
    Ok((width, flat))
}

fn run(config: Config) -> CliResult<()> {
    memory::log_huge_page_status();

    let (size, base) = load_rows(&config.base, config.max_base, "base")?;
    let queries = match &config.queries {
        Some(path) => {
            let (width, rows) = load_rows(path, config.max_queries, "query")?;
            if width != size {
                return Err(Box::new(IoError::new(
                    IoErrorKind::InvalidInput,
                    "query dimensionality does not match the base dataset",
                )));
            }
            rows
        }
        None => {
            let count = config.max_queries.unwrap_or(100).min(base.len() / size);
            base[..count * size].to_vec()
        }
    };

    let engine = DescrInt::with_config(
        DescrIntConfig::new(size, config.depth).with_strategy(config.strategy),
    )?;

    let encode_start = Instant::now();
    let base_set = EncodedSet::from_rows_32f(engine.clone(), &base);
    let query_set = EncodedSet::from_rows_32f(engine.clone(), &queries);
    let encode_time = encode_start.elapsed();
    println!(
        "Encoded {} descriptors at {} bits ({} bytes each, {:.1}x smaller) in {:.2?}.",
        base_set.len() + query_set.len(),
        engine.depth(),
        engine.encoded_size(),
        (size * 4) as f64 / engine.encoded_size() as f64,
        encode_time
    );

    let mut worst = 0.0f32;
    let mut mean = 0.0f64;
    for (row, code) in base.chunks_exact(size).zip(base_set.iter()) {
        let err = math::max_abs_diff(row, &engine.decode_32f(code));
        worst = worst.max(err);
        mean += err as f64;
    }
    mean /= base_set.len() as f64;
    println!("Reconstruction error: mean max |x - x'| = {mean:.6}, worst = {worst:.6}");

    let (m, n) = (query_set.len(), base_set.len());
    println!(
        "Computing {m} x {n} distances ({} strategy{})...",
        engine.select_strategy(m, n).name(),
        if config.parallel { ", parallel" } else { "" }
    );
    let distance_start = Instant::now();
    let approx = query_set.cosine_distances(&base_set, config.parallel);
    let distance_time = distance_start.elapsed();

    let query_rows: Vec<&[f32]> = queries.chunks_exact(size).collect();
    let base_rows: Vec<&[f32]> = base.chunks_exact(size).collect();
    let mut exact = vec![0.0f32; m * n];
    let exact_start = Instant::now();
    math::cosine_distances_mxn(&query_rows, &base_rows, &mut exact);
    let exact_time = exact_start.elapsed();

    let total = approx.len().max(1) as f64;
    let mae = approx
        .iter()
        .zip(&exact)
        .map(|(a, e)| (a - e).abs() as f64)
        .sum::<f64>()
        / total;
    let pairs_per_sec = (m * n) as f64 / distance_time.as_secs_f64().max(f64::EPSILON);
    println!(
        "Quantized: {distance_time:.2?} ({pairs_per_sec:.0} pairs/s), float: {exact_time:.2?}, mean |d - d'| = {mae:.6}"
    );

    if let Some(path) = &config.save {
        base_set.save_to_path(path)?;
        println!("Saved {} codes to {}.", base_set.len(), path.display());
    }

    Ok(())
}

#[derive(Debug, Clone)]
struct Config {
    base: PathBuf,
    queries: Option<PathBuf>,
    depth: usize,
    max_base: Option<usize>,
    max_queries: Option<usize>,
    strategy: DistanceStrategy,
    parallel: bool,
    save: Option<PathBuf>,
}

impl Config {
    fn parse(args: Vec<String>) -> Result<Self, String> {
        let mut base = None;
        let mut queries = None;
        let mut depth = None;
        let mut max_base = None;
        let mut max_queries = None;
        let mut strategy = DistanceStrategy::Auto;
        let mut parallel = false;
        let mut save = None;

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--base" => base = Some(next_path(&mut iter, &arg)?),
                "--queries" => queries = Some(next_path(&mut iter, &arg)?),
                "--depth" | "--bits" => depth = Some(next_usize(&mut iter, &arg)?),
                "--max-base" => max_base = Some(next_usize(&mut iter, &arg)?),
                "--max-queries" => max_queries = Some(next_usize(&mut iter, &arg)?),
                "--strategy" => {
                    let value = next_value(&mut iter, &arg)?;
                    strategy = DistanceStrategy::from_name(&value)
                        .ok_or_else(|| format!("unsupported strategy: {value}"))?;
                }
                "--parallel" => parallel = true,
                "--save" => save = Some(next_path(&mut iter, &arg)?),
                other => {
                    return Err(format!("unrecognised argument: {other}"));
                }
            }
        }

        let base = base.ok_or_else(|| "missing required argument --base".to_string())?;
        let depth = depth.ok_or_else(|| "missing required argument --depth".to_string())?;
        if !(4..=8).contains(&depth) {
            return Err("--depth must be between 4 and 8".to_string());
        }
        if max_base == Some(0) || max_queries == Some(0) {
            return Err("--max-base and --max-queries must be positive".to_string());
        }

        Ok(Self {
            base,
            queries,
            depth,
            max_base,
            max_queries,
            strategy,
            parallel,
            save,
        })
    }
}

fn next_value(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    iter.next()
        .ok_or_else(|| format!("missing value for {flag}"))
}

fn next_path(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<PathBuf, String> {
    Ok(PathBuf::from(next_value(iter, flag)?))
}

fn next_usize(iter: &mut impl Iterator<Item = String>, flag: &str) -> Result<usize, String> {
    let value = next_value(iter, flag)?;
    value
        .parse::<usize>()
        .map_err(|_| format!("invalid value for {flag}: {value}"))
}

fn print_usage() {
    eprintln!("Usage: cargo run --release --bin descr_bench -- [OPTIONS]");
    eprintln!("\nRequired arguments:");
    eprintln!("    --base <path>           Descriptors to encode (.fvecs)");
    eprintln!("    --depth <value>         Bits per component (4-8)");
    eprintln!("\nOptional arguments:");
    eprintln!("    --queries <path>        Query descriptors (.fvecs); defaults to the first base rows");
    eprintln!("    --max-base <value>      Limit the number of base vectors loaded");
    eprintln!("    --max-queries <value>   Limit the number of query vectors (default: 100)");
    eprintln!("    --strategy <name>       auto, direct or unpack (default: auto)");
    eprintln!("    --parallel              Spread matrix rows over all cores");
    eprintln!("    --save <path>           Persist the encoded base set");
    eprintln!("\nSet RUST_LOG=debug for engine diagnostics.");
}
