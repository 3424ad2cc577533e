// Command-line interface: `gen`, `apply`, and `describe` subcommands over
// the file-level helpers.

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::disasm::NoFormats;
use crate::error::Error;
use crate::generate::GenConfig;
use crate::io;
use crate::patch::Patch;

/// Reference-aware binary delta tool.
#[derive(Parser, Debug)]
#[command(
    name = "refdelta",
    version,
    about = "Reference-aware binary delta generator/applier",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Force overwrite existing output files.
    #[arg(short = 'f', long, global = true)]
    force: bool,

    /// Quiet mode (suppress non-error output).
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Verbose mode (use multiple times for more detail).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output stats as JSON to stderr.
    #[arg(long = "json", global = true)]
    json_output: bool,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Generate a patch from an old and a new image.
    Gen(GenArgs),
    /// Apply a patch to an old image.
    Apply(ApplyArgs),
    /// Print the header and stream sizes of a patch.
    Describe(DescribeArgs),
}

#[derive(Args, Debug)]
struct GenArgs {
    /// Old image file.
    old: PathBuf,

    /// New image file.
    new: PathBuf,

    /// Patch output file.
    patch: PathBuf,

    /// Diff as raw bytes, skipping executable detection.
    #[arg(long)]
    raw: bool,
}

#[derive(Args, Debug)]
struct ApplyArgs {
    /// Old image file.
    old: PathBuf,

    /// Patch file.
    patch: PathBuf,

    /// Reconstructed output file.
    output: PathBuf,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    /// Patch file.
    patch: PathBuf,
}

fn refuse_overwrite(path: &PathBuf, force: bool) -> bool {
    if path.exists() && !force {
        eprintln!(
            "refdelta: output file exists, use -f to overwrite: {}",
            path.display()
        );
        return true;
    }
    false
}

fn report_error(err: &Error) -> i32 {
    eprintln!("refdelta: {err}");
    err.exit_code()
}

// ---------------------------------------------------------------------------
// gen
// ---------------------------------------------------------------------------

fn cmd_gen(cli: &Cli, args: &GenArgs) -> i32 {
    if refuse_overwrite(&args.patch, cli.force) {
        return 1;
    }
    let config = GenConfig { force_raw: args.raw, ..GenConfig::default() };
    match io::generate_file(&args.old, &args.new, &args.patch, &NoFormats, &config) {
        Ok(stats) => {
            if cli.verbose > 0 && !cli.quiet {
                eprintln!(
                    "refdelta: gen: old {} new {} patch {} bytes, {} equivalences covering {}",
                    stats.old_size,
                    stats.new_size,
                    stats.patch_size,
                    stats.equivalences,
                    stats.covered
                );
            }
            if cli.json_output {
                let json = serde_json::json!({
                    "command": "gen",
                    "old_size": stats.old_size,
                    "new_size": stats.new_size,
                    "patch_size": stats.patch_size,
                    "equivalences": stats.equivalences,
                    "covered": stats.covered,
                });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
            }
            0
        }
        Err(err) => report_error(&err),
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

fn cmd_apply(cli: &Cli, args: &ApplyArgs) -> i32 {
    if refuse_overwrite(&args.output, cli.force) {
        return 1;
    }
    match io::apply_file(&args.old, &args.patch, &args.output, &NoFormats) {
        Ok(stats) => {
            if cli.verbose > 0 && !cli.quiet {
                eprintln!(
                    "refdelta: apply: old {} patch {} output {} bytes",
                    stats.old_size, stats.patch_size, stats.new_size
                );
            }
            if cli.json_output {
                let json = serde_json::json!({
                    "command": "apply",
                    "old_size": stats.old_size,
                    "patch_size": stats.patch_size,
                    "new_size": stats.new_size,
                });
                eprintln!("{}", serde_json::to_string_pretty(&json).unwrap());
            }
            0
        }
        Err(err) => report_error(&err),
    }
}

// ---------------------------------------------------------------------------
// describe
// ---------------------------------------------------------------------------

fn cmd_describe(args: &DescribeArgs) -> i32 {
    let bytes = match std::fs::read(&args.patch) {
        Ok(bytes) => bytes,
        Err(err) => return report_error(&Error::FileRead(err)),
    };
    let patch = match Patch::deserialize(&bytes) {
        Ok(patch) => patch,
        Err(err) => return report_error(&err),
    };

    println!("patch size:        {}", bytes.len());
    println!("old image size:    {}", patch.header.old_size);
    println!("old checksum:      {:08X}", patch.header.old_checksum);
    println!("new image size:    {}", patch.header.new_size);
    println!("new checksum:      {:08X}", patch.header.new_checksum);
    println!("elements:          {}", patch.elements.len());
    for (idx, element) in patch.elements.iter().enumerate() {
        println!("element {idx}:");
        println!("  executable type: {}", element.exe_type.code());
        println!("  equivalences:    {}", element.equivalences.len());
        println!("  covered bytes:   {}", element.covered());
        println!("  extra data:      {}", element.extra_data.len());
        println!("  raw deltas:      {}", element.raw_delta.len());
        println!("  reference deltas:{:>6}", element.reference_delta.len());
        for (pool, targets) in element.extra_targets.iter().enumerate() {
            println!("  extra targets (pool {pool}): {}", targets.len());
        }
    }
    0
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Main CLI entry point. Parses arguments via clap, dispatches commands.
pub fn run() -> ! {
    let cli = Cli::parse();

    let default_filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let exit_code = match &cli.command {
        Cmd::Gen(args) => cmd_gen(&cli, args),
        Cmd::Apply(args) => cmd_apply(&cli, args),
        Cmd::Describe(args) => cmd_describe(args),
    };
    process::exit(exit_code);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
