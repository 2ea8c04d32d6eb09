//! Command-line front end: `pan push` and `pan get`.

mod progress;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use indicatif::MultiProgress;

use crate::config::AppConfig;
use crate::conflict::ConflictPolicy;
use crate::error::{Error, Result};
use crate::mirror::MirrorOptions;
use crate::remote::{AuthContext, FileId, HttpDrive, HttpRangeSource, build_http_client};
use crate::stats::SessionStatsBuilder;
use crate::transfer::{Downloader, UploadOutcome, Uploader};

use progress::{BarProgress, TerminalPrompt, print_get_summary, print_push_summary};

/// Arguments of `pan push`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushArgs {
    pub path: PathBuf,
    pub policy: ConflictPolicy,
    pub dest: Option<String>,
    pub chunks: Option<usize>,
    pub parallel: Option<usize>,
    pub extensions: Vec<String>,
}

/// Arguments of `pan get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetArgs {
    pub url: String,
    pub output: Option<PathBuf>,
    pub threads: Option<usize>,
    pub single: bool,
}

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Push(PushArgs),
    Get(GetArgs),
    Help,
}

pub fn print_usage() {
    eprintln!("Usage: pan <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  push <path>           Upload a file or directory");
    eprintln!("  get <url>             Download a URL with parallel ranges");
    eprintln!();
    eprintln!("Push options:");
    eprintln!("  -f, --force           Overwrite same-named remote files");
    eprintln!("  -k, --keep            Keep both files on conflict (default)");
    eprintln!("      --ask             Ask for each conflicting file");
    eprintln!("      --skip            Skip conflicting files");
    eprintln!("  -d, --dest <NAME>     Remote folder name");
    eprintln!("  -j, --chunks <N>      Parts in flight per file");
    eprintln!("  -p, --parallel <N>    Files in flight");
    eprintln!("  -e, --ext <EXT>       Only upload files with this extension (repeatable)");
    eprintln!();
    eprintln!("Get options:");
    eprintln!("  -o, --output <PATH>   Output path (default: last URL segment)");
    eprintln!("  -t, --threads <N>     Parallel ranges");
    eprintln!("  -s, --single          Single request, no ranges");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PAN_TOKEN             Bearer token for the drive API (push)");
    eprintln!("  PAN_ROOT_ID           Remote directory to push into (default: 0)");
    eprintln!("  RUST_LOG              Log filter (default: warn)");
}

fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> std::result::Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn count(args: &[String], i: &mut usize, flag: &str) -> std::result::Result<usize, String> {
    let raw = value(args, i, flag)?;
    match raw.parse() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{flag} expects a positive number, got {raw}")),
    }
}

/// Parses the arguments that follow the program name.
///
/// # Errors
///
/// Returns a message describing the first unusable argument.
pub fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(Command::Help);
    }

    let mut positional = None;
    let mut i = 1;
    match command.as_str() {
        "push" => {
            let mut push = PushArgs {
                path: PathBuf::new(),
                policy: ConflictPolicy::KeepBoth,
                dest: None,
                chunks: None,
                parallel: None,
                extensions: Vec::new(),
            };
            while i < args.len() {
                match args[i].as_str() {
                    "-f" | "--force" => push.policy = ConflictPolicy::Overwrite,
                    "-k" | "--keep" => push.policy = ConflictPolicy::KeepBoth,
                    "--ask" => push.policy = ConflictPolicy::Ask,
                    "--skip" => push.policy = ConflictPolicy::Cancel,
                    "-d" | "--dest" => push.dest = Some(value(args, &mut i, "--dest")?.to_string()),
                    "-j" | "--chunks" => push.chunks = Some(count(args, &mut i, "--chunks")?),
                    "-p" | "--parallel" => push.parallel = Some(count(args, &mut i, "--parallel")?),
                    "-e" | "--ext" => push.extensions.push(value(args, &mut i, "--ext")?.to_string()),
                    flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
                    path if positional.is_none() => positional = Some(path.to_string()),
                    extra => return Err(format!("unexpected argument {extra}")),
                }
                i += 1;
            }
            push.path = PathBuf::from(positional.ok_or("push requires a path")?);
            Ok(Command::Push(push))
        }
        "get" => {
            let mut get = GetArgs {
                url: String::new(),
                output: None,
                threads: None,
                single: false,
            };
            while i < args.len() {
                match args[i].as_str() {
                    "-o" | "--output" => get.output = Some(PathBuf::from(value(args, &mut i, "--output")?)),
                    "-t" | "--threads" => get.threads = Some(count(args, &mut i, "--threads")?),
                    "-s" | "--single" => get.single = true,
                    flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
                    url if positional.is_none() => positional = Some(url.to_string()),
                    extra => return Err(format!("unexpected argument {extra}")),
                }
                i += 1;
            }
            get.url = positional.ok_or("get requires a URL")?;
            Ok(Command::Get(get))
        }
        other => Err(format!("unknown command {other}")),
    }
}

/// Derives a local file name from the last path segment of a URL.
fn default_output(url: &str) -> PathBuf {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("download");
    PathBuf::from(name)
}

fn root_id() -> Result<FileId> {
    match env::var("PAN_ROOT_ID") {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(FileId)
            .map_err(|_| Error::Config(format!("PAN_ROOT_ID is not a number: {raw}"))),
        Err(_) => Ok(FileId::ROOT),
    }
}

/// Runs `pan push`.
///
/// # Errors
///
/// Returns an error if credentials are missing, the path is unusable, or a
/// single-file upload fails.
pub async fn run_push(config: AppConfig, args: PushArgs) -> Result<()> {
    let token = env::var("PAN_TOKEN")
        .map_err(|_| Error::Config("PAN_TOKEN environment variable not set".into()))?;
    let root = root_id()?;

    let mut transfer = config.transfer;
    if let Some(chunks) = args.chunks {
        transfer = transfer.with_chunk_concurrency(chunks);
    }
    if let Some(files) = args.parallel {
        transfer = transfer.with_file_concurrency(files);
    }

    let http = build_http_client(&config.remote)?;
    let drive = HttpDrive::new(http, config.remote.base_url, AuthContext::bearer(&token, root)?);
    let multi = MultiProgress::new();
    let uploader = Uploader::new(drive, transfer)
        .with_progress(Arc::new(BarProgress::new(multi.clone())))
        .with_prompt(Arc::new(TerminalPrompt::new(multi)));

    let metadata = tokio::fs::metadata(&args.path)
        .await
        .map_err(|_| Error::InvalidPath(args.path.display().to_string()))?;
    let stats = if metadata.is_dir() {
        let mut options = MirrorOptions::default().with_extensions(&args.extensions);
        if let Some(dest) = args.dest {
            options = options.with_remote_name(dest);
        }
        uploader
            .upload_directory(&args.path, root, args.policy, &options)
            .await?
    } else {
        let parent = match &args.dest {
            Some(dest) => uploader.ensure_directory(dest, root).await?,
            None => root,
        };
        let mut builder = SessionStatsBuilder::new();
        match uploader.upload_file(&args.path, parent, args.policy).await {
            Ok(UploadOutcome::Uploaded(stats)) => builder.add_transfer(&stats),
            Ok(UploadOutcome::Reused) => builder.add_reused(),
            Err(Error::ConflictCancelled { name }) => {
                log::info!("{name} not uploaded: it already exists");
                builder.add_cancelled();
            }
            Err(e) => return Err(e),
        }
        builder.build()
    };

    print_push_summary(&stats);
    Ok(())
}

/// Runs `pan get`.
///
/// # Errors
///
/// Returns an error if the download fails.
pub async fn run_get(config: AppConfig, args: GetArgs) -> Result<()> {
    let output = args.output.unwrap_or_else(|| default_output(&args.url));
    let threads = args
        .threads
        .unwrap_or(config.transfer.chunk_concurrency)
        .clamp(1, config.transfer.max_connections.max(1));

    let http = build_http_client(&config.remote)?;
    let downloader = Downloader::new(HttpRangeSource::new(http), config.transfer)
        .with_progress(Arc::new(BarProgress::new(MultiProgress::new())));
    let stats = downloader
        .download_file(&args.url, &output, threads, args.single)
        .await?;

    print_get_summary(&output, &stats);
    Ok(())
}

/// Parses the process arguments and runs the chosen command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
pub async fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(message) => {
            eprintln!("Error: {message}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    match command {
        Command::Help => {
            print_usage();
            Ok(())
        }
        Command::Push(args) => run_push(AppConfig::load()?, args).await,
        Command::Get(args) => run_get(AppConfig::load()?, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn no_arguments_shows_help() {
        assert_eq!(parse_args(&[]), Ok(Command::Help));
        assert_eq!(parse_args(&args("push -h")), Ok(Command::Help));
    }

    #[test]
    fn push_with_options() {
        let Ok(Command::Push(push)) =
            parse_args(&args("push ./site -f -d backup -j 4 -p 2 -e html --ext css"))
        else {
            panic!("expected push");
        };
        assert_eq!(push.path, Path::new("./site"));
        assert_eq!(push.policy, ConflictPolicy::Overwrite);
        assert_eq!(push.dest.as_deref(), Some("backup"));
        assert_eq!(push.chunks, Some(4));
        assert_eq!(push.parallel, Some(2));
        assert_eq!(push.extensions, vec!["html", "css"]);
    }

    #[test]
    fn push_defaults_to_keep_both() {
        let Ok(Command::Push(push)) = parse_args(&args("push a.txt")) else {
            panic!("expected push");
        };
        assert_eq!(push.policy, ConflictPolicy::KeepBoth);
        assert_eq!(push.chunks, None);
    }

    #[test]
    fn get_with_options() {
        let Ok(Command::Get(get)) = parse_args(&args("get http://h/f.iso -t 8 -o out.iso -s"))
        else {
            panic!("expected get");
        };
        assert_eq!(get.url, "http://h/f.iso");
        assert_eq!(get.threads, Some(8));
        assert_eq!(get.output, Some(PathBuf::from("out.iso")));
        assert!(get.single);
    }

    #[test]
    fn bad_arguments_are_reported() {
        assert!(parse_args(&args("push")).is_err());
        assert!(parse_args(&args("push a -j")).is_err());
        assert!(parse_args(&args("push a -j 0")).is_err());
        assert!(parse_args(&args("get u --bogus")).is_err());
        assert!(parse_args(&args("sync a")).is_err());
        assert!(parse_args(&args("push a b")).is_err());
    }

    #[test]
    fn output_name_from_url() {
        assert_eq!(default_output("https://h/a/b/file.zip?x=1"), PathBuf::from("file.zip"));
        assert_eq!(default_output("https://h/dir/"), PathBuf::from("dir"));
        assert_eq!(default_output("https://h"), PathBuf::from("h"));
        assert_eq!(default_output("https:"), PathBuf::from("download"));
    }
}
