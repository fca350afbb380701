//! razbor - Inspect binary container files as trees of byte ranges
//!
//! This tool decodes ZIP, PDF, JPEG, BMP, DEX, ELF and Java class files
//! and prints every decoded component with the exact span it occupies.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use razbor_core::{DecodeOptions, FileFormat, FormatKind};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Inspect binary container files as trees of byte ranges
#[derive(Parser, Debug)]
#[command(name = "razbor")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decode as this format instead of choosing by extension and magic bytes
    #[arg(long, value_enum)]
    format: Option<ForcedFormat>,

    /// Deepest tree level to print (0 = top-level components only)
    #[arg(long)]
    depth: Option<usize>,

    /// List anomalies under the component that owns them
    #[arg(long)]
    anomalies: bool,

    /// Print one summary line per file instead of the tree
    #[arg(long)]
    summary: bool,

    /// Largest file to decode, in bytes
    #[arg(long, env = "RAZBOR_MAX_FILE_SIZE", default_value = "268435456")]
    max_file_size: u64,

    /// Deepest nesting of PDF arrays and dictionaries
    #[arg(long, default_value = "64")]
    max_depth: usize,

    /// Skip CRC-32 verification of stored ZIP entries
    #[arg(long)]
    no_verify: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file to decode
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of files to decode
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Format override for `--format`
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ForcedFormat {
    /// ZIP archive (also JAR, APK, DOCX)
    Zip,
    /// PDF document
    Pdf,
    /// JPEG image
    Jpeg,
    /// Windows bitmap
    Bmp,
    /// Dalvik executable
    Dex,
    /// ELF object or executable
    Elf,
    /// Java class file
    Class,
    /// Opaque bytes
    Raw,
}

impl From<ForcedFormat> for FormatKind {
    fn from(format: ForcedFormat) -> Self {
        match format {
            ForcedFormat::Zip => FormatKind::Zip,
            ForcedFormat::Pdf => FormatKind::Pdf,
            ForcedFormat::Jpeg => FormatKind::Jpeg,
            ForcedFormat::Bmp => FormatKind::Bmp,
            ForcedFormat::Dex => FormatKind::Dex,
            ForcedFormat::Elf => FormatKind::Elf,
            ForcedFormat::Class => FormatKind::Class,
            ForcedFormat::Raw => FormatKind::Raw,
        }
    }
}

impl Cli {
    fn decode_options(&self) -> DecodeOptions {
        DecodeOptions::new()
            .max_file_size(self.max_file_size)
            .max_nesting_depth(self.max_depth)
            .verify_checksums(!self.no_verify)
    }
}

/// Tracks file contents already decoded in directory mode
#[derive(Default)]
struct ContentRegistry {
    /// blake3 digests of every file decoded so far
    seen: HashSet<blake3::Hash>,
    stats: RegistryStats,
}

#[derive(Default)]
struct RegistryStats {
    decoded: usize,
    duplicates_skipped: usize,
    failed: usize,
}

impl ContentRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Records `data` and returns false if identical bytes were seen before
    fn register(&mut self, data: &[u8]) -> bool {
        let hash = blake3::hash(data);
        if self.seen.insert(hash) {
            return true;
        }
        debug!("Skipping duplicate content {}", &hash.to_hex()[..8]);
        self.stats.duplicates_skipped += 1;
        false
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} decoded, {} duplicates skipped, {} failed",
            self.stats.decoded, self.stats.duplicates_skipped, self.stats.failed
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(ref file) = cli.input.file {
        process_single_file(&cli, file)
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, directory)
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

/// Decode and print one file
fn process_single_file(cli: &Cli, file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    let data = read_input(cli, file)?;
    let document = decode(cli, file, data)?;
    print!("{}", render(cli, file, &document));
    Ok(())
}

/// Decode every visible file below a directory, once per distinct content
fn process_directory(cli: &Cli, directory: &Path) -> Result<()> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut registry = ContentRegistry::new();
    for path in collect_files(directory) {
        let data = match read_input(cli, &path) {
            Ok(data) => data,
            Err(e) => {
                warn!("{:#}", e);
                registry.stats.failed += 1;
                continue;
            }
        };
        if !registry.register(&data) {
            trace!("Already decoded identical content: {}", path.display());
            continue;
        }

        match decode(cli, &path, data) {
            Ok(document) => {
                registry.stats.decoded += 1;
                print!("{}", render(cli, &path, &document));
            }
            Err(e) => {
                // Log error but continue with other files
                warn!("{:#}", e);
                registry.stats.failed += 1;
            }
        }
    }

    registry.print_summary();
    Ok(())
}

/// Regular, non-hidden files below `directory` in walk order
fn collect_files(directory: &Path) -> Vec<PathBuf> {
    WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}

/// Reads a file after checking it against the size limit
fn read_input(cli: &Cli, path: &Path) -> Result<Vec<u8>> {
    let metadata = fs::metadata(path)
        .with_context(|| format!("Failed to stat input file: {}", path.display()))?;
    if metadata.len() > cli.max_file_size {
        bail!(
            "{} is {} bytes, above the limit of {}",
            path.display(),
            metadata.len(),
            cli.max_file_size
        );
    }
    trace!("Reading {}", path.display());
    fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
}

fn decode(cli: &Cli, path: &Path, data: Vec<u8>) -> Result<FileFormat> {
    let options = cli.decode_options();
    let document = match cli.format {
        Some(format) => razbor_core::decode_as(format.into(), data, &options),
        None => {
            let extension = path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default();
            razbor_core::decode(data, extension, &options)
        }
    };
    document.with_context(|| format!("Failed to decode {}", path.display()))
}

/// Formats a decoded file as a summary line or an indented tree
fn render(cli: &Cli, path: &Path, document: &FileFormat) -> String {
    let anomalies = document.anomalies();
    let mut out = String::new();

    if cli.summary {
        let _ = writeln!(
            out,
            "{}: {} {} bytes, {} components, {} anomalies",
            path.display(),
            document.kind(),
            document.data().len(),
            document.walk().count(),
            anomalies.len()
        );
        return out;
    }

    let _ = writeln!(
        out,
        "{} ({}, {} bytes)",
        path.display(),
        document.kind(),
        document.data().len()
    );
    if cli.anomalies {
        for anomaly in document.file_anomalies() {
            let _ = writeln!(out, "! {}", anomaly);
        }
    }
    for (depth, component) in document.walk() {
        if cli.depth.is_some_and(|max| depth > max) {
            continue;
        }
        let indent = "  ".repeat(depth);
        let _ = write!(
            out,
            "{}{} {}",
            indent,
            component.span(),
            component.label().unwrap_or("<unlabeled>")
        );
        if let Some(value) = component.value() {
            let _ = write!(out, " = {}", value);
        }
        out.push('\n');
        if cli.anomalies {
            for anomaly in component.anomalies() {
                let _ = writeln!(out, "{}  ! {}", indent, anomaly);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("razbor").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_content_registry_deduplication() {
        let mut registry = ContentRegistry::new();
        assert!(registry.register(b"hello"));
        assert!(registry.register(b"world"));
        assert!(!registry.register(b"hello"));
        assert_eq!(registry.stats.duplicates_skipped, 1);
    }

    #[test]
    fn test_collect_files_skips_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("a.bin"), b"a").unwrap();
        fs::write(root.join(".hidden"), b"h").unwrap();
        fs::create_dir(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("config"), b"c").unwrap();
        fs::create_dir(root.join("sub")).unwrap();
        fs::write(root.join("sub").join("b.bin"), b"b").unwrap();

        let files = collect_files(root);
        assert_eq!(files, vec![root.join("a.bin"), root.join("sub").join("b.bin")]);
    }

    #[test]
    fn test_render_tree() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob.bin");
        fs::write(&path, b"hello").unwrap();

        let cli = cli(&["--file", "blob.bin"]);
        let data = read_input(&cli, &path).unwrap();
        let document = decode(&cli, &path, data).unwrap();
        let rendered = render(&cli, &path, &document);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "[0x0..0x5) Raw Binary = 68 65 6C 6C 6F");
    }

    #[test]
    fn test_render_summary() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("blob.bin");
        fs::write(&path, b"hello").unwrap();

        let cli = cli(&["--file", "blob.bin", "--summary"]);
        let document = decode(&cli, &path, b"hello".to_vec()).unwrap();
        let rendered = render(&cli, &path, &document);
        assert!(rendered.ends_with(": raw 5 bytes, 1 components, 0 anomalies\n"));
    }

    #[test]
    fn test_forced_format_reports_errors() {
        let cli = cli(&["--file", "x", "--format", "zip"]);
        let err = decode(&cli, Path::new("x"), b"hello".to_vec()).unwrap_err();
        assert!(format!("{:#}", err).starts_with("Failed to decode x"));
    }

    #[test]
    fn test_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.bin");
        fs::write(&path, [0u8; 32]).unwrap();

        let cli = cli(&["--file", "big.bin", "--max-file-size", "16"]);
        assert!(read_input(&cli, &path).is_err());
    }

    #[test]
    fn test_input_modes_are_exclusive() {
        assert!(Cli::try_parse_from(["razbor", "-f", "a", "-d", "b"]).is_err());
        assert!(Cli::try_parse_from(["razbor"]).is_err());
    }

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
