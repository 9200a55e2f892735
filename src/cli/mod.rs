//! The macroweave command-line interface.
//!
//! Parses arguments, loads the project configuration and hands each command
//! to the library. Commands return whether any error diagnostic was
//! produced; that and fatal errors decide the exit code.

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use crate::cache::{ExpansionCache, DEFAULT_CACHE_DIR};
use crate::cli::args::{CacheAction, Command, WeaveArgs};
use crate::config::WeaveConfig;
use crate::macros::MacroRegistry;
use crate::transform::{TransformOptions, Transformer};
use crate::{err_msg, WeaveError};

pub mod args;
pub mod output;

/// File extensions the CLI picks up when walking directories.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "mts", "cts"];

/// Environment variable holding a log filter, in `EnvFilter` syntax.
pub const LOG_ENV: &str = "MACROWEAVE_LOG";

/// The main entry point for the CLI.
pub fn run() {
    let args = WeaveArgs::parse();
    init_logging(args.verbose);
    match execute(args) {
        Ok(false) => {}
        Ok(true) => process::exit(1),
        Err(e) => {
            output::print_error(e);
            process::exit(1);
        }
    }
}

/// Runs one parsed command. `Ok(true)` means errors were reported.
pub fn execute(args: WeaveArgs) -> Result<bool, WeaveError> {
    let config = load_config(args.config.as_deref())?;
    let registry = Arc::new(MacroRegistry::with_builtins());

    match args.command {
        Command::Expand {
            paths,
            out_dir,
            no_cache,
            source_map,
            diff,
        } => {
            let mut transformer = Transformer::new(registry, config);
            if !no_cache {
                transformer = transformer.with_persistent_cache();
            }
            let had_errors = handle_expand(
                &mut transformer,
                &paths,
                ExpandOutput {
                    out_dir: out_dir.as_deref(),
                    source_map,
                    diff,
                    use_cache: !no_cache,
                },
            )?;
            transformer.finish();
            Ok(had_errors)
        }
        Command::Preprocess { file, source_map } => {
            let transformer = Transformer::new(registry, config);
            handle_preprocess(&transformer, &file, source_map)?;
            Ok(false)
        }
        Command::Check { paths } => {
            let mut transformer = Transformer::new(registry, config).with_persistent_cache();
            let had_errors = handle_check(&mut transformer, &paths)?;
            transformer.finish();
            Ok(had_errors)
        }
        Command::Trace { file } => {
            let mut transformer = Transformer::new(registry, config);
            handle_trace(&mut transformer, &file)
        }
        Command::ListMacros => {
            let mut defs = registry.get_all();
            defs.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.kind().as_str().cmp(b.kind().as_str())));
            output::print_macro_list(&defs);
            Ok(false)
        }
        Command::Cache { action } => {
            handle_cache(&config, action);
            Ok(false)
        }
    }
}

/// Sends library events to stderr. Warnings are always shown.
fn init_logging(verbose: u8) {
    let env = std::env::var(LOG_ENV).ok();
    let directives = log_directives(verbose, env.as_deref());
    let filter = EnvFilter::try_new(&directives).unwrap_or_else(|e| {
        eprintln!("warning: ignoring invalid {}: {}", LOG_ENV, e);
        EnvFilter::new(log_directives(verbose, None))
    });
    // A subscriber may already be installed when embedded; keep that one.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .without_time()
        .try_init();
}

/// The filter for a verbosity count, unless the environment names one.
fn log_directives(verbose: u8, env: Option<&str>) -> String {
    match env.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => match verbose {
            0 => "warn".to_string(),
            1 => "warn,macroweave=debug".to_string(),
            _ => "warn,macroweave=trace".to_string(),
        },
    }
}

fn load_config(explicit: Option<&Path>) -> Result<WeaveConfig, WeaveError> {
    match explicit {
        Some(path) => WeaveConfig::load(path),
        None => WeaveConfig::discover(&std::env::current_dir()?),
    }
}

// ============================================================================
// INPUT DISCOVERY
// ============================================================================

/// An input file and the path its output is written to, relative to
/// `--out-dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Input {
    path: PathBuf,
    relative: PathBuf,
}

/// Expands directories into the source files under them, skipping
/// declaration files, `node_modules` and the cache directory.
fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<Input>, WeaveError> {
    let mut inputs = Vec::new();
    for root in paths {
        if !root.is_dir() {
            if !root.exists() {
                return Err(err_msg!(Io, "no such file: {}", root.display()));
            }
            let relative = root.file_name().map(PathBuf::from).unwrap_or_else(|| root.clone());
            inputs.push(Input {
                path: root.clone(),
                relative,
            });
            continue;
        }
        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                !(e.file_type().is_dir() && (name == "node_modules" || name == DEFAULT_CACHE_DIR))
            });
        for entry in walker {
            let entry = entry.map_err(|e| err_msg!(Io, "failed to walk directory: {}", e))?;
            if !entry.file_type().is_file() || !is_source_file(entry.path()) {
                continue;
            }
            let path = entry.path().to_path_buf();
            let relative = path.strip_prefix(root).map(Path::to_path_buf).unwrap_or_else(|_| path.clone());
            inputs.push(Input { path, relative });
        }
    }
    Ok(inputs)
}

fn is_source_file(path: &Path) -> bool {
    let name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    if name.ends_with(".d.ts") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
}

fn read_source(path: &Path) -> Result<String, WeaveError> {
    fs::read_to_string(path).map_err(|e| err_msg!(Io, "cannot read {}: {}", path.display(), e))
}

fn display_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// ============================================================================
// COMMANDS
// ============================================================================

struct ExpandOutput<'a> {
    out_dir: Option<&'a Path>,
    source_map: bool,
    diff: bool,
    use_cache: bool,
}

fn handle_expand(transformer: &mut Transformer, paths: &[PathBuf], out: ExpandOutput<'_>) -> Result<bool, WeaveError> {
    let inputs = collect_inputs(paths)?;
    let mut had_errors = false;
    for input in &inputs {
        let source = read_source(&input.path)?;
        let name = display_name(&input.path);
        let mut options = TransformOptions::for_file(name.clone());
        if !out.use_cache {
            options = options.without_cache();
        }
        if out.source_map {
            options = options.with_source_map();
        }
        let result = transformer.transform(&source, &options)?;
        output::print_diagnostics(&name, &source, &result.diagnostics);
        had_errors |= result.has_errors();

        match out.out_dir {
            Some(dir) => {
                let target = dir.join(&input.relative);
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut code = result.code.clone();
                if let Some(map) = &result.source_map {
                    let map_name = format!(
                        "{}.map",
                        target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                    );
                    fs::write(target.with_file_name(&map_name), map.to_json()?)?;
                    code.push_str(&format!("//# sourceMappingURL={}\n", map_name));
                }
                fs::write(&target, code)?;
            }
            None if out.diff => output::print_file_diff(&name, &source, &result.code),
            None => print!("{}", result.code),
        }
    }
    Ok(had_errors)
}

fn handle_preprocess(transformer: &Transformer, file: &Path, source_map: bool) -> Result<(), WeaveError> {
    let source = read_source(file)?;
    let result = transformer.preprocess(&source, &display_name(file))?;
    print!("{}", result.code);
    if source_map {
        if let Some(map) = &result.source_map {
            println!();
            println!("{}", map.to_json()?);
        }
    }
    Ok(())
}

fn handle_check(transformer: &mut Transformer, paths: &[PathBuf]) -> Result<bool, WeaveError> {
    let inputs = collect_inputs(paths)?;
    let (mut errors, mut warnings) = (0, 0);
    for input in &inputs {
        let source = read_source(&input.path)?;
        let name = display_name(&input.path);
        let result = transformer.transform(&source, &TransformOptions::for_file(name.clone()))?;
        output::print_diagnostics(&name, &source, &result.diagnostics);
        let file_errors = result.diagnostics.iter().filter(|d| d.is_error()).count();
        errors += file_errors;
        warnings += result.diagnostics.len() - file_errors;
    }
    output::print_summary(inputs.len(), errors, warnings);
    Ok(errors > 0)
}

fn handle_trace(transformer: &mut Transformer, file: &Path) -> Result<bool, WeaveError> {
    let source = read_source(file)?;
    let name = display_name(file);
    // Uncached, so every step is recomputed.
    let result = transformer.transform(&source, &TransformOptions::for_file(name.clone()).without_cache())?;
    output::print_trace(transformer.trace(&name).unwrap_or_default());
    output::print_diagnostics(&name, &source, &result.diagnostics);
    Ok(result.has_errors())
}

fn handle_cache(config: &WeaveConfig, action: CacheAction) {
    let Some(dir) = config.cache_dir() else {
        println!("expansion cache is disabled");
        return;
    };
    let mut cache = ExpansionCache::load(&dir);
    let path = cache
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    match action {
        CacheAction::Stats => {
            println!("cache: {}", path);
            println!("entries: {}", cache.len());
        }
        CacheAction::Clear => {
            let removed = cache.len();
            cache.clear();
            println!("removed {} entries from {}", removed, path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_inputs_walks_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src/nested")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("src/a.ts"), "").unwrap();
        fs::write(root.join("src/nested/b.tsx"), "").unwrap();
        fs::write(root.join("src/types.d.ts"), "").unwrap();
        fs::write(root.join("src/readme.md"), "").unwrap();
        fs::write(root.join("node_modules/pkg/index.ts"), "").unwrap();

        let inputs = collect_inputs(&[root.to_path_buf()]).unwrap();
        let relative: Vec<_> = inputs.iter().map(|i| display_name(&i.relative)).collect();
        assert_eq!(relative, vec!["src/a.ts", "src/nested/b.tsx"]);
    }

    #[test]
    fn test_log_directives_follow_verbosity() {
        assert_eq!(log_directives(0, None), "warn");
        assert_eq!(log_directives(1, None), "warn,macroweave=debug");
        assert_eq!(log_directives(3, None), "warn,macroweave=trace");
        assert_eq!(log_directives(0, Some("  ")), "warn");
        assert_eq!(log_directives(2, Some("macroweave::cache=debug")), "macroweave::cache=debug");
        assert!(EnvFilter::try_new(log_directives(2, None)).is_ok());
    }

    #[test]
    fn test_missing_input_is_an_error() {
        assert!(collect_inputs(&[PathBuf::from("/definitely/not/here.ts")]).is_err());
    }
}
