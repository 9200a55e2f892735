//! Command-line arguments and subcommands for the macroweave CLI.
//!
//! Uses `clap`'s derive API so every flag is declared next to the field that
//! receives it.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "macroweave",
    version,
    about = "Compile-time macro expansion for TypeScript."
)]
pub struct WeaveArgs {
    /// Configuration file; defaults to the nearest macroweave.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log more: `-v` for debug events, `-vv` for trace. `MACROWEAVE_LOG`
    /// overrides this with a full filter such as `macroweave::cache=debug`.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Preprocess and expand files, printing or writing the result.
    Expand {
        /// Files or directories to expand.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Write each result under this directory instead of stdout.
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Neither read nor write the expansion cache.
        #[arg(long)]
        no_cache: bool,
        /// Write a `.map` file next to each output (requires --out-dir).
        #[arg(long, requires = "out_dir")]
        source_map: bool,
        /// Print a line diff against the input instead of the output.
        #[arg(long, conflicts_with = "out_dir")]
        diff: bool,
    },
    /// Run only the lexical preprocessor.
    Preprocess {
        #[arg(required = true)]
        file: PathBuf,
        /// Print the source map after the code.
        #[arg(long)]
        source_map: bool,
    },
    /// Expand without writing anything and report diagnostics.
    Check {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Show each macro expansion in a file, with diffs.
    Trace {
        #[arg(required = true)]
        file: PathBuf,
    },
    /// List every registered macro.
    ListMacros,
    /// Inspect or clear the expansion cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheAction {
    /// Show where the cache lives and how many entries it holds.
    Stats,
    /// Delete the cache file.
    Clear,
}
