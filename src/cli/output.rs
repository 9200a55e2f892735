//! User-facing output for the CLI.
//!
//! Everything the commands print goes through here: coloured headers and
//! summaries via `termcolor`, diffs via `difference`, diagnostics via
//! `miette` reports.

use std::io::Write;
use std::sync::Arc;

use difference::{Changeset, Difference};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::diagnostics::to_error_source;
use crate::macros::{MacroDefinition, MacroExpansionStep};
use crate::Diagnostic;

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// Renders diagnostics for one file to stderr with source snippets.
pub fn print_diagnostics(file_name: &str, source: &str, diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    let named = to_error_source(file_name, source);
    for diag in diagnostics {
        let report = miette::Report::new(diag.render_with(&named));
        eprintln!("{:?}", report);
    }
}

/// Prints a fatal error and its chain.
pub fn print_error(error: impl Into<miette::Report>) {
    eprintln!("{:?}", error.into());
}

pub fn print_summary(files: usize, errors: usize, warnings: usize) {
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let color = if errors > 0 {
        Color::Red
    } else if warnings > 0 {
        Color::Yellow
    } else {
        Color::Green
    };
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(color)).set_bold(true));
    let _ = writeln!(
        stderr,
        "{} file{} checked: {} error{}, {} warning{}",
        files,
        plural(files),
        errors,
        plural(errors),
        warnings,
        plural(warnings)
    );
    let _ = stderr.reset();
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

// ============================================================================
// TRACE AND DIFF
// ============================================================================

/// Prints each expansion step as a header followed by a diff of the
/// invocation against its output.
pub fn print_trace(trace: &[MacroExpansionStep]) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    if trace.is_empty() {
        let _ = writeln!(stdout, "no macro expansions");
        return;
    }
    for (i, step) in trace.iter().enumerate() {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
        let _ = writeln!(
            stdout,
            "--- Step {}: {} ({}) at {}..{} ---",
            i,
            step.macro_name,
            step.kind.as_str(),
            step.span.start,
            step.span.end
        );
        let _ = stdout.reset();
        let changeset = Changeset::new(&step.before, &step.after, "\n");
        write_diff(&mut stdout, &changeset.diffs);
        let _ = writeln!(stdout);
    }
}

/// Line diff of a whole file.
pub fn print_file_diff(file_name: &str, before: &str, after: &str) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let _ = stdout.set_color(ColorSpec::new().set_bold(true));
    let _ = writeln!(stdout, "--- {}", file_name);
    let _ = writeln!(stdout, "+++ {} (expanded)", file_name);
    let _ = stdout.reset();
    let changeset = Changeset::new(before.trim_end(), after.trim_end(), "\n");
    write_diff(&mut stdout, &changeset.diffs);
}

fn write_diff(stdout: &mut StandardStream, diffs: &[Difference]) {
    for diff in diffs {
        let (prefix, color, text) = match diff {
            Difference::Same(x) => (' ', None, x),
            Difference::Add(x) => ('+', Some(Color::Green), x),
            Difference::Rem(x) => ('-', Some(Color::Red), x),
        };
        let _ = stdout.set_color(ColorSpec::new().set_fg(color));
        for line in text.split('\n') {
            let _ = writeln!(stdout, "{}{}", prefix, line);
        }
    }
    let _ = stdout.reset();
}

// ============================================================================
// LISTINGS
// ============================================================================

pub fn print_macro_list(defs: &[Arc<MacroDefinition>]) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let width = defs.iter().map(|d| d.name.len()).max().unwrap_or(0);
    for def in defs {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true));
        let _ = write!(stdout, "{:width$}", def.name, width = width);
        let _ = stdout.reset();
        let _ = write!(stdout, "  {:<15}", def.kind().as_str());
        if let Some(module) = &def.module {
            let _ = write!(stdout, " [{}]", module);
        }
        let _ = writeln!(stdout, "  {}", def.description);
    }
}
