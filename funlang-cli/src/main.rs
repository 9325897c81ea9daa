use std::collections::HashMap;
use std::collections::HashSet;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{self, Command};

use anyhow::{Context, Result, bail};
use clap::Parser;
use funlang_core::{LangConfig, Session, emit_llvm_ir, interpret};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(version, about = "The FunLang interpreter and compiler", long_about = None)]
struct Cli {
    /// Source file to run; starts the interactive shell when omitted
    file: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "JSON file re-spelling keywords and builtin names"
    )]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Emit IR instead of interpreting: llvm")]
    emit: Option<String>,

    #[arg(short, long, value_name = "PATH", help = "Output path for --emit and --build")]
    output: Option<PathBuf>,

    #[arg(long, help = "Build a native executable via llc and clang")]
    build: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => LangConfig::new(),
    };

    let Some(file) = &cli.file else {
        return shell(config);
    };
    let name = file.display().to_string();
    let source =
        fs::read_to_string(file).with_context(|| format!("failed to read source file {name}"))?;

    if cli.build || cli.emit.is_some() {
        if let Some(format) = cli.emit.as_deref() {
            if format != "llvm" {
                bail!("unsupported emit format: {format}");
            }
        }
        let ir = match emit_llvm_ir(&name, &source, &config) {
            Ok(ir) => ir,
            Err(diag) => fail(&diag),
        };
        if cli.build {
            return build_executable(file, &ir, cli.output.as_deref());
        }
        let output = cli
            .output
            .clone()
            .unwrap_or_else(|| file.with_extension("ll"));
        fs::write(&output, ir)
            .with_context(|| format!("failed to write output file {}", output.display()))?;
        return Ok(());
    }

    if let Err(diag) = interpret(&name, &source, &config) {
        fail(&diag);
    }
    Ok(())
}

/// Print a diagnostic the way the language defines it and exit
/// non-zero.
fn fail(diag: &funlang_core::Diagnostic) -> ! {
    eprintln!("{diag}");
    process::exit(1);
}

/// The interactive shell: one persistent environment, one line per
/// evaluation.
fn shell(config: LangConfig) -> Result<()> {
    let mut session = Session::new(config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "funlang > ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" {
            return Ok(());
        }
        match session.eval("<stdin>", line, &mut stdout) {
            Ok(value) => writeln!(stdout, "{value}")?,
            Err(diag) => eprintln!("{diag}"),
        }
    }
}

/// Assemble and link the emitted IR with the external toolchain,
/// removing the intermediate files afterwards.
fn build_executable(file: &Path, ir: &str, output: Option<&Path>) -> Result<()> {
    let output = match output {
        Some(path) => path.to_path_buf(),
        None => file.with_extension(""),
    };
    let ll_path = output.with_extension("ll");
    let obj_path = output.with_extension("o");
    fs::write(&ll_path, ir)
        .with_context(|| format!("failed to write {}", ll_path.display()))?;

    let status = Command::new("llc")
        .arg("-filetype=obj")
        .arg(&ll_path)
        .arg("-o")
        .arg(&obj_path)
        .status()
        .context("failed to run llc")?;
    if !status.success() {
        bail!("llc failed on {}", ll_path.display());
    }

    let status = Command::new("clang")
        .arg(&obj_path)
        .arg("-o")
        .arg(&output)
        .arg("-lm")
        .status()
        .context("failed to run clang")?;
    if !status.success() {
        bail!("clang failed on {}", obj_path.display());
    }

    fs::remove_file(&ll_path).ok();
    fs::remove_file(&obj_path).ok();
    Ok(())
}

/// On-disk spelling configuration: internal identity to surface
/// spelling, for keywords and builtin functions separately.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    keywords: HashMap<String, String>,
    #[serde(default)]
    builtins: HashMap<String, String>,
}

fn load_config(path: &Path) -> Result<LangConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let file: ConfigFile = serde_json::from_str(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    validate_spellings(&file)?;

    let mut config = LangConfig::new();
    for (internal, spelling) in &file.keywords {
        if !config.respell_keyword(internal, spelling) {
            bail!("Unknown keyword: '{internal}'");
        }
    }
    for (internal, spelling) in &file.builtins {
        if !config.respell_builtin(internal, spelling) {
            bail!("Unknown builtin: '{internal}'");
        }
    }
    Ok(config)
}

/// Collision checking happens here, before the core ever sees the
/// rename table.
fn validate_spellings(file: &ConfigFile) -> Result<()> {
    let mut keywords = HashSet::new();
    for internal in LangConfig::keyword_internals() {
        let spelling = file
            .keywords
            .get(internal)
            .map(String::as_str)
            .unwrap_or(internal);
        if !keywords.insert(spelling.to_string()) {
            bail!("Duplicate keyword: '{spelling}'");
        }
    }
    let mut builtins = HashSet::new();
    for internal in LangConfig::builtin_internals() {
        let spelling = file
            .builtins
            .get(internal)
            .map(String::as_str)
            .unwrap_or(internal);
        if keywords.contains(spelling) {
            bail!("Builtin function name conflicts with keyword: '{spelling}'");
        }
        if !builtins.insert(spelling.to_string()) {
            bail!("Duplicate builtin: '{spelling}'");
        }
    }
    Ok(())
}
