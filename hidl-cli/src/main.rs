use std::collections::HashSet;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use hidl_core::{CompilationContext, Enforce, FqName, HirFile, PackageRoots};

/// Roots used when no `-r` is given, relative to `-p`.
const DEFAULT_ROOTS: [&str; 2] = [
    "android.hardware:hardware/interfaces",
    "android.hidl:system/libhidl/transport",
];

/// Parses and validates HIDL interface packages.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(
        short = 'r',
        long = "root",
        value_name = "PREFIX:DIR",
        help = "Map a package prefix to a directory (repeatable)"
    )]
    roots: Vec<String>,

    #[arg(
        short = 'p',
        long = "root-path",
        value_name = "PATH",
        help = "Base path for relative root directories"
    )]
    root_path: Option<PathBuf>,

    #[arg(
        short = 'L',
        long = "mode",
        value_enum,
        default_value = "check",
        help = "check: parse and validate; hash: print structural hashes"
    )]
    mode: Mode,

    #[arg(short, long, help = "Log every file parse")]
    verbose: bool,

    #[arg(required = true, value_name = "FQNAME", help = "Files (pkg@1.0::IFoo) or packages (pkg@1.0)")]
    targets: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Check,
    Hash,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    execute(cli)
}

fn execute(cli: Cli) -> Result<()> {
    let roots = package_roots(&cli)?;
    let mut context = CompilationContext::new(roots);
    let enforce = match cli.mode {
        Mode::Check => Enforce::Full,
        Mode::Hash => Enforce::NoHash,
    };

    let mut files = Vec::new();
    for target in &cli.targets {
        let name = FqName::parse(target).with_context(|| format!("invalid target {target}"))?;
        if !name.is_package() && !name.is_fully_qualified() {
            bail!("target {target} must name a package or a file, e.g. pkg@1.0 or pkg@1.0::IFoo");
        }
        let parsed = context
            .parse_target(&name, enforce)
            .with_context(|| format!("failed to parse {name}"))?;
        files.extend(parsed);
    }

    report_warnings(&files);
    if cli.mode == Mode::Hash {
        for file in &files {
            println!("{} {}", file.hash(), file.fq_name());
        }
    }
    log::debug!("parsed {} files", context.parsed_files());
    Ok(())
}

fn package_roots(cli: &Cli) -> Result<PackageRoots> {
    let base = match &cli.root_path {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to read the current directory")?,
    };
    let specs: Vec<&str> = if cli.roots.is_empty() {
        DEFAULT_ROOTS.to_vec()
    } else {
        cli.roots.iter().map(String::as_str).collect()
    };

    let mut roots = PackageRoots::new();
    for spec in specs {
        roots
            .add_spec(spec, Some(&base))
            .with_context(|| format!("invalid package root {spec}"))?;
    }
    Ok(roots)
}

/// Logs the warnings of every target and everything it depends on, once
/// per file.
fn report_warnings(files: &[Rc<HirFile>]) {
    let mut seen = HashSet::new();
    let mut pending: Vec<&Rc<HirFile>> = files.iter().collect();
    while let Some(file) = pending.pop() {
        if !seen.insert(file.fq_name().clone()) {
            continue;
        }
        for warning in file.warnings() {
            log::warn!("{warning}");
        }
        pending.extend(file.dependencies());
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use assert_cmd::Command;
    use predicates::prelude::*;
    use tempfile::tempdir;

    fn write_package(root: &Path, version: &str, files: &[(&str, &str)]) {
        let dir = root.join("test").join(version);
        fs::create_dir_all(&dir).expect("create package dir");
        for (name, source) in files {
            fs::write(dir.join(format!("{name}.hal")), source).expect("write hal");
        }
    }

    #[test]
    fn checks_a_package() {
        let dir = tempdir().expect("tempdir");
        write_package(
            dir.path(),
            "1.0",
            &[
                ("types", "package test@1.0;\nenum Color : int32_t { RED, GREEN, BLUE };\n"),
                ("IFoo", "package test@1.0;\ninterface IFoo { paint(Color color); };\n"),
            ],
        );

        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .arg("-r")
            .arg(format!("test:{}", dir.path().join("test").display()))
            .arg("test@1.0")
            .assert()
            .success()
            .stdout(predicate::str::is_empty());
    }

    #[test]
    fn prints_hashes() {
        let dir = tempdir().expect("tempdir");
        write_package(
            dir.path(),
            "1.0",
            &[
                ("types", "package test@1.0;\nstruct S { int32_t x; };\n"),
                ("IFoo", "package test@1.0;\ninterface IFoo { get() generates (S s); };\n"),
            ],
        );

        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .arg("-p")
            .arg(dir.path())
            .arg("-r")
            .arg("test:test")
            .arg("-L")
            .arg("hash")
            .arg("test@1.0")
            .assert()
            .success()
            .stdout(predicate::str::is_match("^[0-9a-f]{64} test@1.0::types\n[0-9a-f]{64} test@1.0::IFoo\n$").expect("regex"));
    }

    #[test]
    fn reports_constant_errors() {
        let dir = tempdir().expect("tempdir");
        write_package(dir.path(), "1.0", &[("types", "package test@1.0;\nconst int32_t X = 5 / 0;\n")]);

        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .arg("-r")
            .arg(format!("test:{}", dir.path().join("test").display()))
            .arg("test@1.0::types")
            .assert()
            .failure()
            .stderr(predicate::str::contains("types.hal:2:").and(predicate::str::contains("5 / 0")));
    }

    #[test]
    fn logs_overflow_warnings() {
        let dir = tempdir().expect("tempdir");
        write_package(dir.path(), "1.0", &[("types", "package test@1.0;\nconst uint8_t X = 300;\n")]);

        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .env_remove("RUST_LOG")
            .arg("-r")
            .arg(format!("test:{}", dir.path().join("test").display()))
            .arg("test@1.0::types")
            .assert()
            .success()
            .stderr(predicate::str::contains("truncated value 44"));
    }

    #[test]
    fn rejects_bad_arguments() {
        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .arg("-r")
            .arg("no-directory")
            .arg("test@1.0")
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid package root"));

        Command::cargo_bin("hidl-cli")
            .expect("binary exists")
            .arg("-r")
            .arg("test:/nowhere")
            .arg("Color")
            .assert()
            .failure()
            .stderr(predicate::str::contains("must name a package or a file"));
    }
}
