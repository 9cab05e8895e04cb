use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use similar::{ChangeTag, TextDiff};
use srcpatch::{
    check_units, load_from_path, locate, verify, ContextWindow, Engine, PatchSet, PatchUnit,
    RunReport, TargetLocator, UnitStatus,
};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "srcpatch")]
#[command(about = "Declarative source-tree patching engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply patch units to a source tree
    Apply {
        /// Path to the source tree root (flag > SRCPATCH_TREE > cwd)
        #[arg(short, long)]
        tree: Option<PathBuf>,

        /// Specific patch set to apply (otherwise all in patches/)
        #[arg(short, long)]
        units: Option<PathBuf>,

        /// Dry run - evaluate everything in memory, write nothing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Show unified diff of changes
        #[arg(short, long)]
        diff: bool,

        /// Emit the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate patch units without writing (same as apply --dry-run)
    Status {
        #[arg(short, long)]
        tree: Option<PathBuf>,

        #[arg(short, long)]
        units: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Audit a previously patched tree: confirm every marker is present
    Verify {
        #[arg(short, long)]
        tree: Option<PathBuf>,

        #[arg(short, long)]
        units: Option<PathBuf>,
    },

    /// List patch units and their targets
    List {
        #[arg(short, long)]
        units: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Apply {
            tree,
            units,
            dry_run,
            diff,
            json,
        } => cmd_apply(tree, units, dry_run, diff, json),
        Commands::Status { tree, units, json } => cmd_status(tree, units, json),
        Commands::Verify { tree, units } => cmd_verify(tree, units),
        Commands::List { units } => cmd_list(units),
    }
}

/// Resolve the source tree root.
///
/// Priority order: explicit --tree flag, SRCPATCH_TREE environment
/// variable, current working directory.
fn resolve_tree(cli_tree: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = cli_tree {
        return Ok(path.canonicalize()?);
    }

    if let Ok(env_path) = env::var("SRCPATCH_TREE") {
        let path = PathBuf::from(&env_path);
        if path.exists() {
            return Ok(path.canonicalize()?);
        }
        eprintln!(
            "{}",
            format!("Warning: SRCPATCH_TREE is set but path doesn't exist: {env_path}").yellow()
        );
    }

    Ok(env::current_dir()?)
}

/// Discover all .toml patch set files.
///
/// Looks in `<tree>/patches` first, then `./patches` relative to the
/// current working directory.
fn discover_unit_files(tree: &Path) -> Result<Vec<PathBuf>> {
    let cwd_patches = env::current_dir().ok().map(|cwd| cwd.join("patches"));
    let candidate_dirs: Vec<PathBuf> = std::iter::once(tree.join("patches"))
        .chain(cwd_patches)
        .collect();

    for patches_dir in candidate_dirs {
        if !patches_dir.exists() {
            continue;
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&patches_dir).max_depth(1) {
            let entry = entry?;
            if entry.file_type().is_file()
                && entry.path().extension().and_then(|s| s.to_str()) == Some("toml")
            {
                files.push(entry.path().to_path_buf());
            }
        }
        files.sort();

        if !files.is_empty() {
            return Ok(files);
        }
    }

    anyhow::bail!(
        "No .toml patch set files found in either ./patches or {}/patches",
        tree.display()
    )
}

fn load_sets(tree: &Path, units: Option<PathBuf>) -> Result<Vec<(PathBuf, PatchSet)>> {
    let files = match units {
        Some(path) => vec![path],
        None => discover_unit_files(tree)?,
    };
    let mut sets = Vec::with_capacity(files.len());
    for file in files {
        let set = load_from_path(&file)?;
        sets.push((file, set));
    }
    Ok(sets)
}

fn cmd_apply(
    tree: Option<PathBuf>,
    units: Option<PathBuf>,
    dry_run: bool,
    diff: bool,
    json: bool,
) -> Result<()> {
    let tree = resolve_tree(tree)?;
    let sets = load_sets(&tree, units)?;
    let engine = Engine::new(&tree)?;

    let mut fatal = false;
    for (file, set) in sets {
        let name = if set.meta.name.is_empty() {
            file.display().to_string()
        } else {
            set.meta.name.clone()
        };
        if !json {
            println!("{}", format!("== {name}").bold());
        }

        // Snapshot targets up front so --diff can show before/after.
        let snapshots = if diff && !dry_run {
            snapshot_targets(&tree, &set.units)
        } else {
            HashMap::new()
        };

        let report = if dry_run {
            engine.check(&set.units)
        } else {
            engine.apply(&set.units)
        };

        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, dry_run);
            if diff && !dry_run {
                print_diffs(&report, &snapshots);
            }
        }

        fatal |= report.fatal();
    }

    if fatal {
        anyhow::bail!("run failed on one or more critical units");
    }
    Ok(())
}

fn cmd_status(tree: Option<PathBuf>, units: Option<PathBuf>, json: bool) -> Result<()> {
    let tree = resolve_tree(tree)?;
    let sets = load_sets(&tree, units)?;

    for (file, set) in sets {
        if !json {
            println!("{}", format!("== {}", file.display()).bold());
        }
        let report = check_units(&tree, &set.units)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, true);
        }
    }
    Ok(())
}

fn cmd_verify(tree: Option<PathBuf>, units: Option<PathBuf>) -> Result<()> {
    let tree = resolve_tree(tree)?;
    let sets = load_sets(&tree, units)?;

    let mut failed_critical = false;
    for (_, set) in sets {
        for unit in &set.units {
            let path = match locate::locate(&tree, &unit.target) {
                Ok(path) => path,
                Err(e) => {
                    println!("{} {}: {e}", "✗".red(), unit.id);
                    failed_critical |= unit.critical;
                    continue;
                }
            };
            match verify::verify(&path, &unit.id, ContextWindow::default()) {
                Ok(context) => {
                    println!("{} {}", "✓".green(), unit.id);
                    print!("{}", context.dimmed());
                }
                Err(e) => {
                    println!("{} {}: {e}", "✗".red(), unit.id);
                    failed_critical |= unit.critical;
                }
            }
        }
    }

    if failed_critical {
        anyhow::bail!("verification failed for one or more critical units");
    }
    Ok(())
}

fn cmd_list(units: Option<PathBuf>) -> Result<()> {
    let tree = resolve_tree(None)?;
    let sets = load_sets(&tree, units)?;

    for (file, set) in sets {
        println!("{}", format!("== {}", file.display()).bold());
        for unit in &set.units {
            let critical = if unit.critical {
                " [critical]".red().to_string()
            } else {
                String::new()
            };
            println!(
                "  {}{} -> {} ({} anchor(s), {} transform(s))",
                unit.id.cyan(),
                critical,
                describe_target(&unit.target),
                unit.anchors.len(),
                unit.transforms.len()
            );
        }
    }
    Ok(())
}

fn describe_target(target: &TargetLocator) -> String {
    match target {
        TargetLocator::Path { path } => path.clone(),
        TargetLocator::Discover {
            path_contains,
            filename,
        } => format!("{filename} (discover: {})", path_contains.join(", ")),
    }
}

fn print_report(report: &RunReport, dry_run: bool) {
    for entry in &report.entries {
        let label = if dry_run && entry.status == UnitStatus::Applied {
            "would apply".to_string()
        } else {
            entry.status.to_string()
        };
        let line = match entry.status {
            UnitStatus::Applied => format!("  {} {}: {label}", "✓".green(), entry.id),
            UnitStatus::AlreadyApplied => {
                format!("  {} {}: {label}", "•".blue(), entry.id)
            }
            UnitStatus::AnchorNotFound if !entry.critical => {
                format!("  {} {}: {label}", "!".yellow(), entry.id)
            }
            _ => format!("  {} {}: {label}", "✗".red(), entry.id),
        };
        println!("{line}");
        if let Some(detail) = &entry.detail {
            println!("      {}", detail.dimmed());
        }
        if let Some(context) = &entry.context {
            for line in context.lines() {
                println!("    {}", line.dimmed());
            }
        }
    }
    if let Some(id) = &report.halted_on {
        println!(
            "{}",
            format!("  run halted: critical unit '{id}' failed").red()
        );
    }
    println!(
        "  {} applied, {} already applied, {} failed",
        report.count(UnitStatus::Applied),
        report.count(UnitStatus::AlreadyApplied),
        report
            .entries
            .iter()
            .filter(|e| e.status.is_failure())
            .count()
    );
}

/// Read current contents of every resolvable target, keyed by path.
fn snapshot_targets(tree: &Path, units: &[PatchUnit]) -> HashMap<PathBuf, String> {
    let mut snapshots = HashMap::new();
    for unit in units {
        if let Ok(path) = locate::locate(tree, &unit.target) {
            if let Ok(content) = fs::read_to_string(&path) {
                snapshots.entry(path).or_insert(content);
            }
        }
    }
    snapshots
}

fn print_diffs(report: &RunReport, snapshots: &HashMap<PathBuf, String>) {
    let mut shown = std::collections::HashSet::new();
    for entry in &report.entries {
        if entry.status != UnitStatus::Applied {
            continue;
        }
        let Some(path) = &entry.file else { continue };
        if !shown.insert(path.clone()) {
            continue;
        }
        let Some(before) = snapshots.get(path) else {
            continue;
        };
        let Ok(after) = fs::read_to_string(path) else {
            continue;
        };

        println!("{}", format!("--- {}", path.display()).bold());
        let diff = TextDiff::from_lines(before, &after);
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Delete => print!("{}", format!("-{change}").red()),
                ChangeTag::Insert => print!("{}", format!("+{change}").green()),
                ChangeTag::Equal => {}
            }
        }
    }
}
