//! Integration tests for the command-line interface.

use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn setup_tree() -> TempDir {
    let dir = TempDir::new().unwrap();

    let sched = dir.path().join("kernel/sched/cpufreq_schedutil.c");
    fs::create_dir_all(sched.parent().unwrap()).unwrap();
    fs::write(
        &sched,
        "\ttunables->up_rate_limit_us = cpufreq_policy_transition_delay_us(policy);\n",
    )
    .unwrap();

    let patches = dir.path().join("patches");
    fs::create_dir(&patches).unwrap();
    fs::write(
        patches.join("dvfs.toml"),
        r#"[meta]
name = "dvfs"

[[units]]
id = "SP: CPU DVFS Boost"

[units.target]
type = "path"
path = "kernel/sched/cpufreq_schedutil.c"

[[units.anchors]]
mode = "literal"
pattern = "tunables->up_rate_limit_us = cpufreq_policy_transition_delay_us(policy);"

[[units.transforms]]
kind = "replace-span"
anchor = 0
payload = "tunables->up_rate_limit_us = 1000; /* SP: CPU DVFS Boost */"
"#,
    )
    .unwrap();

    dir
}

fn srcpatch(args: &[&str], tree: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_srcpatch"))
        .args(args)
        .arg("--tree")
        .arg(tree)
        .output()
        .expect("failed to run srcpatch binary")
}

#[test]
fn apply_patches_tree_and_exits_zero() {
    let dir = setup_tree();
    let out = srcpatch(&["apply"], dir.path());

    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let patched =
        fs::read_to_string(dir.path().join("kernel/sched/cpufreq_schedutil.c")).unwrap();
    assert!(patched.contains("= 1000; /* SP: CPU DVFS Boost */"));

    // Second run is a no-op and still succeeds.
    let rerun = srcpatch(&["apply"], dir.path());
    assert!(rerun.status.success());
    let stdout = String::from_utf8_lossy(&rerun.stdout);
    assert!(stdout.contains("already applied"));
}

#[test]
fn dry_run_leaves_tree_untouched() {
    let dir = setup_tree();
    let before =
        fs::read_to_string(dir.path().join("kernel/sched/cpufreq_schedutil.c")).unwrap();

    let out = srcpatch(&["apply", "--dry-run"], dir.path());
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("would apply"));

    let after =
        fs::read_to_string(dir.path().join("kernel/sched/cpufreq_schedutil.c")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn json_report_is_machine_readable() {
    let dir = setup_tree();
    let out = srcpatch(&["apply", "--json"], dir.path());
    assert!(out.status.success());

    let stdout = String::from_utf8_lossy(&out.stdout);
    let json_start = stdout.find('{').expect("no JSON object in output");
    let report: serde_json::Value = serde_json::from_str(stdout[json_start..].trim()).unwrap();
    assert_eq!(report["entries"][0]["status"], "applied");
}

#[test]
fn verify_succeeds_after_apply_and_fails_before() {
    let dir = setup_tree();

    // Unpatched tree: marker absent. Non-critical, so exit is still zero,
    // but the failure is reported.
    let before = srcpatch(&["verify"], dir.path());
    assert!(before.status.success());
    assert!(String::from_utf8_lossy(&before.stdout).contains("absent"));

    srcpatch(&["apply"], dir.path());

    let after = srcpatch(&["verify"], dir.path());
    assert!(after.status.success());
    assert!(String::from_utf8_lossy(&after.stdout).contains("SP: CPU DVFS Boost"));
}

#[test]
fn missing_critical_target_fails_the_process() {
    let dir = TempDir::new().unwrap();
    let patches = dir.path().join("patches");
    fs::create_dir(&patches).unwrap();
    fs::write(
        patches.join("broken.toml"),
        r#"[[units]]
id = "CRIT-MISS"
critical = true

[units.target]
type = "path"
path = "does/not/exist.c"

[[units.anchors]]
mode = "literal"
pattern = "x"

[[units.transforms]]
kind = "replace-span"
anchor = 0
payload = "y /* CRIT-MISS */"
"#,
    )
    .unwrap();

    let out = srcpatch(&["apply"], dir.path());
    assert!(!out.status.success());
}
