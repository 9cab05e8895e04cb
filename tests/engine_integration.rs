//! End-to-end engine tests: full units against real temp trees.

use srcpatch::{
    AnchorSpec, Engine, Occurrence, PatchUnit, TargetLocator, Transform, UnitStatus,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SCHEDUTIL: &str = "\
static void sugov_tunables_init(struct cpufreq_policy *policy, struct sugov_tunables *tunables)
{
\ttunables->up_rate_limit_us = cpufreq_policy_transition_delay_us(policy);
\ttunables->down_rate_limit_us = cpufreq_policy_transition_delay_us(policy);
}
";

fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    dir
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

/// Scenario A: literal replace with marker comment; re-run is a no-op.
#[test]
fn replace_then_rerun_reports_already_applied() {
    let tree = write_tree(&[("kernel/sched/cpufreq_schedutil.c", SCHEDUTIL)]);

    let unit = PatchUnit {
        id: "DVFS-BOOST".into(),
        target: TargetLocator::Path {
            path: "kernel/sched/cpufreq_schedutil.c".into(),
        },
        anchors: vec![AnchorSpec::Literal {
            pattern: "tunables->up_rate_limit_us = cpufreq_policy_transition_delay_us(policy);"
                .into(),
            occurrence: Occurrence::First,
        }],
        transforms: vec![Transform::ReplaceSpan {
            anchor: 0,
            payload: "tunables->up_rate_limit_us = 1000; /* DVFS-BOOST (1ms) */".into(),
            scope: None,
        }],
        critical: false,
    };

    let engine = Engine::new(tree.path()).unwrap();
    let report = engine.apply(std::slice::from_ref(&unit));
    assert_eq!(report.entries[0].status, UnitStatus::Applied);

    let patched = read(tree.path(), "kernel/sched/cpufreq_schedutil.c");
    assert_eq!(
        patched
            .matches("tunables->up_rate_limit_us = 1000;")
            .count(),
        1
    );
    // Audit window comes back with a pointer on the marker line.
    assert!(report.entries[0]
        .context
        .as_deref()
        .unwrap()
        .contains("-> [0003]"));

    let rerun = engine.apply(std::slice::from_ref(&unit));
    assert_eq!(rerun.entries[0].status, UnitStatus::AlreadyApplied);
    assert_eq!(read(tree.path(), "kernel/sched/cpufreq_schedutil.c"), patched);
}

/// Scenario B: missing anchor leaves the file byte-identical on disk.
#[test]
fn missing_anchor_leaves_disk_untouched() {
    let tree = write_tree(&[("kernel/sched/cpufreq_schedutil.c", SCHEDUTIL)]);

    let unit = PatchUnit {
        id: "DVFS-MISS".into(),
        target: TargetLocator::Path {
            path: "kernel/sched/cpufreq_schedutil.c".into(),
        },
        anchors: vec![AnchorSpec::Literal {
            pattern: "this literal does not exist in the file".into(),
            occurrence: Occurrence::First,
        }],
        transforms: vec![Transform::ReplaceSpan {
            anchor: 0,
            payload: "x /* DVFS-MISS */".into(),
            scope: None,
        }],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[unit]);
    assert_eq!(report.entries[0].status, UnitStatus::AnchorNotFound);
    assert_eq!(read(tree.path(), "kernel/sched/cpufreq_schedutil.c"), SCHEDUTIL);
}

/// Scenario C: region-scoped regex substitution never leaks past the
/// region's closing brace.
#[test]
fn scoped_substitution_stays_inside_the_table() {
    let opp_table = "\
static struct mt_cpu_freq_method opp_tbl_method_CCI_G75[] = {
\tFP(4,   1),
\tFP(4,   1),
};

static struct mt_cpu_freq_method opp_tbl_method_LL_G75[] = {
\tFP(4,   1),
};
";
    let tree = write_tree(&[("drivers/power/opp_table.h", opp_table)]);

    let unit = PatchUnit {
        id: "CCI-DIV".into(),
        target: TargetLocator::Path {
            path: "drivers/power/opp_table.h".into(),
        },
        anchors: vec![
            AnchorSpec::Regex {
                pattern: r"FP\(4,\s+1\)".into(),
                occurrence: Occurrence::First,
            },
            AnchorSpec::BoundedRegion {
                start_pattern: "static struct mt_cpu_freq_method opp_tbl_method_CCI_G75[] = {"
                    .into(),
                end_pattern: "};".into(),
            },
        ],
        transforms: vec![Transform::RegexSubstitute {
            anchor: 0,
            template: "FP(2,   1) /* CCI-DIV */".into(),
            scope: Some(1),
        }],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[unit]);
    assert_eq!(report.entries[0].status, UnitStatus::Applied);

    let patched = read(tree.path(), "drivers/power/opp_table.h");
    // One substitution inside the CCI block, both other occurrences intact.
    assert_eq!(patched.matches("FP(2,   1)").count(), 1);
    assert_eq!(patched.matches("FP(4,   1)").count(), 2);
    let ll_block = patched.split("LL_G75").nth(1).unwrap();
    assert!(ll_block.contains("FP(4,   1)"));
    assert!(!ll_block.contains("FP(2,   1)"));
}

/// Scenario D: discovery locator, end to end.
#[test]
fn discovery_unit_patches_the_single_matching_file() {
    let tree = write_tree(&[
        (
            "drivers/gpu/vendorA/driverRev2/core.c",
            "u32 kick(void)\n{\n\treturn 0;\n}\n",
        ),
        (
            "drivers/gpu/vendorA/driverRev1/core.c",
            "u32 kick(void)\n{\n\treturn 0;\n}\n",
        ),
    ]);

    let unit = PatchUnit {
        id: "GPU-THROTTLE".into(),
        target: TargetLocator::Discover {
            path_contains: vec!["vendorA".into(), "driverRev2".into()],
            filename: "core.c".into(),
        },
        anchors: vec![AnchorSpec::Regex {
            pattern: r"u32\s+kick\s*\(void\)\n\{".into(),
            occurrence: Occurrence::First,
        }],
        transforms: vec![Transform::InsertAfter {
            anchor: 0,
            payload: "\t/* GPU-THROTTLE */\n\tif (throttle())\n\t\treturn 0;".into(),
        }],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[unit]);
    assert_eq!(report.entries[0].status, UnitStatus::Applied);

    assert!(read(tree.path(), "drivers/gpu/vendorA/driverRev2/core.c")
        .contains("GPU-THROTTLE"));
    // The rev1 sibling does not qualify and stays pristine.
    assert!(!read(tree.path(), "drivers/gpu/vendorA/driverRev1/core.c")
        .contains("GPU-THROTTLE"));
}

#[test]
fn discovery_ambiguity_is_target_not_found() {
    let tree = write_tree(&[
        ("a/vendorA/driverRev2/core.c", "x\n"),
        ("b/vendorA/driverRev2/core.c", "x\n"),
    ]);

    let unit = PatchUnit {
        id: "AMBIG".into(),
        target: TargetLocator::Discover {
            path_contains: vec!["vendorA".into(), "driverRev2".into()],
            filename: "core.c".into(),
        },
        anchors: vec![AnchorSpec::Literal {
            pattern: "x".into(),
            occurrence: Occurrence::First,
        }],
        transforms: vec![Transform::ReplaceSpan {
            anchor: 0,
            payload: "y /* AMBIG */".into(),
            scope: None,
        }],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[unit]);
    assert_eq!(report.entries[0].status, UnitStatus::TargetNotFound);
    assert!(report.entries[0]
        .detail
        .as_deref()
        .unwrap()
        .contains("ambiguous"));
    assert_eq!(read(tree.path(), "a/vendorA/driverRev2/core.c"), "x\n");
    assert_eq!(read(tree.path(), "b/vendorA/driverRev2/core.c"), "x\n");
}

/// A unit with several transforms is all-or-nothing: if a later transform
/// cannot resolve its anchor, nothing reaches the disk.
#[test]
fn failed_second_transform_means_no_partial_write() {
    let body = "\
SYSCALL_DEFINE4(reboot, int, magic1, int, magic2, unsigned int, cmd,
\t\tvoid __user *, arg)
{
\tint ret = 0;
\treturn ret;
}
";
    let tree = write_tree(&[("kernel/reboot.c", body)]);

    let unit = PatchUnit {
        id: "REBOOT-HOOK".into(),
        target: TargetLocator::Path {
            path: "kernel/reboot.c".into(),
        },
        anchors: vec![
            AnchorSpec::Literal {
                pattern: "SYSCALL_DEFINE4(reboot".into(),
                occurrence: Occurrence::First,
            },
            AnchorSpec::Literal {
                pattern: "int ret = -1;".into(), // drifted upstream, absent
                occurrence: Occurrence::First,
            },
        ],
        transforms: vec![
            Transform::InsertBefore {
                anchor: 0,
                payload: "/* REBOOT-HOOK */\nextern int hook(void);".into(),
            },
            Transform::InsertAfter {
                anchor: 1,
                payload: "\thook();".into(),
            },
        ],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[unit]);
    assert_eq!(report.entries[0].status, UnitStatus::AnchorNotFound);
    assert_eq!(read(tree.path(), "kernel/reboot.c"), body);
}

/// Units run strictly in list order and may touch the same file repeatedly.
#[test]
fn multiple_units_stack_on_one_file_in_order() {
    let tree = write_tree(&[(
        "net/ipv4/tcp_cong.c",
        "int tcp_set_default_congestion_control(const char *name)\n{\n\treturn 0;\n}\n",
    )]);

    let first = PatchUnit {
        id: "BBR-LOCK".into(),
        target: TargetLocator::Path {
            path: "net/ipv4/tcp_cong.c".into(),
        },
        anchors: vec![AnchorSpec::Regex {
            pattern: r"(int\s+tcp_set_default_congestion_control\(const\s+char\s*\*name\)\n\{)"
                .into(),
            occurrence: Occurrence::First,
        }],
        transforms: vec![Transform::RegexSubstitute {
            anchor: 0,
            template: "${1}\n\t/* BBR-LOCK */\n\tif (name && strncmp(name, \"cubic\", 5) == 0)\n\t\tname = \"bbr\";".into(),
            scope: None,
        }],
        critical: false,
    };

    let second = PatchUnit {
        id: "CONG-TAIL".into(),
        target: TargetLocator::Path {
            path: "net/ipv4/tcp_cong.c".into(),
        },
        anchors: vec![],
        transforms: vec![Transform::AppendToFile {
            payload: "\n/* CONG-TAIL */\nEXPORT_SYMBOL(tcp_set_default_congestion_control);\n"
                .into(),
        }],
        critical: false,
    };

    let report = Engine::new(tree.path()).unwrap().apply(&[first, second]);
    assert_eq!(report.entries[0].status, UnitStatus::Applied);
    assert_eq!(report.entries[1].status, UnitStatus::Applied);
    assert_eq!(report.entries[0].id, "BBR-LOCK");
    assert_eq!(report.entries[1].id, "CONG-TAIL");

    let patched = read(tree.path(), "net/ipv4/tcp_cong.c");
    let bbr = patched.find("BBR-LOCK").unwrap();
    let tail = patched.find("CONG-TAIL").unwrap();
    assert!(bbr < tail);
}

/// Append-only units need no anchors and are idempotent like any other.
#[test]
fn append_only_unit_is_guarded_by_marker() {
    let tree = write_tree(&[("fs/open.c", "long do_sys_open(void) { return 0; }\n")]);

    let unit = PatchUnit {
        id: "CLOSE-RANGE-BACKPORT".into(),
        target: TargetLocator::Path {
            path: "fs/open.c".into(),
        },
        anchors: vec![],
        transforms: vec![Transform::AppendToFile {
            payload: "\n/* CLOSE-RANGE-BACKPORT */\nSYSCALL_DEFINE3(close_range, unsigned int, fd, unsigned int, max_fd, unsigned int, flags)\n{\n\treturn 0;\n}\n".into(),
        }],
        critical: false,
    };

    let engine = Engine::new(tree.path()).unwrap();
    engine.apply(std::slice::from_ref(&unit));
    let once = read(tree.path(), "fs/open.c");

    let rerun = engine.apply(std::slice::from_ref(&unit));
    assert_eq!(rerun.entries[0].status, UnitStatus::AlreadyApplied);
    assert_eq!(read(tree.path(), "fs/open.c"), once);
    assert_eq!(once.matches("close_range").count(), 1);
}
