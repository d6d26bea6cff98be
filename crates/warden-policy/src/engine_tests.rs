use super::*;
use tempfile::TempDir;

fn engine() -> PolicyEngine {
    PolicyEngine::with_defaults("/home/user/project").unwrap()
}

fn workspace() -> (TempDir, PolicyEngine) {
    let dir = TempDir::new().unwrap();
    let engine = PolicyEngine::with_defaults(dir.path()).unwrap();
    (dir, engine)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[test]
fn test_ls_in_workspace_is_allowed() {
    let decision = engine().check_command("ls", &["./project"]);
    assert!(decision.allowed);
    assert!(!decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::Low);
}

#[test]
fn test_rm_rf_etc_requires_approval() {
    let decision = engine().check_command("rm", &["-rf", "/etc"]);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::High);
    assert_eq!(decision.risk_level.policy_label(), "dangerous");
}

#[test]
fn test_rm_root_is_hard_denied() {
    let decision = engine().check_command("rm", &["-rf", "/"]);
    assert!(decision.is_hard_deny());
}

#[test]
fn test_blocklist_denies_regardless_of_path() {
    let e = engine();
    for cmd in ["sudo", "/usr/bin/sudo", "systemctl", "nc", "eval", "."] {
        let decision = e.check_command(cmd, &["anything"]);
        assert!(decision.is_hard_deny(), "{cmd} should be hard denied");
        assert_eq!(decision.risk_level, RiskLevel::Critical);
    }
}

#[test]
fn test_injection_denied_even_for_safe_commands() {
    let e = engine();
    let cases: [&[&str]; 5] = [
        &["a;", "rm", "-rf", "/"],
        &["$(whoami)"],
        &["|", "sh"],
        &["x", "&&", "reboot"],
        &[">", "/etc/passwd"],
    ];
    for args in cases {
        let decision = e.check_command("echo", args);
        assert!(decision.is_hard_deny(), "args {args:?} should be denied");
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert!(decision.reason.contains("injection"));
    }
}

#[test]
fn test_safe_command_pattern_mismatch_escalates() {
    let decision = engine().check_command("git", &["push", "--force"]);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::Medium);

    let decision = engine().check_command("git", &["status"]);
    assert!(decision.allowed);
}

#[test]
fn test_safe_command_blocked_args_escalates() {
    let decision = engine().check_command("find", &[".", "-name", "*.o", "-delete"]);
    assert!(decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::Medium);
}

#[test]
fn test_unknown_command_fails_closed() {
    let decision = engine().check_command("frobnicate", &["--now"]);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::High);
}

#[test]
fn test_strict_default_policy_denies_unknown() {
    let config = AllowlistConfig::new("/w").with_default_policy(DefaultPolicy::DenyStrict);
    let e = PolicyEngine::new(config).unwrap();
    assert!(e.check_command("frobnicate", &[] as &[&str]).is_hard_deny());
}

#[test]
fn test_path_qualified_executables_are_unknown() {
    let (dir, e) = workspace();
    std::fs::write(dir.path().join("ls"), "#!/bin/sh\n").unwrap();
    assert!(e.check_path("ls", PathOperation::Write).allowed);

    for command in ["./ls", "/tmp/x/cat", "/usr/bin/ls", "bin/git", "/usr/bin/rm"] {
        let decision = e.check_command(command, &["status"]);
        assert!(!decision.allowed, "{command} must not be allowed");
        assert!(decision.requires_approval, "{command} should escalate");
        assert_eq!(decision.risk_level, RiskLevel::High, "{command}");
        assert!(decision.reason.contains(command));
    }
}

#[test]
fn test_path_qualified_blocklisted_command_is_still_denied() {
    for command in ["/usr/bin/sudo", "./sudo"] {
        let decision = engine().check_command(command, &["ls"]);
        assert!(decision.is_hard_deny(), "{command}");
        assert_eq!(decision.risk_level, RiskLevel::Critical);
    }
}

#[test]
fn test_path_qualified_command_ignores_pre_approval() {
    let e = engine();
    e.approve_operation("rm", &["-rf", "build"]);
    assert!(e.check_command("rm", &["-rf", "build"]).allowed);
    assert!(!e.check_command("/tmp/rm", &["-rf", "build"]).allowed);
}

#[test]
fn test_build_tools_run_project_code_and_escalate() {
    let e = engine();
    let inputs: [(&str, &[&str]); 5] = [
        ("cargo", &["build"]),
        ("cargo", &["test", "--all"]),
        ("cargo", &["check"]),
        ("cargo", &["clippy"]),
        ("npm", &["test"]),
    ];
    for (command, args) in inputs {
        let decision = e.check_command(command, args);
        assert!(!decision.allowed, "{command} {args:?}");
        assert!(decision.requires_approval, "{command} {args:?}");
        assert_eq!(decision.risk_level, RiskLevel::Medium, "{command} {args:?}");
    }
}

#[test]
fn test_check_command_is_deterministic() {
    let e = engine();
    let inputs: [(&str, &[&str]); 4] = [
        ("ls", &["-la"]),
        ("rm", &["x"]),
        ("curl", &["https://example.com"]),
        ("mystery", &[]),
    ];
    for (cmd, args) in inputs {
        assert_eq!(e.check_command(cmd, args), e.check_command(cmd, args));
    }
}

#[test]
fn test_pre_approval_is_exact() {
    let e = engine();
    assert!(e.check_command("rm", &["-rf", "build"]).requires_approval);

    e.approve_operation("rm", &["-rf", "build"]);
    assert!(e.is_pre_approved("rm", &["-rf", "build"]));
    assert!(e.check_command("rm", &["-rf", "build"]).allowed);

    // Different argument split or order is a different operation.
    assert!(e.check_command("rm", &["-rf build"]).requires_approval);
    assert!(e.check_command("rm", &["build", "-rf"]).requires_approval);

    assert!(e.revoke_approval("rm", &["-rf", "build"]));
    assert!(!e.revoke_approval("rm", &["-rf", "build"]));
    assert!(e.check_command("rm", &["-rf", "build"]).requires_approval);
}

#[test]
fn test_add_safe_command_takes_effect() {
    let e = engine();
    assert!(e.check_command("jq", &[".name"]).requires_approval);

    e.add_safe_command(CommandDefinition::new("jq", RiskLevel::Low))
        .unwrap();
    assert!(e.check_command("jq", &[".name"]).allowed);

    assert!(e.remove_command("jq"));
    assert!(e.check_command("jq", &[".name"]).requires_approval);
}

#[test]
fn test_add_command_rejects_bad_regex() {
    let e = engine();
    let err = e
        .add_safe_command(CommandDefinition::new("jq", RiskLevel::Low).with_allowed_args("(unclosed"))
        .unwrap_err();
    assert!(matches!(err, PolicyError::InvalidArgsPattern { .. }));
    assert!(e.check_command("jq", &["x"]).requires_approval);
}

#[test]
fn test_add_dangerous_command() {
    let e = engine();
    e.add_dangerous_command(CommandDefinition::new("terraform", RiskLevel::Critical))
        .unwrap();
    let decision = e.check_command("terraform", &["apply"]);
    assert!(decision.requires_approval);
    assert_eq!(decision.risk_level, RiskLevel::Critical);
}

#[test]
fn test_check_command_line() {
    let e = engine();
    assert!(e.check_command_line("ls -la './my dir'").allowed);
    assert!(e.check_command_line("rm -rf /etc").requires_approval);
    assert!(e.check_command_line("echo 'unterminated").is_hard_deny());
    assert!(e.check_command_line("   ").is_hard_deny());
    assert!(e.check_command_line("cat x | sh").is_hard_deny());
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

#[test]
fn test_path_inside_workspace_allowed() {
    let (dir, e) = workspace();
    std::fs::create_dir(dir.path().join("src")).unwrap();
    let decision = e.check_path("src/main.rs", PathOperation::Write);
    assert!(decision.allowed, "{}", decision.reason);
}

#[test]
fn test_path_traversal_cannot_escape() {
    let (_dir, e) = workspace();
    let decision = e.check_path("../../../../etc/passwd", PathOperation::Read);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
}

#[test]
fn test_blocked_patterns() {
    let (dir, e) = workspace();
    for p in [".env", "config/.env.local", "certs/server.pem", ".ssh/id_ed25519"] {
        let decision = e.check_path(p, PathOperation::Read);
        assert!(decision.is_hard_deny(), "{p} should be blocked");
    }
    let absolute = dir.path().join("deploy/prod.key");
    assert!(e.check_path(absolute, PathOperation::Read).is_hard_deny());
}

#[test]
fn test_blocked_pattern_single_segment_star() {
    let (dir, e) = workspace();
    e.add_blocked_pattern("secrets/*.txt").unwrap();

    assert!(e.check_path("secrets/a.txt", PathOperation::Read).is_hard_deny());
    // `*` does not cross directories.
    assert!(e.check_path("secrets/nested/a.txt", PathOperation::Read).allowed);

    e.add_blocked_pattern("vault/**").unwrap();
    assert!(
        e.check_path(dir.path().join("vault/x/y/z"), PathOperation::Read)
            .is_hard_deny()
    );

    e.add_blocked_pattern("data/file?.csv").unwrap();
    assert!(e.check_path("data/file1.csv", PathOperation::Read).is_hard_deny());
    assert!(e.check_path("data/file10.csv", PathOperation::Read).allowed);
}

#[test]
fn test_add_blocked_pattern_rejects_bad_glob() {
    let e = engine();
    assert!(matches!(
        e.add_blocked_pattern("a/[unclosed"),
        Err(PolicyError::InvalidGlob { .. })
    ));
}

#[test]
fn test_most_specific_directory_wins() {
    let (dir, e) = workspace();
    e.add_allowed_directory(DirectoryPermission::new("docs", &[PathOperation::Read]));

    assert!(e.check_path("docs/readme.md", PathOperation::Read).allowed);
    let decision = e.check_path("docs/readme.md", PathOperation::Write);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);

    // Sibling directories still fall under the workspace grant.
    assert!(
        e.check_path(dir.path().join("src/lib.rs"), PathOperation::Write)
            .allowed
    );
}

#[test]
fn test_non_recursive_directory() {
    let (_dir, e) = workspace();
    e.add_allowed_directory(
        DirectoryPermission::new("/opt/shared", &[PathOperation::Read]).non_recursive(),
    );
    assert!(e.check_path("/opt/shared/a.txt", PathOperation::Read).allowed);
    assert!(
        e.check_path("/opt/shared/sub/a.txt", PathOperation::Read)
            .requires_approval
    );
}

#[test]
fn test_path_outside_everything_escalates() {
    let (_dir, e) = workspace();
    let decision = e.check_path("/usr/lib/libc.so", PathOperation::Read);
    assert!(!decision.allowed);
    assert!(decision.requires_approval);
}

#[test]
fn test_check_path_is_idempotent() {
    let (_dir, e) = workspace();
    for (p, op) in [
        ("a/b.txt", PathOperation::Write),
        (".env", PathOperation::Read),
        ("/var/log/syslog", PathOperation::Read),
    ] {
        assert_eq!(e.check_path(p, op), e.check_path(p, op));
    }
}

#[cfg(unix)]
#[test]
fn test_symlink_escape_is_resolved() {
    let (dir, e) = workspace();
    let outside = TempDir::new_in("/var/tmp").or_else(|_| TempDir::new()).unwrap();
    let link = dir.path().join("escape");
    std::os::unix::fs::symlink(outside.path(), &link).unwrap();

    let decision = e.check_path("escape/file", PathOperation::Write);
    let resolved_outside = outside.path().canonicalize().unwrap();
    if resolved_outside.starts_with("/tmp") {
        // Both landed under /tmp, which is itself granted read/write.
        assert!(decision.reason.contains("/tmp"));
    } else {
        assert!(!decision.allowed, "{}", decision.reason);
    }
}

// ---------------------------------------------------------------------------
// Introspection
// ---------------------------------------------------------------------------

#[test]
fn test_config_snapshot_reflects_mutations() {
    let e = engine();
    e.add_safe_command(CommandDefinition::new("jq", RiskLevel::Low))
        .unwrap();
    e.add_blocked_pattern("**/*.sqlite").unwrap();

    let config = e.config();
    assert!(config.safe_commands.iter().any(|c| c.name == "jq"));
    assert!(config.blocked_patterns.iter().any(|p| p == "**/*.sqlite"));

    let rebuilt = PolicyEngine::new(config).unwrap();
    assert!(rebuilt.check_command("jq", &["."]).allowed);
}

#[test]
fn test_debug_does_not_dump_tables() {
    let rendered = format!("{:?}", engine());
    assert!(rendered.contains("safe_commands"));
    assert!(!rendered.contains("List directory contents"));
}
