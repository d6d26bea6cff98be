//! Seccomp profile for sandbox containers.
//!
//! Default-allow with a deny-list. The runtime's own default profile already
//! blocks a long tail of syscalls; this list re-states the ones that matter
//! most for escape and escalation so they stay blocked even on a runtime
//! configured with a looser default.

use serde_json::{Value, json};

/// Syscalls that fail with `EPERM` inside the sandbox.
pub const BLOCKED_SYSCALLS: &[&str] = &[
    // Namespaces
    "unshare",
    "setns",
    // Kernel modules
    "init_module",
    "finit_module",
    "delete_module",
    // Tracing and cross-process memory
    "ptrace",
    "process_vm_readv",
    "process_vm_writev",
    // Filesystem namespace
    "mount",
    "umount",
    "umount2",
    "pivot_root",
    "chroot",
    // Kernel replacement and power
    "reboot",
    "kexec_load",
    "kexec_file_load",
    // Swap
    "swapon",
    "swapoff",
    // Kernel attack surface
    "bpf",
    "perf_event_open",
    "userfaultfd",
    "keyctl",
    "add_key",
    "request_key",
    // Clock
    "settimeofday",
    "clock_settime",
    "adjtimex",
];

/// Errno returned for blocked syscalls (`EPERM`).
const EPERM: u32 = 1;

/// Build the profile as a JSON document.
#[must_use]
pub fn profile() -> Value {
    json!({
        "defaultAction": "SCMP_ACT_ALLOW",
        "architectures": ["SCMP_ARCH_X86_64", "SCMP_ARCH_X86", "SCMP_ARCH_AARCH64"],
        "syscalls": [{
            "names": BLOCKED_SYSCALLS,
            "action": "SCMP_ACT_ERRNO",
            "errnoRet": EPERM,
        }],
    })
}

/// The profile serialized for the runtime.
#[must_use]
pub fn profile_json() -> String {
    profile().to_string()
}
