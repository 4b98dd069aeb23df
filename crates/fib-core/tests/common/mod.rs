//! Test fixtures for end-to-end scenarios (base spec §8).
//!
//! `fib_core::netlink::connection::Connection` always opens a socket in the
//! calling thread's network namespace (SPEC_FULL.md §4.2 dropped the
//! teacher's per-socket namespace constructors, since VRF separation here is
//! by table id, not netns). To still isolate these tests from the host's
//! main table, [`TestNamespace`] creates a throwaway namespace and
//! [`TestNamespace::enter`] moves the whole test thread into it with
//! `setns(2)` before any `Connection` is opened.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

static NAMESPACE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_ns_name(prefix: &str) -> String {
    let id = NAMESPACE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let pid = std::process::id();
    format!("fibsyncd-test-{prefix}-{pid}-{id}")
}

/// A throwaway network namespace, deleted on drop.
pub struct TestNamespace {
    name: String,
}

impl TestNamespace {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let name = unique_ns_name(prefix);
        let status = Command::new("ip").args(["netns", "add", &name]).status()?;
        if !status.success() {
            return Err(io::Error::other(format!("ip netns add {name} failed")));
        }
        Ok(Self { name })
    }

    /// Move the calling thread into this namespace. Restores the original
    /// namespace when the returned guard drops.
    pub fn enter(&self) -> io::Result<NamespaceGuard> {
        let original = File::open("/proc/self/ns/net")?;
        let target = File::open(format!("/var/run/netns/{}", self.name))?;
        // SAFETY: both fds are valid open namespace files; CLONE_NEWNET
        // restricts the switch to the network namespace.
        let ret = unsafe { libc::setns(target.as_raw_fd(), libc::CLONE_NEWNET) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(NamespaceGuard { original })
    }

    /// Run a command inside the namespace via `ip netns exec` (used for
    /// setup/assertions that don't go through fib-core itself, e.g.
    /// creating the dummy interface a test route points at).
    pub fn exec(&self, cmd: &str, args: &[&str]) -> io::Result<String> {
        let output = Command::new("ip")
            .args(["netns", "exec", &self.name, cmd])
            .args(args)
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{cmd} {args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Drop for TestNamespace {
    fn drop(&mut self) {
        let _ = Command::new("ip").args(["netns", "del", &self.name]).status();
    }
}

/// Restores the namespace that was active before [`TestNamespace::enter`].
pub struct NamespaceGuard {
    original: File,
}

impl Drop for NamespaceGuard {
    fn drop(&mut self) {
        unsafe {
            libc::setns(self.original.as_raw_fd(), libc::CLONE_NEWNET);
        }
    }
}

pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root or `ip netns` isn't usable.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("skipping: requires root");
            return;
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_names_are_unique() {
        assert_ne!(unique_ns_name("a"), unique_ns_name("a"));
    }
}
