/// Best-effort SIGTERM to a child's whole process group. Children are
/// spawned with `process_group(0)`, so the negative pid addresses the
/// group the child leads. Failure (group already gone) is swallowed.
pub(crate) fn terminate_group(pid: i64) {
    if pid <= 0 {
        return;
    }
    unsafe {
        let _ = libc::kill(-(pid as libc::pid_t), libc::SIGTERM);
    }
}
