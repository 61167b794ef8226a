use std::io;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

/// The signals a job-control shell ignores for itself and resets to the
/// default disposition in its children before exec.
pub const JOB_CONTROL_SIGNALS: [libc::c_int; 6] = [
    libc::SIGINT,
    libc::SIGQUIT,
    libc::SIGTSTP,
    libc::SIGTTIN,
    libc::SIGTTOU,
    libc::SIGCHLD,
];

/// One child state change reported by `waitid`.
#[derive(Debug, Clone, Copy)]
pub struct ChildEvent {
    pub pid: libc::pid_t,
    pub code: libc::c_int,
}

pub fn ignore_job_control_signals() -> io::Result<()> {
    for &signal in &JOB_CONTROL_SIGNALS {
        if unsafe { libc::signal(signal, libc::SIG_IGN) } == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn set_process_group(pid: libc::pid_t, pgid: libc::pid_t) -> io::Result<()> {
    loop {
        if unsafe { libc::setpgid(pid, pgid) } == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EINTR => continue,
            // Already exec'd or gone; the child-side setpgid won the race.
            Some(code) if code == libc::EACCES || code == libc::ESRCH => return Ok(()),
            _ => return Err(err),
        }
    }
}

pub fn send_continue_to_group(pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        if unsafe { libc::kill(-pgid, libc::SIGCONT) } == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

pub fn terminal_foreground_group(fd: RawFd) -> io::Result<libc::pid_t> {
    let pgid = unsafe { libc::tcgetpgrp(fd) };
    if pgid < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(pgid)
}

/// Hand the terminal's foreground slot to `pgid`. The shell keeps SIGTTOU
/// ignored for its whole lifetime, so this never stops the caller.
pub fn set_terminal_foreground(fd: RawFd, pgid: libc::pid_t) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "invalid process group id",
        ));
    }

    loop {
        if unsafe { libc::tcsetpgrp(fd, pgid) } == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

pub fn terminal_attributes(fd: RawFd) -> io::Result<libc::termios> {
    let mut attributes: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut attributes) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(attributes)
}

/// Apply terminal attributes after draining pending output.
pub fn set_terminal_attributes(fd: RawFd, attributes: &libc::termios) -> io::Result<()> {
    if unsafe { libc::tcsetattr(fd, libc::TCSADRAIN, attributes) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Duplicate a descriptor with CLOEXEC set, for use inside a child between
/// fork and exec (the terminal sits on fd 0, which may be dup2'd over by
/// then).
pub fn duplicate_for_child(fd: RawFd) -> io::Result<OwnedFd> {
    let duplicate = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 3) };
    if duplicate < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(duplicate) })
}

/// Block until any child changes state (exit or stop).
pub fn wait_next_event() -> io::Result<Option<ChildEvent>> {
    wait_event(libc::WEXITED | libc::WSTOPPED)
}

/// Non-blocking poll for any child state change, including continues.
pub fn poll_next_event() -> io::Result<Option<ChildEvent>> {
    wait_event(libc::WNOHANG | libc::WEXITED | libc::WSTOPPED | libc::WCONTINUED)
}

fn wait_event(options: libc::c_int) -> io::Result<Option<ChildEvent>> {
    loop {
        // si_pid must start at 0: with WNOHANG, waitid returns 0 without
        // touching the siginfo when no child has changed state.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        if unsafe { libc::waitid(libc::P_ALL, 0, &mut info, options) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }

        let pid = unsafe { info.si_pid() };
        if pid == 0 {
            return Ok(None);
        }
        return Ok(Some(ChildEvent {
            pid,
            code: info.si_code,
        }));
    }
}
