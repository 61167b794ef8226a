use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

use crate::job_control;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("not running on a terminal; only interactive mode is supported")]
    NotInteractive,
    #[error("failed to reach the terminal foreground group: {0}")]
    Foreground(#[source] io::Error),
    #[error("failed to install signal dispositions: {0}")]
    Signals(#[source] io::Error),
    #[error("failed to create the shell process group: {0}")]
    ProcessGroup(#[source] io::Error),
    #[error("failed to configure the terminal: {0}")]
    Terminal(#[source] io::Error),
}

/// The shell's own identity on the controlling terminal: which fd the
/// terminal is, which process group owns the shell, and the terminal
/// attributes to restore after every foreground job.
pub struct Shell {
    pub terminal: RawFd,
    pub pid: libc::pid_t,
    pub pgid: libc::pid_t,
    pub attributes: libc::termios,
}

impl Shell {
    /// Claim the controlling terminal for interactive job control.
    ///
    /// Waits (via SIGTTIN) until the shell's group is the terminal's
    /// foreground group, ignores the interactive signals, moves the shell
    /// into its own process group, takes the terminal, and snapshots its
    /// attributes.
    pub fn initialise() -> Result<Shell, ShellError> {
        let terminal = libc::STDIN_FILENO;
        if unsafe { libc::isatty(terminal) } != 1 {
            return Err(ShellError::NotInteractive);
        }

        // Loop until our group owns the terminal; until then every SIGTTIN
        // stops us behind the real foreground job.
        loop {
            let pgid = unsafe { libc::getpgrp() };
            let owner =
                job_control::terminal_foreground_group(terminal).map_err(ShellError::Foreground)?;
            if owner == pgid {
                break;
            }
            unsafe {
                libc::kill(-pgid, libc::SIGTTIN);
            }
        }

        job_control::ignore_job_control_signals().map_err(ShellError::Signals)?;

        let pid = unsafe { libc::getpid() };
        if unsafe { libc::setpgid(pid, pid) } != 0 {
            let err = io::Error::last_os_error();
            // A session leader (e.g. on a freshly opened terminal) already
            // owns its group and gets EPERM here.
            let already_leader = err.raw_os_error() == Some(libc::EPERM)
                && unsafe { libc::getpgrp() } == pid;
            if !already_leader {
                return Err(ShellError::ProcessGroup(err));
            }
        }

        job_control::set_terminal_foreground(terminal, pid).map_err(ShellError::Terminal)?;
        let attributes =
            job_control::terminal_attributes(terminal).map_err(ShellError::Terminal)?;

        Ok(Shell {
            terminal,
            pid,
            pgid: pid,
            attributes,
        })
    }
}
