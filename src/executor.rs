use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::process::{Command, Stdio};

use os_pipe::{PipeReader, PipeWriter, pipe};

use crate::builtins;
use crate::job_control;
use crate::jobs::{JobList, ProcessStatus};
use crate::shell::Shell;

#[derive(Debug)]
pub enum ExecutionAction {
    Continue,
    /// The `exit` builtin ran; the REPL must terminate the shell.
    Exit,
}

// ── Descriptor wiring ──
//
// Each stage's three descriptors start from the rolling pipeline state
// (previous pipe read end, next pipe write end, inherited stderr) and are
// overridden by that stage's file redirections. Handles are owned values:
// moving one into a spawn or a builtin is what closes the shell's copy, so
// after start_job returns the shell holds nothing beyond 0/1/2.

enum InputHandle {
    Inherit,
    Pipe(PipeReader),
    File(File),
}

enum OutputHandle {
    Inherit,
    Pipe(PipeWriter),
    File(File),
}

impl InputHandle {
    fn into_stdio(self) -> Stdio {
        match self {
            InputHandle::Inherit => Stdio::inherit(),
            InputHandle::Pipe(reader) => Stdio::from(reader),
            InputHandle::File(file) => Stdio::from(file),
        }
    }

    fn into_reader(self) -> Box<dyn Read> {
        match self {
            InputHandle::Inherit => Box::new(io::stdin()),
            InputHandle::Pipe(reader) => Box::new(reader),
            InputHandle::File(file) => Box::new(file),
        }
    }
}

impl OutputHandle {
    fn into_stdio(self) -> Stdio {
        match self {
            OutputHandle::Inherit => Stdio::inherit(),
            OutputHandle::Pipe(writer) => Stdio::from(writer),
            OutputHandle::File(file) => Stdio::from(file),
        }
    }

    fn into_writer(self) -> Box<dyn Write> {
        match self {
            OutputHandle::Inherit => Box::new(io::stdout()),
            OutputHandle::Pipe(writer) => Box::new(writer),
            OutputHandle::File(file) => Box::new(file),
        }
    }

    fn into_error_writer(self) -> Box<dyn Write> {
        match self {
            OutputHandle::Inherit => Box::new(io::stderr()),
            OutputHandle::Pipe(writer) => Box::new(writer),
            OutputHandle::File(file) => Box::new(file),
        }
    }
}

fn open_input(path: &str) -> Result<InputHandle, String> {
    File::open(path)
        .map(InputHandle::File)
        .map_err(|err| format!("lsh: {path}: {err}"))
}

fn open_output(path: &str) -> Result<OutputHandle, String> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map(OutputHandle::File)
        .map_err(|err| format!("lsh: {path}: {err}"))
}

/// Launch a populated, unlaunched job: wire pipes and redirections stage by
/// stage, run builtins inline, fork externals into the job's process group,
/// then hand the job the terminal (foreground) or leave it alone
/// (background).
pub fn start_job(
    shell: &Shell,
    jobs: &mut JobList,
    job_id: i32,
    foreground: bool,
) -> ExecutionAction {
    if foreground {
        jobs.set_current(job_id);
    }

    let stage_count = jobs
        .find_job(job_id)
        .map(|job| job.processes.len())
        .unwrap_or(0);

    // Children in the foreground hand the terminal to their group before
    // exec; fd 0 may be a pipe by then, so they get their own dup.
    let child_terminal = if foreground {
        job_control::duplicate_for_child(shell.terminal).ok()
    } else {
        None
    };

    let mut next_stdin: Option<PipeReader> = None;
    for index in 0..stage_count {
        // A builtin earlier in this pipeline may have run cleanup and
        // erased the job itself; re-find it every stage.
        let (argv, redirect_in, redirect_out, redirect_err) = {
            let Some(job) = jobs.find_job(job_id) else {
                break;
            };
            let process = &job.processes[index];
            (
                process.argv.clone(),
                process.redirect_in.clone(),
                process.redirect_out.clone(),
                process.redirect_err.clone(),
            )
        };

        let stdin_default = next_stdin
            .take()
            .map(InputHandle::Pipe)
            .unwrap_or(InputHandle::Inherit);

        let (stdout_default, pending_reader) = if index + 1 < stage_count {
            match pipe() {
                Ok((reader, writer)) => (OutputHandle::Pipe(writer), Some(reader)),
                Err(err) => {
                    // A shell that cannot pipe cannot keep its descriptor
                    // invariants; give up.
                    eprintln!("lsh: failed to create pipe: {err}");
                    std::process::exit(1);
                }
            }
        } else {
            (OutputHandle::Inherit, None)
        };

        // Redirections beat pipe wiring; the replaced end is dropped here,
        // which is what gives the neighbour stage its EOF/EPIPE.
        let resolved: Result<(InputHandle, OutputHandle, OutputHandle), String> = (|| {
            let stdin = match &redirect_in {
                Some(path) => open_input(path)?,
                None => stdin_default,
            };
            let stdout = match &redirect_out {
                Some(path) => open_output(path)?,
                None => stdout_default,
            };
            let stderr = match &redirect_err {
                Some(path) => open_output(path)?,
                None => OutputHandle::Inherit,
            };
            Ok((stdin, stdout, stderr))
        })();

        let (stdin, stdout, stderr) = match resolved {
            Ok(handles) => handles,
            Err(message) => {
                eprintln!("{message}");
                mark_unlaunched_completed(jobs, job_id, index);
                break;
            }
        };

        if builtins::is_builtin(&argv[0]) {
            let mut reader = stdin.into_reader();
            let mut writer = stdout.into_writer();
            let mut error_writer = stderr.into_error_writer();
            let action = builtins::execute(
                shell,
                jobs,
                &argv,
                reader.as_mut(),
                writer.as_mut(),
                error_writer.as_mut(),
            );
            let _ = writer.flush();
            let _ = error_writer.flush();

            if let Some(job) = jobs.find_job_mut(job_id) {
                job.processes[index].status = ProcessStatus::Completed;
            }
            if matches!(action, builtins::BuiltinAction::Exit) {
                return ExecutionAction::Exit;
            }
        } else {
            let pgid = jobs.find_job(job_id).map(|job| job.pgid).unwrap_or(0);
            let terminal = child_terminal.as_ref().map(|fd| fd.as_raw_fd());

            let mut command = Command::new(&argv[0]);
            command
                .args(&argv[1..])
                .stdin(stdin.into_stdio())
                .stdout(stdout.into_stdio())
                .stderr(stderr.into_stdio());

            unsafe {
                use std::os::unix::process::CommandExt;
                command.pre_exec(move || {
                    // The first external stage creates the group; later
                    // stages join it.
                    let pid = libc::getpid();
                    let target = if pgid == 0 { pid } else { pgid };
                    if libc::setpgid(0, target) != 0 {
                        return Err(io::Error::last_os_error());
                    }
                    // Take the terminal while SIGTTOU is still inherited as
                    // ignored; after the reset below this would stop us.
                    if let Some(fd) = terminal {
                        if libc::tcsetpgrp(fd, target) != 0 {
                            return Err(io::Error::last_os_error());
                        }
                    }
                    for &signal in &job_control::JOB_CONTROL_SIGNALS {
                        if libc::signal(signal, libc::SIG_DFL) == libc::SIG_ERR {
                            return Err(io::Error::last_os_error());
                        }
                    }
                    Ok(())
                });
            }

            match command.spawn() {
                Ok(child) => {
                    let pid = child.id() as libc::pid_t;
                    // Both sides race to setpgid; either winning is enough.
                    let target = if pgid == 0 { pid } else { pgid };
                    if let Err(err) = job_control::set_process_group(pid, target) {
                        eprintln!("lsh: {}: failed to set process group: {err}", argv[0]);
                    }
                    if let Some(job) = jobs.find_job_mut(job_id) {
                        job.processes[index].pid = pid;
                        if job.pgid == 0 {
                            job.pgid = pid;
                        }
                    }
                    // The Child handle is dropped without waiting; waitid
                    // over the whole registry is the sole reaper.
                }
                Err(err) => {
                    report_spawn_error(&argv[0], &err);
                    if let Some(job) = jobs.find_job_mut(job_id) {
                        job.processes[index].status = ProcessStatus::Completed;
                    }
                }
            }
        }

        next_stdin = pending_reader;
    }
    drop(next_stdin);
    drop(child_terminal);

    let pgid = jobs.find_job(job_id).map(|job| job.pgid).unwrap_or(0);
    if pgid == 0 {
        // Every stage was a builtin; the job is already complete and never
        // owned the terminal.
        return ExecutionAction::Continue;
    }

    if foreground {
        set_job_in_foreground(shell, jobs, job_id, false);
    } else {
        set_job_in_background(jobs, job_id, false);
    }
    ExecutionAction::Continue
}

fn mark_unlaunched_completed(jobs: &mut JobList, job_id: i32, from: usize) {
    if let Some(job) = jobs.find_job_mut(job_id) {
        for process in job.processes.iter_mut().skip(from) {
            process.status = ProcessStatus::Completed;
        }
    }
}

fn report_spawn_error(program: &str, err: &io::Error) {
    if err.kind() == io::ErrorKind::NotFound {
        eprintln!("lsh: command not found: {program}");
    } else {
        eprintln!("lsh: {program}: {err}");
    }
}

/// Give the job the terminal and block until it completes or stops.
///
/// `send_continue` is set when resuming via `fg`: the job's saved terminal
/// modes are restored first and SIGCONT goes to the whole group.
pub fn set_job_in_foreground(
    shell: &Shell,
    jobs: &mut JobList,
    job_id: i32,
    send_continue: bool,
) {
    let (pgid, saved_tmodes) = match jobs.find_job(job_id) {
        Some(job) => (job.pgid, job.saved_tmodes),
        None => return,
    };
    if pgid == 0 {
        return;
    }

    if let Err(err) = job_control::set_terminal_foreground(shell.terminal, pgid) {
        eprintln!("lsh: failed to hand the terminal to job {job_id}: {err}");
    }

    if send_continue {
        if let Some(tmodes) = saved_tmodes {
            if let Err(err) = job_control::set_terminal_attributes(shell.terminal, &tmodes) {
                eprintln!("lsh: failed to restore job terminal modes: {err}");
            }
        }
        if let Err(err) = job_control::send_continue_to_group(pgid) {
            eprintln!("lsh: failed to continue job {job_id}: {err}");
        }
    }

    wait_for_job(jobs, job_id);

    if let Err(err) = job_control::set_terminal_foreground(shell.terminal, shell.pgid) {
        eprintln!("lsh: failed to reclaim the terminal: {err}");
    }
    match job_control::terminal_attributes(shell.terminal) {
        Ok(tmodes) => {
            if let Some(job) = jobs.find_job_mut(job_id) {
                job.saved_tmodes = Some(tmodes);
            }
        }
        Err(err) => eprintln!("lsh: failed to read terminal attributes: {err}"),
    }
    if let Err(err) = job_control::set_terminal_attributes(shell.terminal, &shell.attributes) {
        eprintln!("lsh: failed to restore shell terminal modes: {err}");
    }
}

/// Resume a job in the background. Never touches the terminal, never waits.
pub fn set_job_in_background(jobs: &JobList, job_id: i32, send_continue: bool) {
    let Some(job) = jobs.find_job(job_id) else {
        return;
    };
    if send_continue && job.pgid != 0 {
        if let Err(err) = job_control::send_continue_to_group(job.pgid) {
            eprintln!("lsh: failed to continue job {job_id}: {err}");
        }
    }
}

/// Blocking wait loop: fold exit/stop events into the registry until the
/// target job is completed or stopped. ECHILD ends the loop quietly; the
/// kernel auto-reaps children while SIGCHLD is ignored, and the poller's
/// forcing rule settles the bookkeeping afterwards.
fn wait_for_job(jobs: &mut JobList, job_id: i32) {
    loop {
        match job_control::wait_next_event() {
            Ok(Some(event)) => {
                jobs.apply_event(&event);
                let Some(job) = jobs.find_job(job_id) else {
                    break;
                };
                if job.is_completed() || job.is_stopped() {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                if err.raw_os_error() != Some(libc::ECHILD) {
                    eprintln!("lsh: failed to wait for job {job_id}: {err}");
                }
                break;
            }
        }
    }
}
