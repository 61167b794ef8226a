use std::io::{Read, Write};

use crate::executor;
use crate::jobs::JobList;
use crate::shell::Shell;

const BUILTINS: &[&str] = &["exit", "cd", "jobs", "fg", "bg"];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

pub enum BuiltinAction {
    Continue(i32),
    /// `exit` ran; the shell must terminate successfully.
    Exit,
}

/// Run a builtin on the descriptors the pipeline wired for it. Builtins
/// execute inside the shell process and mutate shell state directly.
pub fn execute(
    shell: &Shell,
    jobs: &mut JobList,
    argv: &[String],
    _stdin: &mut dyn Read,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> BuiltinAction {
    match argv[0].as_str() {
        "exit" => BuiltinAction::Exit,
        "cd" => BuiltinAction::Continue(builtin_cd(argv, stderr)),
        "jobs" => BuiltinAction::Continue(builtin_jobs(jobs, stdout)),
        "fg" => BuiltinAction::Continue(builtin_fg(shell, jobs, argv, stderr)),
        "bg" => BuiltinAction::Continue(builtin_bg(jobs, argv, stderr)),
        other => {
            let _ = writeln!(stderr, "lsh: unknown builtin: {other}");
            BuiltinAction::Continue(1)
        }
    }
}

fn builtin_cd(argv: &[String], stderr: &mut dyn Write) -> i32 {
    let Some(target) = argv.get(1) else {
        let _ = writeln!(stderr, "cd: expected argument");
        return 1;
    };
    if let Err(err) = std::env::set_current_dir(target) {
        let _ = writeln!(stderr, "cd: {target}: {err}");
        return 1;
    }
    0
}

fn builtin_jobs(jobs: &mut JobList, stdout: &mut dyn Write) -> i32 {
    jobs.update_statuses();
    render_job_listing(jobs, stdout);
    jobs.cleanup();
    0
}

/// Print every job except the current one as `[id] <Status> <command>`.
fn render_job_listing(jobs: &JobList, stdout: &mut dyn Write) {
    let current = jobs.current_id();
    for job in jobs.iter() {
        if current == Some(job.id) {
            continue;
        }
        let _ = writeln!(stdout, "[{}] {} {}", job.id, job.display_status(), job.command);
    }
}

/// Pick the job `fg`/`bg` should act on: the current job when no id was
/// given, otherwise the job with that id.
fn select_job(
    jobs: &JobList,
    argv: &[String],
    name: &str,
    stderr: &mut dyn Write,
) -> Option<i32> {
    match argv.get(1) {
        None => {
            let current = jobs.current_id();
            if current.is_none() {
                let _ = writeln!(stderr, "{name}: no current job");
            }
            current
        }
        Some(argument) => {
            let found = argument
                .parse::<i32>()
                .ok()
                .and_then(|id| jobs.find_job(id))
                .map(|job| job.id);
            if found.is_none() {
                let _ = writeln!(stderr, "{name}: job with id {argument} not found");
            }
            found
        }
    }
}

fn builtin_fg(shell: &Shell, jobs: &mut JobList, argv: &[String], stderr: &mut dyn Write) -> i32 {
    let Some(id) = select_job(jobs, argv, "fg", stderr) else {
        return 1;
    };
    jobs.set_current(id);
    executor::set_job_in_foreground(shell, jobs, id, true);
    0
}

fn builtin_bg(jobs: &mut JobList, argv: &[String], stderr: &mut dyn Write) -> i32 {
    let Some(id) = select_job(jobs, argv, "bg", stderr) else {
        return 1;
    };
    executor::set_job_in_background(jobs, id, true);
    0
}
