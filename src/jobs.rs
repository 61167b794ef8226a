use crate::job_control::{self, ChildEvent};
use crate::parser;

/// The lifecycle state of one process inside a job.
///
/// Transitions are driven solely by `waitid` results; `Completed` and
/// `Terminated` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Stopped,
    Completed,
    Terminated,
}

impl ProcessStatus {
    fn from_si_code(code: libc::c_int) -> Option<ProcessStatus> {
        match code {
            libc::CLD_EXITED => Some(ProcessStatus::Completed),
            libc::CLD_KILLED | libc::CLD_DUMPED => Some(ProcessStatus::Terminated),
            libc::CLD_STOPPED => Some(ProcessStatus::Stopped),
            libc::CLD_CONTINUED => Some(ProcessStatus::Running),
            _ => None,
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, ProcessStatus::Completed | ProcessStatus::Terminated)
    }
}

/// One pipeline stage at runtime. `pid` stays 0 until the stage is forked;
/// builtin stages never fork and keep it at 0.
#[derive(Debug)]
pub struct Process {
    pub argv: Vec<String>,
    pub redirect_in: Option<String>,
    pub redirect_out: Option<String>,
    pub redirect_err: Option<String>,
    pub pid: libc::pid_t,
    pub status: ProcessStatus,
}

impl Process {
    fn from_spec(spec: parser::ProcessSpec) -> Process {
        Process {
            argv: spec.argv,
            redirect_in: spec.redirect_in,
            redirect_out: spec.redirect_out,
            redirect_err: spec.redirect_err,
            pid: 0,
            status: ProcessStatus::Running,
        }
    }
}

/// One submitted pipeline sharing a process group.
///
/// `pgid` stays 0 until the first external child establishes the group; an
/// all-builtin job never acquires one.
pub struct Job {
    pub id: i32,
    pub pgid: libc::pid_t,
    pub processes: Vec<Process>,
    pub command: String,
    pub saved_tmodes: Option<libc::termios>,
}

impl Job {
    pub fn is_completed(&self) -> bool {
        self.processes.iter().all(|p| p.status.is_terminal())
    }

    pub fn is_stopped(&self) -> bool {
        self.processes
            .iter()
            .all(|p| p.status != ProcessStatus::Running)
    }

    pub fn is_terminated(&self) -> bool {
        self.processes
            .iter()
            .all(|p| p.status == ProcessStatus::Terminated)
    }

    pub fn display_status(&self) -> &'static str {
        if self.is_terminated() {
            "Terminated"
        } else if self.is_completed() {
            "Completed"
        } else if self.is_stopped() {
            "Stopped"
        } else {
            "Running"
        }
    }
}

/// Ordered registry of live jobs plus the current-job slot targeted by
/// bare `fg`/`bg`.
pub struct JobList {
    jobs: Vec<Job>,
    next_id: i32,
    current: Option<i32>,
}

impl Default for JobList {
    fn default() -> Self {
        Self::new()
    }
}

impl JobList {
    pub fn new() -> JobList {
        JobList {
            jobs: Vec::new(),
            next_id: 1,
            current: None,
        }
    }

    /// Append a new job built from a parsed command. Ids are monotonic and
    /// never reused within a shell lifetime.
    pub fn create_job(&mut self, command_line: &str, command: parser::Command) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            pgid: 0,
            processes: command.pipeline.into_iter().map(Process::from_spec).collect(),
            command: command_line.to_string(),
            saved_tmodes: None,
        });
        id
    }

    pub fn find_job(&self, id: i32) -> Option<&Job> {
        self.jobs.iter().find(|job| job.id == id)
    }

    pub fn find_job_mut(&mut self, id: i32) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|job| job.id == id)
    }

    pub fn find_process_mut(&mut self, pid: libc::pid_t) -> Option<&mut Process> {
        self.jobs
            .iter_mut()
            .flat_map(|job| job.processes.iter_mut())
            .find(|process| process.pid == pid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    pub fn current_id(&self) -> Option<i32> {
        self.current
    }

    pub fn set_current(&mut self, id: i32) {
        self.current = Some(id);
    }

    /// Route one child state change to the owning process. Events for pids
    /// the shell never spawned (or for already-reaped stages) are dropped.
    pub fn apply_event(&mut self, event: &ChildEvent) {
        let Some(process) = self.find_process_mut(event.pid) else {
            return;
        };
        if process.status.is_terminal() {
            return;
        }
        if let Some(status) = ProcessStatus::from_si_code(event.code) {
            process.status = status;
        }
    }

    /// Drain pending child events without blocking and fold them into the
    /// registry. ECHILD means the kernel has no memory of our children any
    /// more, so everything still outstanding is forced to Completed.
    pub fn update_statuses(&mut self) {
        loop {
            match job_control::poll_next_event() {
                Ok(Some(event)) => self.apply_event(&event),
                Ok(None) => break,
                Err(err) => {
                    if err.raw_os_error() == Some(libc::ECHILD) {
                        self.mark_all_reaped();
                    } else {
                        eprintln!("lsh: failed to poll child processes: {err}");
                    }
                    break;
                }
            }
        }
    }

    pub fn mark_all_reaped(&mut self) {
        for job in &mut self.jobs {
            for process in &mut job.processes {
                if process.status != ProcessStatus::Terminated {
                    process.status = ProcessStatus::Completed;
                }
            }
        }
    }

    /// Erase every completed job, printing its status line at erasure. The
    /// current slot moves to the registry tail only when the job it pointed
    /// at was just erased.
    pub fn cleanup(&mut self) {
        let current = self.current;
        let mut current_erased = false;
        self.jobs.retain(|job| {
            if !job.is_completed() {
                return true;
            }
            println!("[{}] {} {}", job.id, job.display_status(), job.command);
            if current == Some(job.id) {
                current_erased = true;
            }
            false
        });
        if current_erased {
            self.current = self.jobs.last().map(|job| job.id);
        }
    }
}
