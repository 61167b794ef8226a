mod builtins;
mod executor;
mod job_control;
mod jobs;
mod parser;
mod shell;

#[cfg(not(unix))]
compile_error!("lsh requires a Unix-like system with POSIX job control");

use std::io::{self, Write};

use crossterm::style::{Color, Stylize};

use crate::jobs::JobList;
use crate::shell::Shell;

const PROMPT_NAME_COLOR: Color = Color::Rgb { r: 22, g: 198, b: 12 };
const PROMPT_CWD_COLOR: Color = Color::Rgb { r: 56, g: 114, b: 242 };

fn print_prompt() {
    let cwd = std::env::current_dir()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| String::from("<unknown>"));
    print!(
        "{} {}$ ",
        "lsh".with(PROMPT_NAME_COLOR),
        cwd.with(PROMPT_CWD_COLOR)
    );
    let _ = io::stdout().flush();
}

fn main() {
    let shell = match Shell::initialise() {
        Ok(shell) => shell,
        Err(err) => {
            eprintln!("lsh: {err}");
            std::process::exit(1);
        }
    };

    let mut jobs = JobList::new();
    let stdin = io::stdin();

    loop {
        // Reap whatever changed state since the last prompt and retire
        // finished jobs before showing a new prompt.
        jobs.update_statuses();
        jobs.cleanup();

        print_prompt();

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                eprintln!("lsh: failed to read input: {err}");
                break;
            }
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let command = match parser::parse(input) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("lsh: {err}");
                continue;
            }
        };

        let foreground = command.foreground;
        let job_id = jobs.create_job(input, command);
        match executor::start_job(&shell, &mut jobs, job_id, foreground) {
            executor::ExecutionAction::Continue => {}
            executor::ExecutionAction::Exit => std::process::exit(0),
        }
    }

    std::process::exit(0);
}
