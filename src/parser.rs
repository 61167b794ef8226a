use std::fmt;

use thiserror::Error;

/// One stage of a pipeline: the command words plus its file redirections.
///
/// Absent redirection fields mean "inherit whatever descriptor the pipeline
/// wiring provides".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub redirect_in: Option<String>,
    pub redirect_out: Option<String>,
    pub redirect_err: Option<String>,
}

/// A fully parsed command line: a pipeline and its foreground flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub pipeline: Vec<ProcessSpec>,
    pub foreground: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("syntax error")]
pub struct ParseError;

#[derive(Debug, PartialEq, Eq)]
enum Token {
    /// End of input, or a byte the lexer cannot start a token from.
    None,
    Str(String),
    Pipe,
    Amp,
    RedirectIn,
    RedirectOut,
    RedirectErr,
}

fn is_blank(c: char) -> bool {
    (c as u32) <= 32
}

fn is_string_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '/' | '%' | '-' | '_')
}

/// Scan one token off the front of `input`, returning it with the rest of
/// the line.
///
/// A string token is a maximal run of string characters with optional
/// quoted regions; a quote is closed only by the matching quote character
/// and delimiter quotes are stripped from the value. An unterminated quote
/// runs to the end of the input.
fn next_token(input: &str) -> (Token, &str) {
    let input = input.trim_start_matches(is_blank);
    if input.is_empty() {
        return (Token::None, input);
    }

    // `2>` must be tried before `>`.
    if let Some(rest) = input.strip_prefix('|') {
        return (Token::Pipe, rest);
    }
    if let Some(rest) = input.strip_prefix('&') {
        return (Token::Amp, rest);
    }
    if let Some(rest) = input.strip_prefix("2>") {
        return (Token::RedirectErr, rest);
    }
    if let Some(rest) = input.strip_prefix('>') {
        return (Token::RedirectOut, rest);
    }
    if let Some(rest) = input.strip_prefix('<') {
        return (Token::RedirectIn, rest);
    }

    let mut value = String::new();
    let mut quote: Option<char> = None;
    let mut end = input.len();
    for (idx, c) in input.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else {
                value.push(c);
            }
            continue;
        }
        if c == '"' || c == '\'' {
            quote = Some(c);
            continue;
        }
        if is_string_char(c) {
            value.push(c);
            continue;
        }
        end = idx;
        break;
    }

    if end == 0 {
        return (Token::None, input);
    }
    (Token::Str(value), &input[end..])
}

/// Parse a command line into a pipeline.
///
/// Grammar (lookahead 1):
///
/// ```text
/// Command  := Pipeline [ AMP ]
/// Pipeline := ProcSpec ( PIPE ProcSpec )*
/// ProcSpec := STRING+ Redir*
/// Redir    := (REDIR_IN | REDIR_OUT | REDIR_ERR) STRING
/// ```
pub fn parse(input: &str) -> Result<Command, ParseError> {
    let mut rest = input;
    let mut pipeline = Vec::new();
    loop {
        let (spec, after) = parse_process(rest)?;
        pipeline.push(spec);
        rest = after;

        let (token, after_pipe) = next_token(rest);
        if token != Token::Pipe {
            break;
        }
        rest = after_pipe;
    }

    let (token, _) = next_token(rest);
    Ok(Command {
        pipeline,
        foreground: token != Token::Amp,
    })
}

fn parse_process(mut rest: &str) -> Result<(ProcessSpec, &str), ParseError> {
    let mut argv = Vec::new();
    loop {
        let (token, after) = next_token(rest);
        match token {
            Token::Str(value) => {
                argv.push(value);
                rest = after;
            }
            _ => break,
        }
    }

    if argv.is_empty() {
        return Err(ParseError);
    }

    let mut spec = ProcessSpec {
        argv,
        redirect_in: None,
        redirect_out: None,
        redirect_err: None,
    };

    loop {
        let (token, after) = next_token(rest);
        let slot = match token {
            Token::RedirectIn => &mut spec.redirect_in,
            Token::RedirectOut => &mut spec.redirect_out,
            Token::RedirectErr => &mut spec.redirect_err,
            _ => break,
        };

        let (target, after_target) = next_token(after);
        let Token::Str(path) = target else {
            return Err(ParseError);
        };
        // Last writer wins for repeated redirections of the same kind.
        *slot = Some(path);
        rest = after_target;
    }

    Ok((spec, rest))
}

/// Re-quote an argument so the canonical printer round-trips through the
/// lexer. Arguments made purely of string characters are emitted bare;
/// everything else is wrapped in double quotes, with embedded double quotes
/// carried in single-quoted regions.
fn quote_argument(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_string_char) {
        return arg.to_string();
    }

    let mut out = String::new();
    let mut rest = arg;
    while let Some(pos) = rest.find('"') {
        if pos > 0 {
            out.push('"');
            out.push_str(&rest[..pos]);
            out.push('"');
        }
        out.push_str("'\"'");
        rest = &rest[pos + 1..];
    }
    if !rest.is_empty() || out.is_empty() {
        out.push('"');
        out.push_str(rest);
        out.push('"');
    }
    out
}

impl fmt::Display for ProcessSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arg in &self.argv {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(&quote_argument(arg))?;
            first = false;
        }
        if let Some(path) = &self.redirect_in {
            write!(f, " < {}", quote_argument(path))?;
        }
        if let Some(path) = &self.redirect_out {
            write!(f, " > {}", quote_argument(path))?;
        }
        if let Some(path) = &self.redirect_err {
            write!(f, " 2> {}", quote_argument(path))?;
        }
        Ok(())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for spec in &self.pipeline {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{spec}")?;
            first = false;
        }
        if !self.foreground {
            f.write_str(" &")?;
        }
        Ok(())
    }
}
