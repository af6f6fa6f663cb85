use std::io::{self, Write};

use crate::config::Config;
use crate::error::{Code, Diagnostic};
use crate::evaluator::{Evaluator, Flow};
use crate::output::Output;
use crate::scope::{Container, ScopeStack};

/// Interactive session. Variables declared at the prompt live in `globals`,
/// which outlives the per-line scope stacks; blocks opened on one line do not
/// carry over to the next.
pub struct Session {
    evaluator: Evaluator,
    globals: Container,
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            evaluator: Evaluator::with_config(config),
            globals: Container::new(),
        }
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.evaluator = self.evaluator.with_output(output);
        self
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn globals(&self) -> &Container {
        &self.globals
    }

    pub fn eval_line(&mut self, line: &str) -> Flow {
        let mut scopes = match ScopeStack::delegated(&self.globals) {
            Ok(scopes) => scopes,
            Err(error) => return Flow::Continue(Diagnostic::from(error)),
        };
        scopes.push(true);
        self.evaluator.replace_scopes(scopes);
        self.evaluator.run_line(line)
    }

    /// Value worth showing after a line, if any.
    pub fn echo(flow: &Flow) -> Option<String> {
        let diagnostic = flow.diagnostic();
        if diagnostic.is_fatal() || diagnostic.code == Code::Nothing {
            return None;
        }
        diagnostic.value.is_some().then(|| diagnostic.value_string())
    }

    fn prompt(&self) -> &'static str {
        if self.evaluator.is_defining() {
            "... "
        } else {
            "> "
        }
    }
}

pub fn start(config: Config) {
    println!("chainlet {}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl+D to quit");
    println!();

    let mut session = Session::new(config);

    loop {
        print!("{}", session.prompt());
        if let Err(error) = io::stdout().flush() {
            eprintln!("Error writing prompt: {}", error);
            break;
        }

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => {
                println!();
                break;
            }
            Ok(_) => {
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                if matches!(line.trim(), "exit" | "quit") && !session.evaluator.is_defining() {
                    println!("Goodbye!");
                    break;
                }

                let flow = session.eval_line(line);
                let diagnostic = flow.diagnostic();
                if diagnostic.is_fatal() || diagnostic.is_warning() {
                    diagnostic.report(line, None);
                } else if let Some(echo) = Session::echo(&flow) {
                    session.evaluator.output().println(&echo);
                }
                // Each line's events were just reported.
                session.evaluator.events_mut().clear();
            }
            Err(error) => {
                eprintln!("Error reading input: {}", error);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Payload;

    fn session() -> Session {
        Session::new(Config::default().keep_going()).with_output(Output::buffer())
    }

    #[test]
    fn globals_persist_between_lines() {
        let mut session = session();
        assert!(!session.eval_line("var total = 40").diagnostic().is_fatal());
        let flow = session.eval_line("total + 2");
        assert_eq!(Session::echo(&flow).as_deref(), Some("42"));
        assert!(session.globals().contains("total"));
    }

    #[test]
    fn blocks_do_not_outlive_their_line() {
        let mut session = session();
        session.eval_line("{");
        session.eval_line("var inner = 1");
        // The block was dropped with the previous line's stack.
        assert!(session.globals().contains("inner"));
        assert!(session.eval_line("}").diagnostic().is_fatal());
    }

    #[test]
    fn functions_span_several_prompts() {
        let mut session = session();
        session.eval_line("def twice(n)");
        assert_eq!(session.prompt(), "... ");
        session.eval_line("return n * 2");
        session.eval_line("end");
        assert_eq!(session.prompt(), "> ");

        let flow = session.eval_line("twice(21)");
        let value = flow.diagnostic().value.clone().expect("value");
        assert_eq!(value.payload(), Ok(Payload::Int(42)));
    }

    #[test]
    fn fatal_lines_are_not_echoed() {
        let mut session = session();
        let flow = session.eval_line("missing + 1");
        assert!(flow.diagnostic().is_fatal());
        assert_eq!(Session::echo(&flow), None);
        assert_eq!(session.evaluator().events().fatal_count(), 1);
    }

    #[test]
    fn print_goes_to_the_session_output() {
        let mut session = session();
        let flow = session.eval_line("print(\"hi\", 3)");
        assert_eq!(session.evaluator().output().captured(), "hi 3\n");
        assert_eq!(Session::echo(&flow), None);
    }
}
