use std::path::Path;

use crate::config::Config;
use crate::error::{Diagnostic, Span};
use crate::evaluator::Evaluator;
use crate::events::EventLog;
use crate::script::ScriptSource;

/// Runs `source` as a script, reporting every logged event on stderr.
pub fn run(source: &str, filename: Option<&str>, config: Config) -> Diagnostic {
    let mut script = ScriptSource::from_text(source);
    execute(&mut script, filename, config)
}

/// Runs the script at `path`. A file that cannot be read fails before any
/// line runs.
pub fn run_file(path: &Path, config: Config) -> Diagnostic {
    let filename = path.display().to_string();
    match ScriptSource::from_file(path) {
        Ok(mut script) => execute(&mut script, Some(&filename), config),
        Err(error) => {
            let diagnostic = Diagnostic::from(error);
            eprintln!("{}", diagnostic);
            if let Some(log_path) = &config.event_log {
                let mut events = EventLog::new();
                events.record(&diagnostic, None, 0);
                save_events(&events, log_path);
            }
            diagnostic
        }
    }
}

fn execute(script: &mut ScriptSource, filename: Option<&str>, config: Config) -> Diagnostic {
    let log_path = config.event_log.clone();
    let mut evaluator = Evaluator::with_config(config);
    let outcome = evaluator.run_script(script);

    report_events(evaluator.events(), script.text(), filename);
    if let Some(log_path) = log_path {
        save_events(evaluator.events(), &log_path);
    }
    outcome
}

/// Renders each event against the whole script, shifting line-relative
/// spans to their position in the file.
pub fn report_events(events: &EventLog, source: &str, filename: Option<&str>) {
    for event in events.events() {
        let span = match event.diagnostic.span {
            Some(span) => Span::new(span.start + event.offset, span.end + event.offset),
            None => Span::single(event.offset),
        };
        event.diagnostic.clone().with_span(span).report(source, filename);
    }
}

fn save_events(events: &EventLog, path: &Path) {
    match events.save(path) {
        Ok(()) => tracing::debug!(path = %path.display(), events = events.len(), "event log written"),
        Err(error) => eprintln!("Error writing event log '{}': {}", path.display(), error),
    }
}
