//! Execution half of the interpreter.
//!
//! The [`Evaluator`] owns the interpreter context: the builtin registry, the
//! scope stack of the running evaluation, the event log and the print
//! destination. Lines are parsed into an operator tree and the tree is walked
//! depth-first, left operand before right, so every builtin runs after the
//! builtins producing its arguments.

use std::collections::BTreeSet;
use std::rc::Rc;

use crate::ast::{Node, Statement, Target};
use crate::builtins::register_defaults;
use crate::config::Config;
use crate::error::{Code, Diagnostic, ObjectError, Span};
use crate::events::EventLog;
use crate::lexer::tokenize;
use crate::output::Output;
use crate::parser::parse_line;
use crate::registry::{Entry, Registry, Tier};
use crate::scope::{Container, ScopeStack};
use crate::script::{Line, ScriptSource};
use crate::value::{Mode, Object, Payload};

/// What a line asks the driver to do next.
#[derive(Debug)]
pub enum Flow {
    Continue(Diagnostic),
    /// `return` ended the current function body or script.
    Return(Diagnostic),
}

impl Flow {
    pub fn diagnostic(&self) -> &Diagnostic {
        match self {
            Flow::Continue(diagnostic) | Flow::Return(diagnostic) => diagnostic,
        }
    }

    pub fn into_diagnostic(self) -> Diagnostic {
        match self {
            Flow::Continue(diagnostic) | Flow::Return(diagnostic) => diagnostic,
        }
    }
}

/// User function collected from a `def` ... `end` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
}

/// Resolves a variable by value: a fresh owned copy marked for delivery, so
/// the consumer can move out of it. Host-owned values are shared instead.
pub fn load(object: &Object) -> Result<Object, ObjectError> {
    let target = object.deref()?;
    if target.mode() == Mode::ExternalOwned {
        return Ok(target);
    }
    let payload = target.with_payload(Payload::deep_copy)?;
    let copy = Object::owning(payload, target.type_id());
    copy.set_delivering();
    Ok(copy)
}

/// Takes ownership of a value for a new binding, moving when the value was
/// marked for delivery and copying otherwise.
pub fn adopt(value: &Object) -> Result<Object, ObjectError> {
    let target = value.deref()?;
    if target.mode() == Mode::ExternalOwned {
        return Ok(target);
    }
    let type_id = target.type_id();
    let (payload, delivery) = value.deliver()?;
    tracing::trace!(?delivery, %type_id, "value adopted");
    Ok(Object::owning(payload, type_id))
}

fn temporary(payload: Payload) -> Object {
    let object = Object::new(payload);
    object.set_delivering();
    object
}

/// A struct must never be stored, directly or through other values, inside
/// one of its own member containers.
fn reject_self_containment(
    reachable: &[Container],
    holder: Option<&Container>,
    slot: Option<&Object>,
    span: Span,
) -> Result<(), Diagnostic> {
    let cyclic = reachable.iter().any(|container| {
        holder.is_some_and(|holder| holder.ptr_eq(container))
            || slot.is_some_and(|slot| container.holds(slot))
    });
    if cyclic {
        return Err(Diagnostic::fatal(
            Code::IllegalParam,
            "A struct cannot be stored inside itself",
        )
        .with_span(span));
    }
    Ok(())
}

fn not_found(name: &str, span: Span) -> Diagnostic {
    Diagnostic::fatal(Code::NotFound, format!("Undefined variable '{}'", name)).with_span(span)
}

fn at_span(span: Span) -> impl Fn(ObjectError) -> Diagnostic {
    move |error| Diagnostic::from(error).with_span(span)
}

pub struct Evaluator {
    registry: Registry,
    scopes: ScopeStack,
    events: EventLog,
    output: Output,
    config: Config,
    call_depth: usize,
    /// Scope depth of the innermost function frame; `}` cannot pop below it.
    frame_floor: usize,
    /// Function whose body lines are being collected.
    pending: Option<Function>,
    /// Line number and byte offset of the line being run, for the event log.
    line: Option<usize>,
    offset: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let mut registry = Registry::new();
        if let Err(error) = register_defaults(&mut registry) {
            tracing::error!(%error, "failed to install default entries");
        }
        Self {
            registry,
            scopes: ScopeStack::new(),
            events: EventLog::new(),
            output: Output::default(),
            config,
            call_depth: 0,
            frame_floor: 1,
            pending: None,
            line: None,
            offset: 0,
        }
    }

    pub fn with_output(mut self, output: Output) -> Self {
        self.output = output;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn scopes(&self) -> &ScopeStack {
        &self.scopes
    }

    /// Installs `scopes` for the following lines, returning the previous stack.
    pub fn replace_scopes(&mut self, scopes: ScopeStack) -> ScopeStack {
        std::mem::replace(&mut self.scopes, scopes)
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventLog {
        &mut self.events
    }

    pub fn output(&self) -> &Output {
        &self.output
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// True while a `def` block is waiting for its `end`.
    pub fn is_defining(&self) -> bool {
        self.pending.is_some()
    }

    fn record(&mut self, diagnostic: &Diagnostic) {
        self.events.record(diagnostic, self.line, self.offset);
    }

    /// Parses and runs one source line. Fatal outcomes of top-level lines are
    /// recorded in the event log; nested calls leave that to their caller.
    pub fn run_line(&mut self, source: &str) -> Flow {
        let flow = self.step(source).unwrap_or_else(Flow::Continue);
        if self.call_depth == 0 && flow.diagnostic().is_fatal() {
            let diagnostic = flow.diagnostic().clone();
            self.record(&diagnostic);
        }
        flow
    }

    fn step(&mut self, source: &str) -> Result<Flow, Diagnostic> {
        if self.pending.is_some() {
            return self.collect_body(source);
        }
        match parse_line(source, &self.registry)? {
            Some(statement) => self.execute_statement(statement),
            None => Ok(Flow::Continue(Diagnostic::nothing())),
        }
    }

    fn collect_body(&mut self, source: &str) -> Result<Flow, Diagnostic> {
        let tokens = tokenize(source)?;
        match tokens.first() {
            Some(first) if first.is("end") && tokens.len() == 1 => {
                if let Some(function) = self.pending.take() {
                    self.define(function)?;
                }
            }
            Some(first) if first.is("def") => {
                self.pending = None;
                return Err(Diagnostic::fatal(
                    Code::IllegalSymbol,
                    "Function definitions cannot be nested",
                )
                .with_span(first.span));
            }
            _ => {
                if let Some(function) = self.pending.as_mut() {
                    function.body.push(source.to_string());
                }
            }
        }
        Ok(Flow::Continue(Diagnostic::nothing()))
    }

    fn define(&mut self, function: Function) -> Result<(), Diagnostic> {
        if let Some(existing) = self.registry.resolve(&function.name) {
            if existing.tier() != Tier::Plugin {
                return Err(Diagnostic::fatal(
                    Code::Redeclared,
                    format!("Cannot redefine builtin '{}'", function.name),
                ));
            }
        }
        tracing::debug!(name = %function.name, params = function.params.len(), lines = function.body.len(), "function defined");

        let name = function.name.clone();
        let function = Rc::new(function);
        self.registry.register(Entry::plugin(name, move |evaluator, args| {
            Box::new(evaluator.call_function(&function, args))
        }))?;
        Ok(())
    }

    pub fn execute_statement(&mut self, statement: Statement) -> Result<Flow, Diagnostic> {
        match statement {
            Statement::Declare { name, value, span } => {
                let value = self.evaluate(&value)?;
                let owned = adopt(&value).map_err(at_span(span))?;
                if !self.scopes.create(&name, owned) {
                    return Err(Diagnostic::fatal(
                        Code::Redeclared,
                        format!("Variable '{}' is already declared in this scope", name),
                    )
                    .with_span(span));
                }
                Ok(Flow::Continue(Diagnostic::success()))
            }
            Statement::Bind { name, target, span } => {
                let found = self.find_target(&target)?;
                if !self.scopes.create(&name, Object::reference(&found)) {
                    return Err(Diagnostic::fatal(
                        Code::Redeclared,
                        format!("Variable '{}' is already declared in this scope", name),
                    )
                    .with_span(span));
                }
                Ok(Flow::Continue(Diagnostic::success()))
            }
            Statement::Assign { target, value, .. } => {
                let value = self.evaluate(&value)?;
                self.assign(&target, &value)?;
                Ok(Flow::Continue(Diagnostic::success()))
            }
            Statement::Return { value, span } => {
                let Some(value) = value else {
                    return Ok(Flow::Return(Diagnostic::nothing().with_value(Object::null())));
                };
                let value = self.evaluate(&value)?;
                let owned = adopt(&value).map_err(at_span(span))?;
                owned.set_delivering();
                Ok(Flow::Return(Diagnostic::with_object(owned)))
            }
            Statement::Dispose { name, span } => {
                if !self.scopes.dispose(&name) {
                    return Err(not_found(&name, span));
                }
                Ok(Flow::Continue(Diagnostic::success()))
            }
            Statement::OpenScope { .. } => {
                self.scopes.push(true);
                Ok(Flow::Continue(Diagnostic::nothing()))
            }
            Statement::CloseScope { span } => {
                if self.scopes.depth() <= self.frame_floor || !self.scopes.pop() {
                    return Err(Diagnostic::fatal(
                        Code::IllegalSymbol,
                        "Unbalanced block: '}' without matching '{'",
                    )
                    .with_span(span));
                }
                Ok(Flow::Continue(Diagnostic::nothing()))
            }
            Statement::Define { name, params, span } => {
                if self.call_depth > 0 {
                    return Err(Diagnostic::fatal(
                        Code::IllegalSymbol,
                        "Function definitions cannot be nested",
                    )
                    .with_span(span));
                }
                let mut seen = BTreeSet::new();
                if let Some(duplicate) = params.iter().find(|param| !seen.insert(param.as_str())) {
                    return Err(Diagnostic::fatal(
                        Code::Redeclared,
                        format!("Parameter '{}' is declared twice", duplicate),
                    )
                    .with_span(span));
                }
                self.pending = Some(Function {
                    name,
                    params,
                    body: Vec::new(),
                });
                Ok(Flow::Continue(Diagnostic::nothing()))
            }
            Statement::End { span } => Err(Diagnostic::fatal(
                Code::IllegalSymbol,
                "'end' without matching 'def'",
            )
            .with_span(span)),
            Statement::Expression { expr } => {
                self.registry.begin_evaluation();
                let result = self.evaluate_root(&expr);
                self.registry.end_evaluation();
                result.map(Flow::Continue)
            }
        }
    }

    fn find_target(&self, target: &Target) -> Result<Object, Diagnostic> {
        let found = match &target.domain {
            Some(domain) => self.scopes.find_in_domain(&target.name, domain),
            None => self.scopes.find(&target.name),
        };
        found.ok_or_else(|| match &target.domain {
            Some(domain) => Diagnostic::fatal(
                Code::NotFound,
                format!("No member '{}' in '{}'", target.name, domain),
            )
            .with_span(target.span),
            None => not_found(&target.name, target.span),
        })
    }

    fn assign(&mut self, target: &Target, value: &Object) -> Result<(), Diagnostic> {
        let span = target.span;
        let reachable = value
            .with_payload(Payload::reachable_containers)
            .unwrap_or_default();
        let Some(domain) = &target.domain else {
            let slot = self.find_target(target)?;
            reject_self_containment(&reachable, None, Some(&slot), span)?;
            return slot.assign_object(value).map_err(at_span(span));
        };

        let holder = self
            .scopes
            .find(domain)
            .ok_or_else(|| not_found(domain, span))?;
        let members = holder.cast::<Container>().map_err(at_span(span))?;
        if holder.deref().map_err(at_span(span))?.is_read_only() {
            return Err(Diagnostic::from(ObjectError::ReadOnly).with_span(span));
        }
        let slot = members.find(&target.name, false);
        reject_self_containment(&reachable, Some(&members), slot.as_ref(), span)?;
        match slot {
            Some(slot) => slot.assign_object(value).map_err(at_span(span)),
            None => {
                members.replace(&target.name, adopt(value).map_err(at_span(span))?);
                Ok(())
            }
        }
    }

    /// Evaluates `node` and returns its value.
    pub fn evaluate(&mut self, node: &Node) -> Result<Object, Diagnostic> {
        self.registry.begin_evaluation();
        let result = self.eval(node);
        self.registry.end_evaluation();
        result
    }

    /// Like [`Evaluator::evaluate`], but a call at the root keeps its own
    /// outcome code, so callers can tell `print` (nothing) from a value.
    fn evaluate_root(&mut self, node: &Node) -> Result<Diagnostic, Diagnostic> {
        match node {
            Node::Call { name, args, span } => self.call(name, args, *span),
            node => self.eval(node).map(Diagnostic::with_object),
        }
    }

    fn eval(&mut self, node: &Node) -> Result<Object, Diagnostic> {
        match node {
            Node::Literal { value, .. } => Ok(temporary(value.clone())),
            Node::Variable { name, span } => {
                let found = self.scopes.find(name).ok_or_else(|| not_found(name, *span))?;
                load(&found).map_err(at_span(*span))
            }
            Node::Member { domain, name, span } => {
                let found = self.find_target(&Target {
                    name: name.clone(),
                    domain: Some(domain.clone()),
                    span: *span,
                })?;
                load(&found).map_err(at_span(*span))
            }
            Node::Call { name, args, span } => {
                let result = self.call(name, args, *span)?;
                Ok(result.value.unwrap_or_default())
            }
            Node::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let symbol = operator.symbol();
                let result = self.invoke(symbol, vec![left, right, Object::string(symbol)], *span)?;
                Ok(result.value.unwrap_or_default())
            }
            Node::Group { items, .. } => {
                let mut last = Object::null();
                for item in items {
                    last = self.eval(item)?;
                }
                Ok(last)
            }
        }
    }

    fn call(&mut self, name: &str, args: &[Node], span: Span) -> Result<Diagnostic, Diagnostic> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg)?);
        }
        self.invoke(name, values, span)
    }

    /// Runs the entry `name` resolves to. Fatal results abort the expression;
    /// warnings are logged and evaluation goes on with their value.
    fn invoke(&mut self, name: &str, args: Vec<Object>, span: Span) -> Result<Diagnostic, Diagnostic> {
        let entry = self.registry.resolve(name).ok_or_else(|| {
            Diagnostic::fatal(Code::IllegalCall, format!("Entry not found - {}", name)).with_span(span)
        })?;

        let mut result = entry.invoke(self, args);
        if result.is_fatal() {
            return Err(result.or_span(span));
        }
        if result.is_warning() {
            let mut warning = result.clone();
            if self.call_depth > 0 {
                // Spans inside a function body do not point into the
                // caller's line, which is what the event is filed under.
                warning.span = None;
            } else {
                warning = warning.or_span(span);
            }
            self.record(&warning);
        }
        if result.value.is_none() {
            result.value = Some(Object::boolean(result.code.is_success()));
        }
        Ok(result)
    }

    /// Runs a user function in a fresh frame that sees only globals.
    pub fn call_function(&mut self, function: &Function, args: Vec<Object>) -> Diagnostic {
        if args.len() != function.params.len() {
            return Diagnostic::fatal(
                Code::IllegalArgs,
                format!(
                    "Parameter count doesn't match - {} (expected {}, got {})",
                    function.name,
                    function.params.len(),
                    args.len()
                ),
            );
        }
        if self.call_depth >= self.config.max_call_depth {
            return Diagnostic::fatal(
                Code::Overflow,
                format!(
                    "Call depth limit of {} exceeded in '{}'",
                    self.config.max_call_depth, function.name
                ),
            );
        }

        let mut bound = Vec::with_capacity(args.len());
        for arg in &args {
            match adopt(arg) {
                Ok(value) => bound.push(value),
                Err(error) => return error.into(),
            }
        }

        let depth = self.scopes.depth();
        let floor = self.frame_floor;
        self.scopes.push(false);
        self.frame_floor = self.scopes.depth();
        self.call_depth += 1;
        for (param, value) in function.params.iter().zip(bound) {
            self.scopes.create(param, value);
        }

        let mut result = Diagnostic::nothing().with_value(Object::null());
        for line in &function.body {
            match self.run_line(line) {
                Flow::Return(diagnostic) => {
                    result = diagnostic;
                    break;
                }
                Flow::Continue(mut diagnostic) if diagnostic.is_fatal() => {
                    // The span points into the body line, not the caller's.
                    let local = diagnostic.span.take().is_some();
                    let nested = diagnostic
                        .detail
                        .as_deref()
                        .is_some_and(|detail| detail.starts_with("in '"));
                    if local && !nested {
                        let detail = diagnostic.detail.take().unwrap_or_default();
                        diagnostic = diagnostic.with_detail(format!("in '{}': {}", function.name, detail));
                    }
                    result = diagnostic;
                    break;
                }
                Flow::Continue(_) => {}
            }
        }

        self.call_depth -= 1;
        self.frame_floor = floor;
        self.scopes.truncate(depth);
        result
    }

    /// Runs every line of `source`. Functions defined by the script are
    /// unloaded when it finishes.
    ///
    /// The outcome is the `return` value, or the last line's result. A fatal
    /// line stops the script when `halt_on_fatal` is set; otherwise the run
    /// goes on and the first fatal result becomes the outcome.
    pub fn run_script(&mut self, source: &mut ScriptSource) -> Diagnostic {
        let span = tracing::debug_span!("script", name = source.name().unwrap_or("<text>"));
        let _enter = span.enter();

        let mut outcome = Diagnostic::nothing();
        let mut first_fatal = None;
        let mut at_eof = false;
        loop {
            let (text, number, offset) = match source.next_line() {
                Ok(Line::Text {
                    text,
                    number,
                    offset,
                }) => (text, number, offset),
                Ok(Line::Eof) => {
                    at_eof = true;
                    break;
                }
                Err(error) => {
                    let diagnostic = Diagnostic::from(error);
                    self.record(&diagnostic);
                    outcome = diagnostic;
                    break;
                }
            };
            self.line = Some(number);
            self.offset = offset;

            match self.run_line(&text) {
                Flow::Return(diagnostic) => {
                    outcome = diagnostic;
                    break;
                }
                Flow::Continue(diagnostic) if diagnostic.is_fatal() => {
                    if self.config.halt_on_fatal {
                        outcome = diagnostic;
                        break;
                    }
                    first_fatal.get_or_insert(diagnostic);
                }
                Flow::Continue(diagnostic) => outcome = diagnostic,
            }
        }
        let mut outcome = first_fatal.unwrap_or(outcome);

        if let Some(function) = self.pending.take() {
            let diagnostic = Diagnostic::fatal(
                Code::IllegalSymbol,
                format!("Function '{}' is missing its 'end'", function.name),
            );
            self.record(&diagnostic);
            if !outcome.is_fatal() {
                outcome = diagnostic;
            }
        }
        if self.scopes.depth() > self.frame_floor {
            // Only running off the end with blocks open is a mistake; a
            // `return` or a halting line leaves them behind legitimately.
            if at_eof {
                let open = self.scopes.depth() - self.frame_floor;
                let diagnostic = Diagnostic::warning(
                    Code::IllegalSymbol,
                    format!("{} block(s) left open at end of script", open),
                );
                self.record(&diagnostic);
            }
            self.scopes.truncate(self.frame_floor);
        }
        match self.registry.unregister_tier(Tier::Plugin) {
            Ok(removed) => tracing::debug!(removed, "script functions unloaded"),
            Err(error) => self.record(&error.into()),
        }

        self.line = None;
        self.offset = 0;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ARITHMETIC_ENTRY;
    use crate::error::Severity;
    use std::cell::{Cell, RefCell};

    fn run(source: &str) -> Diagnostic {
        Evaluator::new().run_script(&mut ScriptSource::from_text(source))
    }

    fn run_with_output(source: &str, config: Config) -> (Diagnostic, Evaluator) {
        let mut evaluator = Evaluator::with_config(config).with_output(Output::buffer());
        let result = evaluator.run_script(&mut ScriptSource::from_text(source));
        (result, evaluator)
    }

    fn payload(diagnostic: &Diagnostic) -> Payload {
        diagnostic
            .value
            .as_ref()
            .expect("value")
            .payload()
            .expect("payload")
    }

    #[test]
    fn script_returns_declared_sum() {
        let result = run("var x = 3 + 4\nreturn x\n");
        assert_eq!(result.severity, Severity::Normal);
        assert_eq!(result.code, Code::Success);
        assert_eq!(payload(&result), Payload::Int(7));
    }

    #[test]
    fn precedence_decides_invocation_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let log = calls.clone();
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::operator(ARITHMETIC_ENTRY, 3, move |_, args| {
                let l = args[0].cast::<i64>().unwrap_or_default();
                let r = args[1].cast::<i64>().unwrap_or_default();
                let op = args[2].cast::<String>().unwrap_or_default();
                log.borrow_mut().push(format!("{} {} {}", l, op, r));
                let value = if op == "*" { l * r } else { l + r };
                Diagnostic::with_object(Object::int(value))
            }))
            .expect("register");

        let result = evaluator.run_line("1 + 2 * 3").into_diagnostic();
        assert_eq!(payload(&result), Payload::Int(7));
        assert_eq!(*calls.borrow(), vec!["2 * 3".to_string(), "1 + 6".to_string()]);
    }

    #[test]
    fn unbalanced_brackets_invoke_nothing() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::variadic("count", move |_, _| {
                counter.set(counter.get() + 1);
                Diagnostic::success()
            }))
            .expect("register");

        for source in ["count(count(1)", "count(1))", "(count(2)"] {
            let result = evaluator.run_line(source).into_diagnostic();
            assert!(result.is_fatal(), "{}", source);
            assert_eq!(result.code, Code::IllegalSymbol, "{}", source);
        }
        assert_eq!(calls.get(), 0);
        assert_eq!(evaluator.events().fatal_count(), 3);
    }

    #[test]
    fn arity_mismatch_from_source() {
        let result = run("at(array(1, 2))");
        assert!(result.is_fatal());
        assert_eq!(result.code, Code::IllegalArgs);
        assert_eq!(result.span, Some(Span::new(0, 15)));
    }

    #[test]
    fn bare_call_result_is_a_success_marker() {
        let (result, evaluator) = run_with_output("var ok = print \"hi\"\nreturn ok", Config::default());
        assert_eq!(payload(&result), Payload::Bool(true));
        assert_eq!(evaluator.output().captured(), "hi\n");
    }

    #[test]
    fn comma_group_yields_last_value() {
        assert_eq!(payload(&run("return (1, 2, 3) * 2")), Payload::Int(6));
    }

    #[test]
    fn values_are_copied_references_alias() {
        let copied = run("var a = 1\nvar b = a\nb = 2\nreturn a");
        assert_eq!(payload(&copied), Payload::Int(1));

        let aliased = run("var a = 1\nref r = a\nr = 5\nreturn a");
        assert_eq!(payload(&aliased), Payload::Int(5));
    }

    #[test]
    fn arrays_are_copied_on_declaration() {
        let result = run("var a = array(1, 2)\nvar b = a\nb = array()\nreturn at(a, 1)");
        assert_eq!(payload(&result), Payload::Int(2));
    }

    #[test]
    fn disposing_the_target_kills_the_reference() {
        let result = run("var a = 1\nref r = a\ndispose a\nreturn r");
        assert!(result.is_fatal());
        assert_eq!(result.code, Code::DeadReference);

        assert_eq!(run("dispose nothing_here").code, Code::NotFound);
    }

    #[test]
    fn blocks_shadow_and_tear_down() {
        let (result, evaluator) = run_with_output(
            "var x = 1\n{\nvar x = 2\nvar inner = 3\nprint x\n}\nprint x\nreturn inner",
            Config::default(),
        );
        assert_eq!(evaluator.output().captured(), "2\n1\n");
        assert_eq!(result.code, Code::NotFound);
    }

    #[test]
    fn unmatched_close_brace_is_fatal() {
        let result = run("}");
        assert_eq!(result.code, Code::IllegalSymbol);
    }

    #[test]
    fn redeclaration_is_fatal() {
        let result = run("var x = 1\nvar x = 2");
        assert_eq!(result.code, Code::Redeclared);
    }

    #[test]
    fn struct_members() {
        let result = run(
            "var p = struct(\"Point\")\np:x = 3\np:x = p:x + 1\nref px = p:x\npx = px * 10\nreturn p:x",
        );
        assert_eq!(payload(&result), Payload::Int(40));
        assert_eq!(
            payload(&run("var p = struct(\"Point\")\nreturn type(p)")),
            Payload::String("Point".to_string())
        );
        assert_eq!(run("var p = struct()\nreturn p:missing").code, Code::NotFound);
    }

    #[test]
    fn functions_see_globals_not_caller_locals() {
        let result = run("def add(a, b)\nreturn a + b\nend\nreturn add(2, 3)");
        assert_eq!(payload(&result), Payload::Int(5));

        let globals = run("def get()\nreturn g\nend\nvar g = 10\nreturn get()");
        assert_eq!(payload(&globals), Payload::Int(10));

        let hidden = run("def peek()\nreturn hidden\nend\n{\nvar hidden = 1\nreturn peek()\n}");
        assert_eq!(hidden.code, Code::NotFound);
    }

    #[test]
    fn function_arity_and_unloading() {
        let mut evaluator = Evaluator::new();
        let result = evaluator.run_script(&mut ScriptSource::from_text(
            "def one(a)\nreturn a\nend\none(1, 2)",
        ));
        assert_eq!(result.code, Code::IllegalArgs);
        assert!(evaluator.registry().resolve("one").is_none());
    }

    #[test]
    fn runaway_recursion_overflows() {
        let config = Config::default().with_max_call_depth(8);
        let (result, _) = run_with_output("def spin()\nreturn spin()\nend\nspin()", config);
        assert!(result.is_fatal());
        assert_eq!(result.code, Code::Overflow);
    }

    #[test]
    fn definition_errors() {
        assert_eq!(run("def f()\nreturn 1").code, Code::IllegalSymbol);
        assert_eq!(run("end").code, Code::IllegalSymbol);
        assert_eq!(run("def f(a, a)\nend").code, Code::Redeclared);
        assert_eq!(run("def print()\nend").code, Code::Redeclared);
        assert_eq!(run("def f()\ndef g()\nend").code, Code::IllegalSymbol);
    }

    #[test]
    fn halt_policy() {
        let (halted, evaluator) = run_with_output("missing\nprint 1", Config::default());
        assert_eq!(halted.code, Code::NotFound);
        assert_eq!(evaluator.output().captured(), "");

        let (kept, evaluator) = run_with_output("missing\nprint 1", Config::default().keep_going());
        assert_eq!(kept.code, Code::NotFound);
        assert_eq!(evaluator.output().captured(), "1\n");
        assert_eq!(evaluator.events().len(), 1);
        assert_eq!(evaluator.events().events()[0].line, Some(1));
    }

    #[test]
    fn warnings_do_not_halt() {
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::native("shaky", 0, |_, _| {
                Diagnostic::warning(Code::IllegalParam, "approximate").with_value(Object::int(5))
            }))
            .expect("register");

        let result = evaluator.run_script(&mut ScriptSource::from_text("return shaky() + 1"));
        assert_eq!(payload(&result), Payload::Int(6));
        assert_eq!(evaluator.events().len(), 1);
        assert!(evaluator.events().events()[0].diagnostic.is_warning());
    }

    #[test]
    fn second_run_without_reset_overflows() {
        let mut evaluator = Evaluator::new();
        let mut source = ScriptSource::from_text("1");
        assert!(!evaluator.run_script(&mut source).is_fatal());
        assert_eq!(evaluator.run_script(&mut source).code, Code::Overflow);

        source.reset();
        assert!(!evaluator.run_script(&mut source).is_fatal());
    }

    #[test]
    fn registry_is_busy_while_evaluating() {
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::native("meddle", 0, |evaluator, _| {
                match evaluator.registry_mut().register(Entry::native("late", 0, |_, _| {
                    Diagnostic::success()
                })) {
                    Ok(()) => Diagnostic::success(),
                    Err(error) => error.into(),
                }
            }))
            .expect("register");

        let result = evaluator.run_line("meddle()").into_diagnostic();
        assert_eq!(result.code, Code::RegistryBusy);
        assert!(!evaluator.registry().is_busy());
        assert!(evaluator.registry().resolve("late").is_none());
    }

    #[test]
    fn external_values_are_released_once() {
        let released = Rc::new(Cell::new(0));
        let counter = released.clone();
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::native("handle", 0, move |_, _| {
                let counter = counter.clone();
                let handle = Object::external(42u32, "handle", move |_, type_id| {
                    assert_eq!(type_id, "handle");
                    counter.set(counter.get() + 1);
                });
                Diagnostic::with_object(handle)
            }))
            .expect("register");

        let result = evaluator.run_script(&mut ScriptSource::from_text(
            "var h = handle()\nref alias = h\nreturn type(alias)",
        ));
        assert_eq!(payload(&result), Payload::String("handle".to_string()));
        assert_eq!(released.get(), 0);

        drop(result);
        drop(evaluator);
        assert_eq!(released.get(), 1);
    }

    fn register_handle(evaluator: &mut Evaluator, released: Rc<Cell<u32>>) {
        evaluator
            .registry_mut()
            .register(Entry::native("handle", 0, move |_, _| {
                let released = released.clone();
                let handle = Object::external(7u32, "handle", move |_, _| {
                    released.set(released.get() + 1);
                });
                Diagnostic::with_object(handle)
            }))
            .expect("register");
    }

    #[test]
    fn struct_cannot_be_stored_inside_itself() {
        let (result, evaluator) = run_with_output(
            "var p = struct()\np:me = p\nprint p",
            Config::default().keep_going(),
        );
        assert_eq!(result.code, Code::IllegalParam);
        assert_eq!(evaluator.output().captured(), "{}\n");

        let nested = run("var p = struct()\nvar q = struct()\nq:p = p\np:q = q");
        assert_eq!(nested.code, Code::IllegalParam);

        let through_ref = run("var p = struct()\np:x = 1\nref r = p:x\nr = p");
        assert_eq!(through_ref.code, Code::IllegalParam);

        let sibling = run("var p = struct()\nvar q = struct()\np:q = q\nreturn type(p:q)");
        assert_eq!(payload(&sibling), Payload::String("struct".to_string()));
    }

    #[test]
    fn host_values_can_replace_language_values() {
        let released = Rc::new(Cell::new(0));
        let mut evaluator = Evaluator::new();
        register_handle(&mut evaluator, released.clone());

        let result = evaluator.run_script(&mut ScriptSource::from_text(
            "var a = 1\na = handle()\nref b = a\nreturn type(b)",
        ));
        assert_eq!(payload(&result), Payload::String("handle".to_string()));
        assert_eq!(released.get(), 0);

        drop(result);
        drop(evaluator);
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn return_inside_a_block_leaves_no_warning() {
        let mut evaluator = Evaluator::new();
        let result = evaluator.run_script(&mut ScriptSource::from_text("{\nreturn 1\n}"));
        assert_eq!(payload(&result), Payload::Int(1));
        assert!(evaluator.events().is_empty());
        assert_eq!(evaluator.scopes().depth(), 1);

        let result = evaluator.run_script(&mut ScriptSource::from_text("{\nvar x = 1"));
        assert!(!result.is_fatal());
        assert_eq!(evaluator.events().len(), 1);
        assert!(evaluator.events().events()[0].diagnostic.is_warning());
        assert_eq!(evaluator.scopes().depth(), 1);
    }

    #[test]
    fn warnings_inside_functions_are_filed_under_the_calling_line() {
        let mut evaluator = Evaluator::new();
        evaluator
            .registry_mut()
            .register(Entry::native("shaky", 0, |_, _| {
                Diagnostic::warning(Code::IllegalParam, "approximate").with_value(Object::int(5))
            }))
            .expect("register");

        let source = "def f()\nreturn shaky()\nend\nvar x = f()";
        let result = evaluator.run_script(&mut ScriptSource::from_text(source));
        assert!(!result.is_fatal());

        let events = evaluator.events().events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].line, Some(4));
        assert_eq!(events[0].diagnostic.span, None);
    }
}
