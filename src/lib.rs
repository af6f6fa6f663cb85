//! Chainlet: a small line-oriented scripting language.
//!
//! Every operator, keyword-like builtin and user function is an entry in a
//! [`Registry`]; the [`Evaluator`] parses one line at a time and routes each
//! operation through it. Values are reference-counted [`Object`]s living in
//! a [`ScopeStack`] of [`Container`]s.

pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod registry;
pub mod repl;
pub mod runner;
pub mod scope;
pub mod script;
pub mod value;

pub use config::Config;
pub use error::{Code, Diagnostic, Severity, Span};
pub use evaluator::{Evaluator, Flow};
pub use lexer::{tokenize, Token};
pub use registry::{Arity, Entry, Registry, Tier};
pub use scope::{Container, ScopeStack};
pub use script::ScriptSource;
pub use value::{Mode, Object, Payload};

pub use repl::start as start_repl;
pub use runner::run;
