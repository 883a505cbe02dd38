//! `${...}` interpolation
//!
//! Raw document text is run through [Evaluator::resolve_text] before it is parsed. Two passes are made:
//!
//! 1. spans forming an entire quoted value (`"${fn()}"`) are replaced together with their quotes, so a list result
//!    becomes a list literal (`["a", "b"]`)
//! 2. every remaining span is replaced by the string rendering of its value
//!
//! `${var.name}` reads the variable context. A reference that cannot be resolved stays in place, unless
//! [ResolveOptions::erase_unresolved] is set. Everything else inside `${...}` must be a helper function call (see
//! [crate::functions]).
//!
//! Helper functions are also callable as plain HCL function calls. [Evaluator::evaluate_body] replaces those calls
//! with their result before the body is evaluated by [hcl::eval].
mod parser;

use crate::collaborators::{CollaboratorError, Collaborators};
use crate::functions::FunctionTable;
use crate::include::Include;
use crate::options::ResolveOptions;
use crate::value::{Value, ValueError};
use crate::variables::{VariableContext, VariableSource};
use crate::visit::{VisitExpressionsMut, VisitMut};
use hcl::eval::Evaluate;
use parser::{next_span, parse_expression, Expr, Scan, Span};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    #[error("invalid interpolation syntax: {0}")]
    InvalidSyntax(String),
    #[error("unknown helper function `{0}`")]
    UnknownFunction(String),
    #[error("{function}() expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        function: String,
        expected: String,
        actual: usize,
    },
    #[error("invalid argument for {function}(): {reason}")]
    InvalidArgument { function: String, reason: String },
    #[error("no parent configuration found for {}", .0.display())]
    ParentConfigNotFound(PathBuf),
    #[error("searched more than {max} parent folders of {}", path.display())]
    TooManyParentFolders { path: PathBuf, max: usize },
    #[error("cannot express {} relative to {}", path.display(), base.display())]
    RelativePath { path: PathBuf, base: PathBuf },
    #[error("{function}() failed")]
    Collaborator {
        function: String,
        #[source]
        source: CollaboratorError,
    },
    #[error("{function}() failed: {message}")]
    External { function: String, message: String },
    #[error("HCL evaluation failed: {0}")]
    Hcl(String),
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Mutable state shared by every document of one resolution
#[derive(Debug, Default)]
pub struct EvalState {
    pub variables: VariableContext,
    erased: HashSet<String>,
    /// Writes of helper functions, in order
    global_writes: Vec<(String, Value)>,
}

impl EvalState {
    pub fn new(variables: VariableContext) -> Self {
        EvalState {
            variables,
            ..Default::default()
        }
    }

    /// Set a variable on behalf of a helper function
    pub fn set_global(&mut self, key: &str, value: Value) {
        self.global_writes.push((key.to_string(), value.clone()));
        self.variables.set(key, value, VariableSource::FunctionSet);
    }

    pub(crate) fn global_write_count(&self) -> usize {
        self.global_writes.len()
    }

    pub(crate) fn global_writes_since(&self, mark: usize) -> Vec<(String, Value)> {
        self.global_writes.get(mark..).unwrap_or_default().to_vec()
    }

    /// Repeat writes recorded with [EvalState::global_writes_since]
    pub(crate) fn replay_global_writes(&mut self, writes: &[(String, Value)]) {
        for (key, value) in writes {
            self.set_global(key, value.clone());
        }
    }
}

/// What helper functions can see while a document is evaluated
pub struct EvalScope<'a> {
    /// Position of the evaluated document in the include chain
    pub include: &'a Include,
    pub options: &'a ResolveOptions,
    pub collaborators: &'a Collaborators,
    pub state: &'a mut EvalState,
}

/// How text produced by [Evaluator::resolve_text] is consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextMode {
    /// The text is parsed as HCL afterwards: unresolved references and inserted `${` are escaped as `$${`, values
    /// inserted into a quoted string are escaped as string content
    Document,
    /// The text is final: `$${` escapes are turned into `${`
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pass {
    WholeValue,
    Embedded,
}

enum Resolution {
    Value(Value),
    /// `${var.name}` with no such variable
    Unresolved,
    /// a call of a function only known to HCL evaluation
    Deferred,
}

pub struct Evaluator<'a> {
    scope: EvalScope<'a>,
    functions: &'a FunctionTable,
    mode: TextMode,
}

impl<'a> Evaluator<'a> {
    pub fn new(scope: EvalScope<'a>, functions: &'a FunctionTable, mode: TextMode) -> Self {
        Evaluator {
            scope,
            functions,
            mode,
        }
    }

    /// Substitute all `${...}` spans of `text`
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn resolve_text(&mut self, text: &str) -> Result<String, EvalError> {
        let text = self.substitute(text, Pass::WholeValue)?;
        let text = self.substitute(&text, Pass::Embedded)?;
        match self.mode {
            TextMode::Document => Ok(text),
            TextMode::Plain => Ok(text.replace("$${", "${")),
        }
    }

    /// Evaluate `text` to a typed value if it is a single `${...}` span, otherwise interpolate it
    pub fn evaluate(&mut self, text: &str) -> Result<Value, EvalError> {
        let trimmed = text.trim();
        if let Scan::Span(span) = next_span(trimmed, 0) {
            if span.start == 0 && span.end == trimmed.len() {
                return match self.evaluate_span(trimmed, span)? {
                    Resolution::Value(value) => Ok(value),
                    Resolution::Unresolved | Resolution::Deferred => Ok(trimmed.into()),
                };
            }
        }
        self.resolve_text(text).map(Value::String)
    }

    /// Call a helper function directly
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        self.functions.call(&mut self.scope, name, args)
    }

    /// Replace helper function calls with their results, then evaluate `body` with [hcl::eval]
    ///
    /// The HCL context holds every variable, both top-level and below `var`.
    #[tracing::instrument(level = "trace", skip_all)]
    pub fn evaluate_body(&mut self, mut body: hcl::Body) -> Result<hcl::Body, EvalError> {
        let mut rewriter = HelperCallRewriter {
            evaluator: self,
            error: None,
        };
        body.visit_expressions_mut(&mut rewriter);
        if let Some(err) = rewriter.error {
            return Err(err);
        }

        let context = self.hcl_context();
        body.evaluate(&context)
            .map_err(|err| EvalError::Hcl(err.to_string()))
    }

    fn hcl_context(&self) -> hcl::eval::Context<'static> {
        let mut context = hcl::eval::Context::new();
        for (key, value) in self.scope.state.variables.to_map_with_legacy_alias() {
            match hcl::Identifier::new(key.as_str()) {
                Ok(identifier) => context.declare_var(identifier, hcl::Value::from(value)),
                Err(_) => tracing::trace!(key, "variable is not a valid HCL identifier"),
            }
        }
        for (name, function) in self.functions.hcl_functions() {
            match hcl::Identifier::new(name) {
                Ok(identifier) => context.declare_func(identifier, function.clone()),
                Err(_) => tracing::warn!(name, "function name is not a valid HCL identifier"),
            }
        }
        context
    }

    fn substitute(&mut self, text: &str, pass: Pass) -> Result<String, EvalError> {
        let mut out = String::with_capacity(text.len());
        // `text[..copied]` has been handled
        let mut copied = 0;
        let mut from = 0;

        loop {
            let span = match next_span(text, from) {
                Scan::End | Scan::Unclosed(_) => break,
                Scan::Escape(at) => {
                    from = at + 3;
                    continue;
                }
                Scan::Span(span) => span,
            };
            from = span.end;

            let whole_value = is_whole_quoted_value(text, span);
            if pass == Pass::WholeValue && !whole_value {
                continue;
            }

            match self.evaluate_span(text, span)? {
                Resolution::Deferred => {}
                Resolution::Unresolved => {
                    if self.mode == TextMode::Document {
                        out.push_str(&text[copied..span.start]);
                        out.push('$');
                        out.push_str(span.text(text));
                        copied = span.end;
                    }
                }
                Resolution::Value(value) if pass == Pass::WholeValue => {
                    out.push_str(&text[copied..span.start - 1]);
                    let bracketed = text[..span.start - 1].trim_end().ends_with('[')
                        && text[span.end + 1..].trim_start().starts_with(']');
                    out.push_str(&self.escape(render_whole_value(&value, bracketed)));
                    copied = span.end + 1;
                    from = copied;
                }
                Resolution::Value(value) => {
                    out.push_str(&text[copied..span.start]);
                    let inserted = value.to_interpolated_string();
                    if self.mode == TextMode::Document && inside_quoted_string(text, span.start) {
                        out.push_str(&escape_quoted(&inserted));
                    } else {
                        out.push_str(&self.escape(inserted));
                    }
                    copied = span.end;
                }
            }
        }

        out.push_str(&text[copied..]);
        Ok(out)
    }

    fn escape(&self, inserted: String) -> String {
        match self.mode {
            TextMode::Document => inserted.replace("${", "$${").replace("%{", "%%{"),
            TextMode::Plain => inserted,
        }
    }

    fn evaluate_span(&mut self, text: &str, span: Span) -> Result<Resolution, EvalError> {
        let expr = span
            .well_formed
            .then(|| parse_expression(span.content(text)))
            .flatten()
            .ok_or_else(|| EvalError::InvalidSyntax(span.text(text).to_string()))?;

        match expr {
            Expr::Variable(name) => Ok(match self.lookup_variable(&name) {
                Some(value) => Resolution::Value(value),
                None => Resolution::Unresolved,
            }),
            Expr::Call { ref name, .. } if self.is_deferred(name) => Ok(Resolution::Deferred),
            expr => self.evaluate_expr(expr, false).map(Resolution::Value),
        }
    }

    fn is_deferred(&self, name: &str) -> bool {
        !self.functions.contains(name) && self.functions.hcl_functions().any(|(hcl_name, _)| hcl_name == name)
    }

    /// `missing_as_null` turns unresolved variables into `null` instead of their placeholder text
    fn evaluate_expr(&mut self, expr: Expr, missing_as_null: bool) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value),
            Expr::Variable(name) => Ok(match self.lookup_variable(&name) {
                Some(value) => value,
                None if missing_as_null => Value::Null,
                None => Value::String(format!("${{var.{name}}}")),
            }),
            Expr::Call { name, args } => {
                let missing_as_null = name == "default";
                let args = args
                    .into_iter()
                    .map(|arg| self.evaluate_expr(arg, missing_as_null))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(&name, args)
            }
        }
    }

    /// Variable value, or the erased value if unresolved references are erased
    fn lookup_variable(&mut self, name: &str) -> Option<Value> {
        if let Some(value) = self.scope.state.variables.get(name) {
            return Some(value.clone());
        }
        if !self.scope.options.erase_unresolved {
            return None;
        }

        let placeholder = format!("${{var.{name}}}");
        if self.scope.state.erased.insert(placeholder.clone()) {
            tracing::warn!(placeholder, "unresolved variable reference replaced by an empty string");
        }
        Some(Value::String(String::new()))
    }
}

/// Whether `at` lies inside a quoted string of its line
///
/// Quotes within other `${...}` spans of the line and comments are skipped.
fn inside_quoted_string(text: &str, at: usize) -> bool {
    let bytes = text.as_bytes();
    let mut index = text[..at].rfind('\n').map_or(0, |newline| newline + 1);
    let mut quoted = false;

    while index < at {
        match bytes[index] {
            b'\\' if quoted => index += 1,
            b'"' => quoted = !quoted,
            b'$' if quoted && bytes.get(index + 1) == Some(&b'{') => {
                if let Scan::Span(span) = next_span(text, index) {
                    if span.start == index && span.end <= at {
                        index = span.end;
                        continue;
                    }
                }
            }
            b'#' if !quoted => return false,
            b'/' if !quoted && bytes.get(index + 1) == Some(&b'/') => return false,
            _ => {}
        }
        index += 1;
    }
    quoted
}

/// Text of an HCL quoted string holding `value`, without the quotes
fn escape_quoted(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// `"${...}"` with nothing else between the quotes
fn is_whole_quoted_value(text: &str, span: Span) -> bool {
    span.start > 0
        && text.as_bytes()[span.start - 1] == b'"'
        && text.as_bytes().get(span.end) == Some(&b'"')
}

/// Rendering of a whole quoted value as an HCL literal, `bracketed` if the value already sits inside `[...]`
fn render_whole_value(value: &Value, bracketed: bool) -> String {
    match value {
        Value::Array(items) => {
            let elements = items
                .iter()
                .map(|item| Value::String(item.to_interpolated_string()).to_json().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if bracketed {
                elements
            } else {
                format!("[{elements}]")
            }
        }
        other => Value::String(other.to_interpolated_string()).to_json().to_string(),
    }
}

/// Replaces calls of helper functions inside HCL expressions with their result
struct HelperCallRewriter<'e, 'a> {
    evaluator: &'e mut Evaluator<'a>,
    error: Option<EvalError>,
}

impl VisitMut<hcl::Expression> for HelperCallRewriter<'_, '_> {
    fn visit_mut(&mut self, expr: &mut hcl::Expression) {
        if self.error.is_some() {
            return;
        }
        let hcl::Expression::FuncCall(call) = expr else {
            return;
        };
        let name = call.name.as_str().to_string();
        if !self.evaluator.functions.contains(&name) {
            return;
        }

        let context = self.evaluator.hcl_context();
        let args = call
            .args
            .iter()
            .map(|arg| {
                arg.evaluate(&context)
                    .map(Value::from)
                    .map_err(|err| EvalError::Hcl(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>();

        match args.and_then(|args| self.evaluator.call(&name, args)) {
            Ok(value) => *expr = hcl::Expression::from(hcl::Value::from(value)),
            Err(err) => self.error = Some(err),
        }
    }
}
