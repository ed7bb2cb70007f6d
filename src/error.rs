use crate::tpl::lexer::Span;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Directive Syntax Error: '{directive}' at {span}: {message}")]
    DirectiveSyntax {
        directive: String,
        message: String,
        span: Span,
    },
    #[error("Unterminated Block Error: '{directive}' opened at {span} is missing '{end_marker}'")]
    UnterminatedBlock {
        directive: String,
        end_marker: String,
        span: Span,
    },
    #[error("Unknown Directive Error: '{name}' at {span}")]
    UnknownDirective { name: String, span: Span },
    #[error("Argument Type Error: '{directive}': {message}")]
    ArgumentType { directive: String, message: String },
    #[error("Recursion Limit Error: nesting deeper than {limit}")]
    RecursionLimit { limit: usize },
    #[error("Output Limit Error: '{directive}' would produce more than {limit} bytes")]
    OutputLimit { directive: String, limit: usize },
    #[error("Duplicate Directive Error: '{0}' already registered")]
    DuplicateDirective(String),
    #[error("Template Not Found: {0}")]
    TemplateNotFound(String),
    #[error("Template Load Error: {0}")]
    Loader(String),
    #[error("Type Mismatch: {0}")]
    TypeMismatch(String),
    #[error("Serialization Error: {0}")]
    Serialization(String),
    #[error("Directive Error: '{directive}': {message}")]
    Directive { directive: String, message: String },
}

impl TemplateError {
    pub(crate) fn syntax(directive: &str, message: impl Into<String>, span: Span) -> Self {
        TemplateError::DirectiveSyntax {
            directive: directive.to_string(),
            message: message.into(),
            span,
        }
    }

    pub(crate) fn argument_type(directive: &str, message: impl Into<String>) -> Self {
        TemplateError::ArgumentType {
            directive: directive.to_string(),
            message: message.into(),
        }
    }

    /// Builds the error a directive handler returns for its own failures.
    pub fn directive(directive: &str, message: impl Into<String>) -> Self {
        TemplateError::Directive {
            directive: directive.to_string(),
            message: message.into(),
        }
    }
}

impl serde::ser::Error for TemplateError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TemplateError::Serialization(msg.to_string())
    }
}
