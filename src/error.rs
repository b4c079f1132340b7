//! Typed compile-time errors
//!
//! Every error carries the source span of the offending node when one is
//! known. All of these are fatal for the enclosing function compile: they
//! propagate out with `?` and abort that unit. Nothing is retried.

use std::error::Error as StdError;
use std::fmt;

use crate::indexed::MacroFault;
use crate::span::Span;

pub type CResult<T> = Result<T, CompileError>;

/// Compile-time error taxonomy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Expected one node shape, found another
    Shape {
        expected: &'static str,
        found: String,
        span: Option<Span>,
    },
    /// Wrong argument count for a constructor or instruction
    Arity {
        what: String,
        expected: usize,
        got: usize,
        span: Option<Span>,
    },
    /// A reference could not be resolved
    UndefinedReference { name: String, span: Option<Span> },
    /// A parameter, variable, or block name declared twice
    DuplicateName {
        kind: &'static str,
        name: String,
        span: Option<Span>,
    },
    /// Operand or declared type does not match the expected type
    TypeMismatch {
        expected: String,
        got: String,
        span: Option<Span>,
    },
    /// A literal that does not parse as base-10 or exceeds the target range
    BadLiteral {
        text: String,
        reason: String,
        span: Option<Span>,
    },
    /// Bit width outside 1..=1024, or not a plain decimal literal
    BadBitWidth { text: String, span: Option<Span> },
    /// Head identifier names no known type constructor
    UnknownConstructor { name: String, span: Option<Span> },
    /// Head identifier names no known instruction
    UnknownInstruction { name: String, span: Option<Span> },
    /// `call` is reserved for a future extension
    ReservedInstruction { name: String, span: Option<Span> },
    /// Reflective instruction used outside a macro body
    CompileTimeOnly { name: String, span: Option<Span> },
    /// `let` on a void instruction, or a missing `let` on a value producer
    Binding { message: String, span: Option<Span> },
    /// Branch or phi names a block that does not exist
    UnknownBlock { name: String, span: Option<Span> },
    /// Branch targets the entry block
    BranchToEntry { name: String, span: Option<Span> },
    /// Phi incoming missing, duplicated, or naming a non-predecessor
    PhiIncoming {
        block: String,
        message: String,
        span: Option<Span>,
    },
    /// A block ended without a terminator, or continued past one
    Terminator {
        block: String,
        message: String,
        span: Option<Span>,
    },
    /// Macro declared with a signature other than (int 64) -> (int 64)
    InvalidMacroSignature { message: String, span: Option<Span> },
    /// A fault raised by a macro while executing, reported at its call site
    MacroFault {
        fault: MacroFault,
        span: Option<Span>,
    },
    /// Code generation failed
    Backend { message: String },
}

impl CompileError {
    pub fn shape(expected: &'static str, found: impl Into<String>, span: Option<Span>) -> Self {
        CompileError::Shape {
            expected,
            found: found.into(),
            span,
        }
    }

    pub fn arity(what: impl Into<String>, expected: usize, got: usize, span: Option<Span>) -> Self {
        CompileError::Arity {
            what: what.into(),
            expected,
            got,
            span,
        }
    }

    pub fn undefined(name: impl Into<String>, span: Option<Span>) -> Self {
        CompileError::UndefinedReference {
            name: name.into(),
            span,
        }
    }

    pub fn duplicate(kind: &'static str, name: impl Into<String>, span: Option<Span>) -> Self {
        CompileError::DuplicateName {
            kind,
            name: name.into(),
            span,
        }
    }

    pub fn type_mismatch(
        expected: impl Into<String>,
        got: impl Into<String>,
        span: Option<Span>,
    ) -> Self {
        CompileError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
            span,
        }
    }

    pub fn bad_literal(
        text: impl Into<String>,
        reason: impl Into<String>,
        span: Option<Span>,
    ) -> Self {
        CompileError::BadLiteral {
            text: text.into(),
            reason: reason.into(),
            span,
        }
    }

    pub fn binding(message: impl Into<String>, span: Option<Span>) -> Self {
        CompileError::Binding {
            message: message.into(),
            span,
        }
    }

    pub fn phi(block: impl Into<String>, message: impl Into<String>, span: Option<Span>) -> Self {
        CompileError::PhiIncoming {
            block: block.into(),
            message: message.into(),
            span,
        }
    }

    pub fn terminator(
        block: impl Into<String>,
        message: impl Into<String>,
        span: Option<Span>,
    ) -> Self {
        CompileError::Terminator {
            block: block.into(),
            message: message.into(),
            span,
        }
    }

    pub fn macro_fault(fault: MacroFault, span: Option<Span>) -> Self {
        CompileError::MacroFault { fault, span }
    }

    pub fn backend(message: impl Into<String>) -> Self {
        CompileError::Backend {
            message: message.into(),
        }
    }

    /// The source span this error points at, if one is known
    pub fn span(&self) -> Option<Span> {
        match self {
            CompileError::Shape { span, .. }
            | CompileError::Arity { span, .. }
            | CompileError::UndefinedReference { span, .. }
            | CompileError::DuplicateName { span, .. }
            | CompileError::TypeMismatch { span, .. }
            | CompileError::BadLiteral { span, .. }
            | CompileError::BadBitWidth { span, .. }
            | CompileError::UnknownConstructor { span, .. }
            | CompileError::UnknownInstruction { span, .. }
            | CompileError::ReservedInstruction { span, .. }
            | CompileError::CompileTimeOnly { span, .. }
            | CompileError::Binding { span, .. }
            | CompileError::UnknownBlock { span, .. }
            | CompileError::BranchToEntry { span, .. }
            | CompileError::PhiIncoming { span, .. }
            | CompileError::Terminator { span, .. }
            | CompileError::InvalidMacroSignature { span, .. }
            | CompileError::MacroFault { span, .. } => *span,
            CompileError::Backend { .. } => None,
        }
    }

    /// Human-readable description, without the span prefix
    pub fn description(&self) -> String {
        match self {
            CompileError::Shape {
                expected, found, ..
            } => {
                format!("expected {}, found {}", expected, found)
            }
            CompileError::Arity {
                what,
                expected,
                got,
                ..
            } => format!(
                "{} takes {} argument{}, got {}",
                what,
                expected,
                if *expected == 1 { "" } else { "s" },
                got
            ),
            CompileError::UndefinedReference { name, .. } => {
                format!("undefined reference '{}'", name)
            }
            CompileError::DuplicateName { kind, name, .. } => {
                format!("duplicate {} name '{}'", kind, name)
            }
            CompileError::TypeMismatch { expected, got, .. } => {
                format!("type mismatch: expected {}, got {}", expected, got)
            }
            CompileError::BadLiteral { text, reason, .. } => {
                format!("bad literal '{}': {}", text, reason)
            }
            CompileError::BadBitWidth { text, .. } => {
                format!("bit width '{}' is not a decimal in 1..=1024", text)
            }
            CompileError::UnknownConstructor { name, .. } => {
                format!("unknown type constructor '{}'", name)
            }
            CompileError::UnknownInstruction { name, .. } => {
                format!("unknown instruction '{}'", name)
            }
            CompileError::ReservedInstruction { name, .. } => {
                format!("instruction '{}' is reserved and not implemented", name)
            }
            CompileError::CompileTimeOnly { name, .. } => {
                format!("instruction '{}' is only valid inside a macro body", name)
            }
            CompileError::Binding { message, .. } => message.clone(),
            CompileError::UnknownBlock { name, .. } => format!("unknown block '{}'", name),
            CompileError::BranchToEntry { name, .. } => {
                format!("branch targets the entry block '{}'", name)
            }
            CompileError::PhiIncoming { block, message, .. } => {
                format!("phi in block '{}': {}", block, message)
            }
            CompileError::Terminator { block, message, .. } => {
                format!("block '{}': {}", block, message)
            }
            CompileError::InvalidMacroSignature { message, .. } => {
                format!("invalid macro signature: {}", message)
            }
            CompileError::MacroFault { fault, .. } => format!("macro execution fault: {}", fault),
            CompileError::Backend { message } => format!("code generation failed: {}", message),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span() {
            Some(span) => write!(f, "{}: {}", span, self.description()),
            None => write!(f, "{}", self.description()),
        }
    }
}

impl StdError for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity_singular() {
        let err = CompileError::arity("int", 1, 3, None);
        assert_eq!(err.description(), "int takes 1 argument, got 3");
    }

    #[test]
    fn test_arity_plural() {
        let err = CompileError::arity("add", 2, 1, None);
        assert_eq!(err.description(), "add takes 2 arguments, got 1");
    }

    #[test]
    fn test_type_mismatch() {
        let err = CompileError::type_mismatch("(int 64)", "(int 32)", None);
        assert_eq!(
            err.description(),
            "type mismatch: expected (int 64), got (int 32)"
        );
    }

    #[test]
    fn test_display_with_span() {
        let err = CompileError::undefined("x", Some(Span::new(0, 1, 4, 2)));
        assert_eq!(format!("{}", err), "4:2: undefined reference 'x'");
    }

    #[test]
    fn test_display_without_span() {
        let err = CompileError::backend("boom");
        assert_eq!(format!("{}", err), "code generation failed: boom");
    }
}
