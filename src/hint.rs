//! Type hints: the declared type of a class attribute.

use std::fmt;
use std::str::FromStr;

use crate::error::AnnotationError;

/// Builtin type names seeded into a default [`TypeRegistry`](crate::TypeRegistry).
pub mod builtin {
    pub const BOOL: &str = "bool";
    pub const INT: &str = "int";
    pub const FLOAT: &str = "float";
    pub const DECIMAL: &str = "Decimal";
    pub const STR: &str = "str";
    pub const DATE: &str = "date";
    pub const DATETIME: &str = "datetime";
    pub const TIME: &str = "time";
    pub const TIMEDELTA: &str = "timedelta";
    pub const UUID: &str = "UUID";
    pub const LIST: &str = "List";
    pub const SEQUENCE: &str = "Sequence";
    pub const INIT_VAR: &str = "InitVar";
    pub const CLASS_VAR: &str = "ClassVar";
}

/// Generic origins treated as homogeneous sequences.
pub const SEQUENCE_ORIGINS: &[&str] = &[builtin::LIST, builtin::SEQUENCE];

/// A declared type annotation.
///
/// `Optional[T]` is represented the way it is written out in full,
/// as `Union[T, None]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeHint {
    /// A plain type, referenced by name (`int`, `Album`).
    Named(String),
    /// A parameterized generic (`List[int]`).
    Generic { origin: String, args: Vec<TypeHint> },
    /// A union of alternatives (`Union[int, str]`).
    Union(Vec<TypeHint>),
    /// The absence of a value.
    NoneType,
}

impl TypeHint {
    pub fn named(name: impl Into<String>) -> Self {
        TypeHint::Named(name.into())
    }

    pub fn generic(origin: impl Into<String>, args: Vec<TypeHint>) -> Self {
        TypeHint::Generic {
            origin: origin.into(),
            args,
        }
    }

    /// `List[inner]`
    pub fn list(inner: TypeHint) -> Self {
        Self::generic(builtin::LIST, vec![inner])
    }

    /// `Optional[inner]`, i.e. `Union[inner, None]`
    pub fn optional(inner: TypeHint) -> Self {
        TypeHint::Union(vec![inner, TypeHint::NoneType])
    }

    /// `ClassVar[inner]`
    pub fn class_var(inner: TypeHint) -> Self {
        Self::generic(builtin::CLASS_VAR, vec![inner])
    }

    /// Parse an annotation string such as `Optional[List["Album"]]`.
    ///
    /// # Errors
    ///
    /// Returns `AnnotationError::InvalidHint` on malformed input.
    pub fn parse(source: &str) -> Result<Self, AnnotationError> {
        let mut parser = Parser {
            source,
            chars: source.char_indices().peekable(),
            depth: 0,
        };
        let hint = parser.hint()?;
        parser.skip_ws();
        if let Some((pos, c)) = parser.chars.next() {
            return Err(parser.error(format!("unexpected '{c}' at {pos}")));
        }
        Ok(hint)
    }

    /// The wrapped type if this hint is exactly "T or None".
    ///
    /// Unions with more than one non-`None` member are not optionals.
    pub fn optional_inner(&self) -> Option<&TypeHint> {
        match self {
            TypeHint::Union(members) if members.len() == 2 => {
                match (&members[0], &members[1]) {
                    (inner, TypeHint::NoneType) | (TypeHint::NoneType, inner)
                        if *inner != TypeHint::NoneType =>
                    {
                        Some(inner)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Whether this hint marks a class-level (non-instance) variable.
    pub fn is_class_var(&self) -> bool {
        match self {
            TypeHint::Named(name) => name == builtin::CLASS_VAR,
            TypeHint::Generic { origin, .. } => origin == builtin::CLASS_VAR,
            _ => false,
        }
    }

    /// Unparameterized origin of a generic hint.
    pub fn origin(&self) -> Option<TypeHint> {
        match self {
            TypeHint::Generic { origin, .. } => Some(TypeHint::Named(origin.clone())),
            _ => None,
        }
    }

    /// Type arguments of a generic hint, empty otherwise.
    pub fn args(&self) -> &[TypeHint] {
        match self {
            TypeHint::Generic { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, TypeHint::Named(name) if SEQUENCE_ORIGINS.contains(&name.as_str()))
    }
}

impl From<&str> for TypeHint {
    /// Treats the whole string as a type name; use [`TypeHint::parse`] for
    /// annotation syntax.
    fn from(name: &str) -> Self {
        TypeHint::Named(name.to_string())
    }
}

impl FromStr for TypeHint {
    type Err = AnnotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TypeHint::parse(s)
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeHint::Named(name) => f.write_str(name),
            TypeHint::NoneType => f.write_str("None"),
            TypeHint::Generic { origin, args } => {
                write!(f, "{origin}[")?;
                write_list(f, args)?;
                f.write_str("]")
            }
            TypeHint::Union(members) => {
                if let Some(inner) = self.optional_inner() {
                    return write!(f, "Optional[{inner}]");
                }
                f.write_str("Union[")?;
                write_list(f, members)?;
                f.write_str("]")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, hints: &[TypeHint]) -> fmt::Result {
    for (i, hint) in hints.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{hint}")?;
    }
    Ok(())
}

// --- Internal implementation ---

/// Deepest nesting of brackets and quotes a hint may use.
const MAX_DEPTH: usize = 64;

struct Parser<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    depth: usize,
}

impl Parser<'_> {
    fn error(&self, message: String) -> AnnotationError {
        AnnotationError::InvalidHint {
            hint: self.source.to_string(),
            message,
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn hint(&mut self) -> Result<TypeHint, AnnotationError> {
        if self.depth == MAX_DEPTH {
            return Err(self.error("hint nested too deeply".to_string()));
        }
        self.depth += 1;
        let hint = self.nested_hint();
        self.depth -= 1;
        hint
    }

    fn nested_hint(&mut self) -> Result<TypeHint, AnnotationError> {
        self.skip_ws();

        // Forward references may be quoted: List["Album"]
        if let Some(&(_, quote @ ('"' | '\''))) = self.chars.peek() {
            self.chars.next();
            let inner = self.hint()?;
            self.skip_ws();
            return match self.chars.next() {
                Some((_, c)) if c == quote => Ok(inner),
                _ => Err(self.error("unterminated quoted reference".to_string())),
            };
        }

        let name = self.name()?;
        self.skip_ws();

        let args = if matches!(self.chars.peek(), Some((_, '['))) {
            self.chars.next();
            self.arguments()?
        } else {
            Vec::new()
        };

        Ok(match (name.as_str(), args.is_empty()) {
            ("None" | "NoneType", true) => TypeHint::NoneType,
            ("Optional", false) => {
                if args.len() != 1 {
                    return Err(self.error("Optional takes exactly one argument".to_string()));
                }
                let mut args = args;
                TypeHint::optional(args.remove(0))
            }
            ("Union", false) => TypeHint::Union(args),
            (_, true) => TypeHint::Named(name),
            (_, false) => TypeHint::Generic { origin: name, args },
        })
    }

    fn name(&mut self) -> Result<String, AnnotationError> {
        let mut name = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '.' {
                name.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            let found = match self.chars.peek() {
                Some((pos, c)) => format!("'{c}' at {pos}"),
                None => "end of input".to_string(),
            };
            return Err(self.error(format!("expected a type name, found {found}")));
        }
        // Drop a `typing.` style module prefix
        Ok(match name.rsplit_once('.') {
            Some(("typing", short)) => short.to_string(),
            _ => name,
        })
    }

    fn arguments(&mut self) -> Result<Vec<TypeHint>, AnnotationError> {
        let mut args = Vec::new();
        loop {
            args.push(self.hint()?);
            self.skip_ws();
            match self.chars.next() {
                Some((_, ',')) => continue,
                Some((_, ']')) => return Ok(args),
                Some((pos, c)) => {
                    return Err(self.error(format!("expected ',' or ']', found '{c}' at {pos}")))
                }
                None => return Err(self.error("unclosed '['".to_string())),
            }
        }
    }
}
