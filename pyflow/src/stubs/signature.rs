//! Compact signature notation used by the stub table.
//!
//! ```text
//! (self, x: T, y: int = ..., *args, **kwargs) -> list[T]
//! ```
//!
//! Types are class names, generic instances `name[T, ...]`, unions
//! `A or B` and the unknown type `?`. A single upper-case letter, optionally
//! followed by digits, is a type variable. `None` is `NoneType`.

use std::fmt;

use logos::Logos;

use super::StubError;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token("...")]
    Ellipsis,
    #[token("->")]
    Arrow,
    #[token("**")]
    StarStar,
    #[token("*")]
    Star,
    #[token("?")]
    Question,
    #[token("or")]
    Or,
    #[regex(r"[A-Za-z_][A-Za-z0-9_.]*", |lex| lex.slice().to_string())]
    Name(String),
}

/// A type in a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    /// `?`: anything, and produces an unsolvable value when returned.
    Any,
    /// A class name.
    Name(String),
    /// A type variable such as `T` or `K2`.
    TypeVar(String),
    /// `name[params]`.
    Generic(String, Vec<TypeExpr>),
    /// `A or B`.
    Union(Vec<TypeExpr>),
}

impl TypeExpr {
    fn from_name(name: String) -> Self {
        if is_type_var(&name) {
            TypeExpr::TypeVar(name)
        } else if name == "None" {
            TypeExpr::Name("NoneType".to_string())
        } else {
            TypeExpr::Name(name)
        }
    }

    /// Class names mentioned anywhere in the type.
    pub fn class_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TypeExpr::Any | TypeExpr::TypeVar(_) => {}
            TypeExpr::Name(name) => out.push(name),
            TypeExpr::Generic(name, params) => {
                out.push(name);
                for p in params {
                    p.collect_names(out);
                }
            }
            TypeExpr::Union(options) => {
                for o in options {
                    o.collect_names(out);
                }
            }
        }
    }
}

fn is_type_var(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_digit())
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Any => f.write_str("?"),
            TypeExpr::Name(name) | TypeExpr::TypeVar(name) => f.write_str(name),
            TypeExpr::Generic(name, params) => {
                write!(f, "{}[", name)?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                f.write_str("]")
            }
            TypeExpr::Union(options) => {
                for (i, o) in options.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{}", o)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    /// `None` for untyped parameters (usually `self`).
    pub ty: Option<TypeExpr>,
    pub has_default: bool,
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(ty) = &self.ty {
            write!(f, ": {}", ty)?;
        }
        if self.has_default {
            f.write_str(" = ...")?;
        }
        Ok(())
    }
}

/// One overload of a library function.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub params: Vec<Param>,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    pub ret: TypeExpr,
}

impl Signature {
    pub fn parse(text: &str) -> Result<Self, StubError> {
        let mut tokens = Vec::new();
        let mut lexer = Token::lexer(text);
        while let Some(token) = lexer.next() {
            match token {
                Ok(t) => tokens.push(t),
                Err(()) => {
                    return Err(StubError::Signature {
                        text: text.to_string(),
                        message: format!("unexpected character at offset {}", lexer.span().start),
                    })
                }
            }
        }
        let mut parser = SigParser {
            text,
            tokens,
            pos: 0,
        };
        let sig = parser.signature()?;
        if parser.pos != parser.tokens.len() {
            return Err(parser.error("trailing input"));
        }
        Ok(sig)
    }

    /// Number of parameters that must be passed.
    pub fn min_args(&self) -> usize {
        self.params.iter().filter(|p| !p.has_default).count()
    }

    /// Upper bound on positional arguments, `None` with `*args`.
    pub fn max_args(&self) -> Option<usize> {
        match self.varargs {
            Some(_) => None,
            None => Some(self.params.len()),
        }
    }

    pub fn accepts_count(&self, count: usize) -> bool {
        count >= self.min_args() && self.max_args().map_or(true, |max| count <= max)
    }

    /// Parameter list without the return type, as shown in error details.
    pub fn params_display(&self) -> String {
        let mut parts: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        if let Some(name) = &self.varargs {
            parts.push(format!("*{}", name));
        }
        if let Some(name) = &self.kwargs {
            parts.push(format!("**{}", name));
        }
        format!("({})", parts.join(", "))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.params_display(), self.ret)
    }
}

struct SigParser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl SigParser<'_> {
    fn error(&self, message: &str) -> StubError {
        StubError::Signature {
            text: self.text.to_string(),
            message: format!("{} at token {}", message, self.pos),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), StubError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {}", what)))
        }
    }

    fn name(&mut self) -> Result<String, StubError> {
        match self.tokens.get(self.pos) {
            Some(Token::Name(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected a name")),
        }
    }

    fn signature(&mut self) -> Result<Signature, StubError> {
        self.expect(Token::LParen, "'('")?;
        let mut sig = Signature {
            params: Vec::new(),
            varargs: None,
            kwargs: None,
            ret: TypeExpr::Any,
        };
        if !self.eat(&Token::RParen) {
            loop {
                if self.eat(&Token::StarStar) {
                    sig.kwargs = Some(self.name()?);
                } else if self.eat(&Token::Star) {
                    sig.varargs = Some(self.name()?);
                } else {
                    let name = self.name()?;
                    let ty = if self.eat(&Token::Colon) {
                        Some(self.type_expr()?)
                    } else {
                        None
                    };
                    let has_default = if self.eat(&Token::Equals) {
                        self.expect(Token::Ellipsis, "'...'")?;
                        true
                    } else {
                        false
                    };
                    if sig.params.iter().any(|p| p.name == name) {
                        return Err(self.error(&format!("duplicate parameter {}", name)));
                    }
                    sig.params.push(Param {
                        name,
                        ty,
                        has_default,
                    });
                }
                if self.eat(&Token::RParen) {
                    break;
                }
                self.expect(Token::Comma, "',' or ')'")?;
            }
        }
        self.expect(Token::Arrow, "'->'")?;
        sig.ret = self.type_expr()?;
        Ok(sig)
    }

    fn type_expr(&mut self) -> Result<TypeExpr, StubError> {
        let mut options = vec![self.type_atom()?];
        while self.eat(&Token::Or) {
            options.push(self.type_atom()?);
        }
        Ok(if options.len() == 1 {
            options.remove(0)
        } else {
            TypeExpr::Union(options)
        })
    }

    fn type_atom(&mut self) -> Result<TypeExpr, StubError> {
        if self.eat(&Token::Question) {
            return Ok(TypeExpr::Any);
        }
        let name = self.name()?;
        if !self.eat(&Token::LBracket) {
            return Ok(TypeExpr::from_name(name));
        }
        let mut params = vec![self.type_expr()?];
        while self.eat(&Token::Comma) {
            params.push(self.type_expr()?);
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(TypeExpr::Generic(name, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_signature() {
        let sig = Signature::parse("(self, x: T, y: int = ..., *args, **kwargs) -> list[T]").unwrap();
        assert_eq!(sig.params.len(), 3);
        assert_eq!(sig.params[0].ty, None);
        assert_eq!(sig.params[1].ty, Some(TypeExpr::TypeVar("T".into())));
        assert!(sig.params[2].has_default);
        assert_eq!(sig.varargs.as_deref(), Some("args"));
        assert_eq!(sig.kwargs.as_deref(), Some("kwargs"));
        assert_eq!(
            sig.ret,
            TypeExpr::Generic("list".into(), vec![TypeExpr::TypeVar("T".into())])
        );
        assert_eq!(sig.min_args(), 2);
        assert_eq!(sig.max_args(), None);
    }

    #[test]
    fn test_union_none_and_unknown() {
        let sig = Signature::parse("(x: int or None) -> ?").unwrap();
        assert_eq!(
            sig.params[0].ty,
            Some(TypeExpr::Union(vec![
                TypeExpr::Name("int".into()),
                TypeExpr::Name("NoneType".into())
            ]))
        );
        assert_eq!(sig.ret, TypeExpr::Any);
    }

    #[test]
    fn test_empty_params() {
        let sig = Signature::parse("() -> str").unwrap();
        assert!(sig.accepts_count(0));
        assert!(!sig.accepts_count(1));
        assert_eq!(sig.to_string(), "() -> str");
    }

    #[test]
    fn test_type_var_detection() {
        assert!(is_type_var("T"));
        assert!(is_type_var("K2"));
        assert!(!is_type_var("TT"));
        assert!(!is_type_var("int"));
    }

    #[test]
    fn test_params_display() {
        let sig = Signature::parse("(x: int, y: str = ...) -> None").unwrap();
        assert_eq!(sig.params_display(), "(x: int, y: str = ...)");
        assert_eq!(sig.ret, TypeExpr::Name("NoneType".into()));
    }

    #[test]
    fn test_errors() {
        assert!(Signature::parse("(x: int").is_err());
        assert!(Signature::parse("(x: int) int").is_err());
        assert!(Signature::parse("(x, x) -> int").is_err());
        assert!(Signature::parse("(x: $) -> int").is_err());
        assert!(Signature::parse("(x) -> int extra").is_err());
    }
}
