//! Mangled-signature grammar.
//!
//! Thunk symbols carry their full signature in an underscore-delimited,
//! length-prefixed mangled name:
//!
//! ```text
//! entry      = ("export" | "import") function
//! function   = ident arg-count arg* return-type
//! arg        = ident input-type
//! input-type = ("bor" | "bormut")? base-type
//! base-type  = "prim" primitive | "pair" base-type base-type | "vec" base-type
//! primitive  = integer | "ptr" integer | "ptrmut" integer | "string" | "unit"
//! ident      = decimal-length "_" that-many-characters
//! ```
//!
//! Parsing is plain recursive descent over a token cursor and must consume
//! the entire input; any leftover is a grammar error.

use crate::error::{FlatbinError, Result};

/// Whether the thunk crosses the boundary out of or into the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The image exposes the function; the host calls it.
    Export,
    /// The host implements the function; the image calls back into it.
    Import,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
    Isize,
    U8,
    U16,
    U32,
    U64,
    Usize,
    Bool,
}

impl IntType {
    const ALL: [(&'static str, IntType); 11] = [
        ("i8", IntType::I8),
        ("i16", IntType::I16),
        ("i32", IntType::I32),
        ("i64", IntType::I64),
        ("isize", IntType::Isize),
        ("u8", IntType::U8),
        ("u16", IntType::U16),
        ("u32", IntType::U32),
        ("u64", IntType::U64),
        ("usize", IntType::Usize),
        ("bool", IntType::Bool),
    ];
}

/// Tagged type tree for parameter and return types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseType {
    Int(IntType),
    Ptr(IntType),
    PtrMut(IntType),
    Str,
    Unit,
    Pair(Box<BaseType>, Box<BaseType>),
    Vector(Box<BaseType>),
}

/// Pass mode of an input parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Owned,
    Borrow,
    BorrowMut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub mode: InputMode,
    pub ty: BaseType,
}

/// A fully parsed signature; immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub mangled: String,
    pub direction: Direction,
    pub ident: String,
    pub params: Vec<Param>,
    pub ret: BaseType,
}

struct Cursor<'a> {
    input: &'a str,
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str, rest: &'a str) -> Self {
        Self { input, rest }
    }

    fn err(&self, message: impl Into<String>) -> FlatbinError {
        FlatbinError::Grammar {
            input: self.input.to_string(),
            message: message.into(),
        }
    }

    /// Take everything up to the next underscore (or the end) and consume
    /// the underscore.
    fn token(&mut self) -> &'a str {
        match self.rest.find('_') {
            Some(i) => {
                let out = &self.rest[..i];
                self.rest = &self.rest[i + 1..];
                out
            }
            None => std::mem::take(&mut self.rest),
        }
    }

    /// Take exactly `n` bytes (underscores included) and consume one
    /// trailing separator if present. This is how identifiers may contain
    /// underscores.
    fn token_by_count(&mut self, n: usize) -> Result<&'a str> {
        if self.rest.len() < n || !self.rest.is_char_boundary(n) {
            return Err(self.err(format!(
                "identifier of {n} bytes promised, input cannot supply it"
            )));
        }
        let out = &self.rest[..n];
        self.rest = &self.rest[n..];
        if let Some(stripped) = self.rest.strip_prefix('_') {
            self.rest = stripped;
        }
        Ok(out)
    }

    fn number(&mut self) -> Result<usize> {
        let tok = self.token();
        tok.parse()
            .map_err(|_| self.err(format!("expected a count, found {tok:?}")))
    }

    fn ident(&mut self) -> Result<&'a str> {
        let n = self.number()?;
        self.token_by_count(n)
    }

    /// Consume `tok` if the next token equals it.
    fn try_match(&mut self, tok: &str) -> bool {
        if let Some(after) = self.rest.strip_prefix(tok) {
            if after.is_empty() {
                self.rest = after;
                return true;
            }
            if let Some(after) = after.strip_prefix('_') {
                self.rest = after;
                return true;
            }
        }
        false
    }

    fn ensure_empty(&self) -> Result<()> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.err(format!("trailing input {:?}", self.rest)))
        }
    }
}

fn int_type(cur: &mut Cursor) -> Option<IntType> {
    IntType::ALL
        .iter()
        .find(|&&(name, _)| cur.try_match(name))
        .map(|&(_, ty)| ty)
}

fn base_type(cur: &mut Cursor) -> Result<BaseType> {
    if cur.try_match("prim") {
        if let Some(i) = int_type(cur) {
            return Ok(BaseType::Int(i));
        }
        if cur.try_match("ptr") {
            return int_type(cur)
                .map(BaseType::Ptr)
                .ok_or_else(|| cur.err("ptr must point at an integer type"));
        }
        if cur.try_match("ptrmut") {
            return int_type(cur)
                .map(BaseType::PtrMut)
                .ok_or_else(|| cur.err("ptrmut must point at an integer type"));
        }
        if cur.try_match("string") {
            return Ok(BaseType::Str);
        }
        if cur.try_match("unit") {
            return Ok(BaseType::Unit);
        }
        return Err(cur.err("unknown primitive"));
    }
    if cur.try_match("pair") {
        let a = base_type(cur)?;
        let b = base_type(cur)?;
        return Ok(BaseType::Pair(Box::new(a), Box::new(b)));
    }
    if cur.try_match("vec") {
        return Ok(BaseType::Vector(Box::new(base_type(cur)?)));
    }
    Err(cur.err("expected prim, pair or vec"))
}

fn input_type(cur: &mut Cursor) -> Result<(InputMode, BaseType)> {
    let mode = if cur.try_match("bor") {
        InputMode::Borrow
    } else if cur.try_match("bormut") {
        InputMode::BorrowMut
    } else {
        InputMode::Owned
    };
    Ok((mode, base_type(cur)?))
}

impl Signature {
    /// Parse a mangled name, with or without the reserved `_flat_` symbol
    /// prefix.
    pub fn parse(mangled: &str) -> Result<Self> {
        let rest = mangled.strip_prefix("_flat_").unwrap_or(mangled);
        let mut cur = Cursor::new(mangled, rest);

        let direction = if cur.try_match("export") {
            Direction::Export
        } else if cur.try_match("import") {
            Direction::Import
        } else {
            return Err(cur.err("expected export or import"));
        };

        let ident = cur.ident()?.to_string();
        let count = cur.number()?;
        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            let name = cur.ident()?.to_string();
            let (mode, ty) = input_type(&mut cur)?;
            params.push(Param { name, mode, ty });
        }
        let ret = base_type(&mut cur)?;
        cur.ensure_empty()?;

        Ok(Signature {
            mangled: mangled.to_string(),
            direction,
            ident,
            params,
            ret,
        })
    }
}
