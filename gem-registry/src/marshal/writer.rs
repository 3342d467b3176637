use std::collections::HashMap;

use crate::error::{AppError, AppResult};

pub const MAJOR_VERSION: u8 = 4;
pub const MINOR_VERSION: u8 = 8;

pub(crate) const NIL: u8 = b'0';
pub(crate) const TRUE: u8 = b'T';
pub(crate) const FALSE: u8 = b'F';
pub(crate) const FIXNUM: u8 = b'i';
pub(crate) const RAW_STRING: u8 = b'"';
pub(crate) const SYMBOL: u8 = b':';
pub(crate) const SYMBOL_LINK: u8 = b';';
pub(crate) const OBJECT_LINK: u8 = b'@';
pub(crate) const OBJECT: u8 = b'o';
pub(crate) const ARRAY: u8 = b'[';
pub(crate) const HASH: u8 = b'{';
pub(crate) const IVAR: u8 = b'I';
pub(crate) const USER_MARSHAL: u8 = b'U';

/// The subset of Ruby values the registry needs to emit.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    /// UTF-8 string, written with the `E` encoding ivar.
    Str(String),
    Symbol(String),
    Array(Vec<Value>),
    Hash(Vec<(Value, Value)>),
    /// `marshal_dump` output of `class`.
    UserMarshal(String, Box<Value>),
    /// Plain object of `class` with `(ivar, value)` pairs; ivar names include `@`.
    Object(String, Vec<(String, Value)>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn opt_str(s: Option<&str>) -> Self {
        s.map(Value::str).unwrap_or(Value::Nil)
    }

    pub fn str_array<S: AsRef<str>>(items: &[S]) -> Self {
        Value::Array(items.iter().map(|s| Value::str(s.as_ref())).collect())
    }

    /// `Gem::Version.new(version)`
    pub fn gem_version(version: &str) -> Self {
        Value::UserMarshal(
            "Gem::Version".to_string(),
            Box::new(Value::Array(vec![Value::str(version)])),
        )
    }
}

/// Serializes [`Value`]s into one Marshal stream, sharing a symbol table.
#[derive(Debug)]
pub struct Writer {
    buf: Vec<u8>,
    symbols: HashMap<String, usize>,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

impl Writer {
    pub fn new() -> Self {
        Self {
            buf: vec![MAJOR_VERSION, MINOR_VERSION],
            symbols: HashMap::new(),
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub(crate) fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    /// Marshal `w_long`: the variable-length integer used for fixnums and
    /// every length prefix.
    pub fn long(&mut self, value: i64) -> AppResult<()> {
        let mut x = i32::try_from(value).map_err(|_| AppError::EncodingLimitExceeded(value))?;
        match x {
            0 => self.buf.push(0),
            1..=122 => self.buf.push((x + 5) as u8),
            -123..=-1 => self.buf.push(((x - 5) & 0xff) as u8),
            _ => {
                let mut bytes = [0u8; 4];
                let mut len = 0;
                for (i, slot) in bytes.iter_mut().enumerate() {
                    *slot = (x & 0xff) as u8;
                    x >>= 8;
                    len = i + 1;
                    if x == 0 || x == -1 {
                        break;
                    }
                }
                let prefix = if x == -1 { -(len as i8) } else { len as i8 };
                self.buf.push(prefix as u8);
                self.buf.extend_from_slice(&bytes[..len]);
            }
        }
        Ok(())
    }

    fn len(&mut self, n: usize) -> AppResult<()> {
        let n = i64::try_from(n).map_err(|_| AppError::EncodingLimitExceeded(i64::MAX))?;
        self.long(n)
    }

    pub fn symbol(&mut self, name: &str) -> AppResult<()> {
        if let Some(&idx) = self.symbols.get(name) {
            self.byte(SYMBOL_LINK);
            return self.len(idx);
        }
        self.byte(SYMBOL);
        self.len(name.len())?;
        self.buf.extend_from_slice(name.as_bytes());
        let next = self.symbols.len();
        self.symbols.insert(name.to_string(), next);
        Ok(())
    }

    pub fn string(&mut self, s: &str) -> AppResult<()> {
        self.byte(IVAR);
        self.byte(RAW_STRING);
        self.len(s.len())?;
        self.buf.extend_from_slice(s.as_bytes());
        self.len(1)?;
        self.symbol("E")?;
        self.byte(TRUE);
        Ok(())
    }

    pub fn array_header(&mut self, n: usize) -> AppResult<()> {
        self.byte(ARRAY);
        self.len(n)
    }

    pub fn write(&mut self, value: &Value) -> AppResult<()> {
        match value {
            Value::Nil => self.byte(NIL),
            Value::Bool(true) => self.byte(TRUE),
            Value::Bool(false) => self.byte(FALSE),
            Value::Int(n) => {
                self.byte(FIXNUM);
                self.long(*n)?;
            }
            Value::Str(s) => self.string(s)?,
            Value::Symbol(s) => self.symbol(s)?,
            Value::Array(items) => {
                self.array_header(items.len())?;
                for item in items {
                    self.write(item)?;
                }
            }
            Value::Hash(pairs) => {
                self.byte(HASH);
                self.len(pairs.len())?;
                for (k, v) in pairs {
                    self.write(k)?;
                    self.write(v)?;
                }
            }
            Value::UserMarshal(class, inner) => {
                self.byte(USER_MARSHAL);
                self.symbol(class)?;
                self.write(inner)?;
            }
            Value::Object(class, ivars) => {
                self.byte(OBJECT);
                self.symbol(class)?;
                self.len(ivars.len())?;
                for (name, v) in ivars {
                    self.symbol(name)?;
                    self.write(v)?;
                }
            }
        }
        Ok(())
    }
}

/// Serialize a single value as a complete Marshal document.
pub fn dump(value: &Value) -> AppResult<Vec<u8>> {
    let mut w = Writer::new();
    w.write(value)?;
    Ok(w.finish())
}
