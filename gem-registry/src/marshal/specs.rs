//! `specs.4.8` index encoding.
//!
//! Layout: an outer array with one `[name, Gem::Version, platform]` triple per
//! entry. Strings carry the UTF-8 `E` ivar; the `:E` and `:Gem::Version`
//! symbols are written once and linked afterwards.

use super::writer::{
    Value, Writer, ARRAY, IVAR, MAJOR_VERSION, MINOR_VERSION, OBJECT_LINK, RAW_STRING, SYMBOL,
    SYMBOL_LINK, TRUE, USER_MARSHAL,
};
use crate::error::{AppError, AppResult};
use crate::spec::PackageMetadata;
use crate::store::PackageVersion;

/// One row of a binary spec index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub name: String,
    pub version: String,
    pub platform: String,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            platform: platform.into(),
        }
    }
}

impl From<&PackageMetadata> for IndexEntry {
    fn from(meta: &PackageMetadata) -> Self {
        IndexEntry::new(&meta.name, &meta.version, &meta.original_platform)
    }
}

impl From<&PackageVersion> for IndexEntry {
    fn from(v: &PackageVersion) -> Self {
        IndexEntry::new(&v.name, &v.number, &v.platform)
    }
}

pub fn encode_specs(entries: &[IndexEntry]) -> AppResult<Vec<u8>> {
    let mut w = Writer::new();
    w.array_header(entries.len())?;
    for entry in entries {
        w.array_header(3)?;
        w.string(&entry.name)?;
        w.write(&Value::gem_version(&entry.version))?;
        w.string(&entry.platform)?;
    }
    Ok(w.finish())
}

/// Decode a spec index as a Ruby client would, resolving symbol and object
/// links.
pub fn decode_specs(bytes: &[u8]) -> AppResult<Vec<IndexEntry>> {
    let mut r = Reader::new(bytes);
    if r.u8()? != MAJOR_VERSION || r.u8()? != MINOR_VERSION {
        return Err(r.error("unsupported marshal version"));
    }
    r.expect(ARRAY)?;
    let count = r.count()?;
    r.register(None);

    let mut entries = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        r.expect(ARRAY)?;
        r.register(None);
        if r.long()? != 3 {
            return Err(r.error("spec tuple must have three elements"));
        }
        let name = r.string()?;
        let version = r.version()?;
        let platform = r.string()?;
        entries.push(IndexEntry {
            name,
            version,
            platform,
        });
    }
    Ok(entries)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    symbols: Vec<String>,
    /// Object table in Marshal registration order; only strings are linkable here.
    objects: Vec<Option<String>>,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            symbols: Vec::new(),
            objects: Vec::new(),
        }
    }

    fn error(&self, reason: &str) -> AppError {
        AppError::InternalError(format!("invalid spec index at byte {}: {reason}", self.pos))
    }

    fn u8(&mut self) -> AppResult<u8> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    fn expect(&mut self, tag: u8) -> AppResult<()> {
        let b = self.u8()?;
        if b != tag {
            return Err(self.error(&format!(
                "expected {:?}, found {:?}",
                tag as char, b as char
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> AppResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| self.error("length runs past end of input"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn long(&mut self) -> AppResult<i64> {
        let c = self.u8()? as i8;
        let value = match c {
            0 => 0,
            5..=127 => i64::from(c) - 5,
            -128..=-5 => i64::from(c) + 5,
            1..=4 => {
                let mut x: i64 = 0;
                for (i, b) in self.take(c as usize)?.iter().enumerate() {
                    x |= i64::from(*b) << (8 * i);
                }
                x
            }
            _ => {
                let n = (-c) as usize;
                let mut x: i64 = -1;
                for (i, b) in self.take(n)?.iter().enumerate() {
                    x &= !(0xff << (8 * i));
                    x |= i64::from(*b) << (8 * i);
                }
                x
            }
        };
        Ok(value)
    }

    fn count(&mut self) -> AppResult<usize> {
        usize::try_from(self.long()?).map_err(|_| self.error("negative length"))
    }

    fn register(&mut self, value: Option<String>) -> usize {
        self.objects.push(value);
        self.objects.len() - 1
    }

    fn symbol(&mut self) -> AppResult<String> {
        match self.u8()? {
            SYMBOL => {
                let len = self.count()?;
                let raw = self.take(len)?;
                let sym = String::from_utf8_lossy(raw).into_owned();
                self.symbols.push(sym.clone());
                Ok(sym)
            }
            SYMBOL_LINK => {
                let idx = self.count()?;
                self.symbols
                    .get(idx)
                    .cloned()
                    .ok_or_else(|| self.error("dangling symbol link"))
            }
            _ => Err(self.error("expected a symbol")),
        }
    }

    fn object_link(&mut self) -> AppResult<String> {
        let idx = self.count()?;
        self.objects
            .get(idx)
            .cloned()
            .flatten()
            .ok_or_else(|| self.error("object link does not point at a string"))
    }

    fn string(&mut self) -> AppResult<String> {
        match self.u8()? {
            OBJECT_LINK => self.object_link(),
            IVAR => {
                self.expect(RAW_STRING)?;
                let len = self.count()?;
                let value = String::from_utf8_lossy(self.take(len)?).into_owned();
                self.register(Some(value.clone()));
                let ivars = self.count()?;
                for _ in 0..ivars {
                    self.symbol()?;
                    let flag = self.u8()?;
                    if flag != TRUE && flag != b'F' {
                        return Err(self.error("unsupported string ivar value"));
                    }
                }
                Ok(value)
            }
            RAW_STRING => {
                let len = self.count()?;
                let value = String::from_utf8_lossy(self.take(len)?).into_owned();
                self.register(Some(value.clone()));
                Ok(value)
            }
            _ => Err(self.error("expected a string")),
        }
    }

    fn version(&mut self) -> AppResult<String> {
        match self.u8()? {
            OBJECT_LINK => self.object_link(),
            USER_MARSHAL => {
                let class = self.symbol()?;
                if class != "Gem::Version" {
                    return Err(self.error("expected Gem::Version"));
                }
                let slot = self.register(None);
                self.expect(ARRAY)?;
                self.register(None);
                if self.count()? != 1 {
                    return Err(self.error("Gem::Version dump must hold one element"));
                }
                let version = self.string()?;
                self.objects[slot] = Some(version.clone());
                Ok(version)
            }
            _ => Err(self.error("expected a Gem::Version")),
        }
    }
}
