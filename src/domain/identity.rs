//! Function identities shared by the static builder and the dynamic collector.
//!
//! Canonical string forms:
//! - free function: `unit::name`
//! - method / associated function: `(unit::Type)::name`, or
//!   `(&unit::Type)::name` for a by-reference receiver
//! - closures: one `$N` per nesting level, e.g. `unit::run$1$2`

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::IdentityError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionIdentity {
    defining_unit: String,
    owner_type: Option<String>,
    owner_is_ref_receiver: bool,
    name: String,
    closure_depth: Vec<u32>,
}

impl FunctionIdentity {
    pub fn free(unit: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            defining_unit: unit.into(),
            owner_type: None,
            owner_is_ref_receiver: false,
            name: name.into(),
            closure_depth: Vec::new(),
        }
    }

    pub fn method(
        unit: impl Into<String>,
        owner: impl Into<String>,
        ref_receiver: bool,
        name: impl Into<String>,
    ) -> Self {
        Self {
            defining_unit: unit.into(),
            owner_type: Some(owner.into()),
            owner_is_ref_receiver: ref_receiver,
            name: name.into(),
            closure_depth: Vec::new(),
        }
    }

    /// The identity of the `ordinal`-th closure (1-based) nested one level
    /// below `self`.
    pub fn closure(&self, ordinal: u32) -> Self {
        let mut child = self.clone();
        child.closure_depth.push(ordinal);
        child
    }

    /// The enclosing named function, without closure levels.
    pub fn base(&self) -> Self {
        Self {
            closure_depth: Vec::new(),
            ..self.clone()
        }
    }

    pub fn defining_unit(&self) -> &str {
        &self.defining_unit
    }

    pub fn owner_type(&self) -> Option<&str> {
        self.owner_type.as_deref()
    }

    pub fn is_ref_receiver(&self) -> bool {
        self.owner_is_ref_receiver
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn closure_depth(&self) -> &[u32] {
        &self.closure_depth
    }

    pub fn is_closure(&self) -> bool {
        !self.closure_depth.is_empty()
    }

    /// First segment of the defining unit: the crate the function lives in.
    pub fn package(&self) -> &str {
        self.defining_unit.split("::").next().unwrap_or_default()
    }

    /// Function name with closure suffixes (`run$1$2`), the positional name
    /// used to find anonymous functions in source.
    pub fn positional_name(&self) -> String {
        let mut out = self.name.clone();
        for ordinal in &self.closure_depth {
            out.push('$');
            out.push_str(&ordinal.to_string());
        }
        out
    }

    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Parse any of the accepted raw spellings into an identity.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }

        let mut closures = Vec::new();
        let mut segments: Vec<&str> = Vec::new();
        for (idx, seg) in split_path(raw).into_iter().enumerate() {
            let seg = seg.trim();
            if seg == "{{closure}}" {
                closures.push(1);
            } else if let Some(n) = seg
                .strip_prefix("{closure#")
                .and_then(|s| s.strip_suffix('}'))
            {
                let n: u32 = n
                    .parse()
                    .map_err(|_| IdentityError::Malformed(raw.to_string()))?;
                closures.push(n + 1);
            } else if seg.starts_with('{')
                || is_symbol_hash(seg)
                || seg.chars().all(|c| c.is_ascii_digit())
                || (idx > 0 && seg.starts_with('<'))
            {
                // demangler artefacts: impl blocks, hashes, numbering, turbofish
            } else if !seg.is_empty() {
                segments.push(seg);
            }
        }

        let last = segments
            .pop()
            .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;
        let mut parts = last.split('$');
        let name = parts.next().unwrap_or_default().to_string();
        let mut suffix = Vec::new();
        for part in parts {
            let n: u32 = part
                .parse()
                .map_err(|_| IdentityError::Malformed(raw.to_string()))?;
            suffix.push(n);
        }
        if !is_ident(&name) {
            return Err(IdentityError::Malformed(raw.to_string()));
        }
        // `$N` suffixes are already outermost-first; demangler markers follow them.
        suffix.extend(closures);

        let receiver_at = segments
            .iter()
            .position(|s| s.starts_with('(') || s.starts_with('<'));
        let mut ident = match receiver_at {
            Some(pos) => {
                if pos + 1 != segments.len() {
                    return Err(IdentityError::Malformed(raw.to_string()));
                }
                let (is_ref, path) = receiver_type(segments[pos])
                    .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;
                let mut type_path: Vec<&str> = segments[..pos].to_vec();
                type_path.extend(split_path(path));
                let owner = type_path
                    .pop()
                    .map(strip_generics)
                    .filter(|o| !o.is_empty())
                    .ok_or_else(|| IdentityError::Malformed(raw.to_string()))?;
                FunctionIdentity::method(type_path.join("::"), owner, is_ref, name)
            }
            None => match segments.last() {
                Some(owner) if starts_uppercase(owner) => {
                    let owner = strip_generics(owner);
                    let unit = segments[..segments.len() - 1].join("::");
                    FunctionIdentity::method(unit, owner, false, name)
                }
                _ => FunctionIdentity::free(segments.join("::"), name),
            },
        };
        ident.closure_depth = suffix;
        Ok(ident)
    }
}

impl fmt::Display for FunctionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner_type {
            Some(owner) => {
                write!(f, "(")?;
                if self.owner_is_ref_receiver {
                    write!(f, "&")?;
                }
                if !self.defining_unit.is_empty() {
                    write!(f, "{}::", self.defining_unit)?;
                }
                write!(f, "{})::{}", owner, self.name)?;
            }
            None if self.defining_unit.is_empty() => write!(f, "{}", self.name)?,
            None => write!(f, "{}::{}", self.defining_unit, self.name)?,
        }
        for ordinal in &self.closure_depth {
            write!(f, "${}", ordinal)?;
        }
        Ok(())
    }
}

/// Canonicalize a raw call-site identifier. Input that cannot be parsed is
/// returned trimmed, so the function stays total and idempotent.
pub fn normalize(raw: &str) -> String {
    match FunctionIdentity::parse(raw) {
        Ok(ident) => ident.canonical(),
        Err(_) => raw.trim().to_string(),
    }
}

/// Split on `::` outside of `<>`, `()` and `{}`.
fn split_path(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'<' | b'(' | b'{' => depth += 1,
            b'>' | b')' | b'}' => depth -= 1,
            b':' if depth == 0 && bytes.get(i + 1) == Some(&b':') => {
                out.push(&s[start..i]);
                i += 2;
                start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }
    out.push(&s[start..]);
    out
}

/// `(&a::T)`, `(a::T)`, `(*a::T)`, `<a::T as Tr>`, `<&mut a::T>` ->
/// (by-reference, type path).
fn receiver_type(seg: &str) -> Option<(bool, &str)> {
    let inner = if let Some(s) = seg.strip_prefix('(') {
        s.strip_suffix(')')?
    } else {
        let s = seg.strip_prefix('<')?.strip_suffix('>')?;
        match s.find(" as ") {
            Some(pos) => &s[..pos],
            None => s,
        }
    };
    let inner = inner.trim();
    let (is_ref, rest) = match inner.strip_prefix('&').or_else(|| inner.strip_prefix('*')) {
        Some(rest) => (true, rest.trim_start()),
        None => (false, inner),
    };
    let rest = rest.strip_prefix("mut ").unwrap_or(rest).trim();
    if rest.is_empty() {
        None
    } else {
        Some((is_ref, rest))
    }
}

fn strip_generics(s: &str) -> String {
    match s.find('<') {
        Some(pos) => s[..pos].to_string(),
        None => s.to_string(),
    }
}

fn starts_uppercase(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

fn is_symbol_hash(seg: &str) -> bool {
    seg.len() == 17 && seg.starts_with('h') && seg[1..].chars().all(|c| c.is_ascii_hexdigit())
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_alphanumeric())
}
