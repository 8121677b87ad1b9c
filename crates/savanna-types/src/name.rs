use crate::error::TypesError;
use crate::pack::{Pack, Unpack};
use std::fmt;
use std::str::FromStr;

const NAME_CHARS: &[u8; 32] = b".12345abcdefghijklmnopqrstuvwxyz";

fn char_value(c: u8) -> Option<u64> {
    NAME_CHARS.iter().position(|&n| n == c).map(|p| p as u64)
}

/// Account name: up to 13 characters from `.12345a-z` packed into a u64.
///
/// The first twelve characters take five bits each from the most significant
/// end; a thirteenth character is limited to four bits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AccountName(pub u64);

impl AccountName {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for AccountName {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 13 {
            return Err(TypesError::InvalidName(format!("'{s}' is longer than 13 characters")));
        }
        let mut value: u64 = 0;
        for (i, &c) in s.as_bytes().iter().enumerate() {
            let v = char_value(c)
                .ok_or_else(|| TypesError::InvalidName(format!("'{s}' contains invalid character '{}'", c as char)))?;
            if i < 12 {
                value |= (v & 0x1f) << (64 - 5 * (i + 1));
            } else {
                if v > 0x0f {
                    return Err(TypesError::InvalidName(format!(
                        "thirteenth character of '{s}' must be one of '.12345abcdefghij'"
                    )));
                }
                value |= v;
            }
        }
        Ok(Self(value))
    }
}

impl fmt::Display for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut chars = [b'.'; 13];
        let mut v = self.0;
        for i in (0..13).rev() {
            let idx = if i == 12 { (v & 0x0f) as usize } else { (v & 0x1f) as usize };
            chars[i] = NAME_CHARS[idx];
            v >>= if i == 12 { 4 } else { 5 };
        }
        let s = std::str::from_utf8(&chars).map_err(|_| fmt::Error)?;
        write!(f, "{}", s.trim_end_matches('.'))
    }
}

impl fmt::Debug for AccountName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccountName({})", self)
    }
}

impl Pack for AccountName {
    fn pack(&self, out: &mut Vec<u8>) {
        self.0.pack(out);
    }
}

impl Unpack for AccountName {
    fn unpack(buf: &mut &[u8]) -> Result<Self, TypesError> {
        Ok(Self(u64::unpack(buf)?))
    }
}
