//! Magic rules and the tables they live in.
//!
//! A [`MagicRule`] is one compiled line of a magic database. Rules are kept
//! in file order inside a [`MagicTable`]; the `level` of each rule is the
//! only structure, so tables from several files concatenate without any
//! fix-ups.

use std::collections::TryReserveError;
use std::fmt;

use bitflags::bitflags;
use mime::Mime;

pub mod builtin;
pub mod check;
pub mod convert;
pub mod print;
pub mod ruleset;
pub mod sys;

/// Byte order of a multi-byte numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Native,
    Big,
    Little,
}

/// Numeric layouts a pointer or a field can be read as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    Byte,
    Short,
    Long,
    BEShort,
    BELong,
    LEShort,
    LELong,
}

impl NumericType {
    /// Width in bytes.
    pub fn width(self) -> usize {
        match self {
            NumericType::Byte => 1,
            NumericType::Short | NumericType::BEShort | NumericType::LEShort => 2,
            NumericType::Long | NumericType::BELong | NumericType::LELong => 4,
        }
    }

    pub fn endian(self) -> Endian {
        match self {
            NumericType::Byte | NumericType::Short | NumericType::Long => Endian::Native,
            NumericType::BEShort | NumericType::BELong => Endian::Big,
            NumericType::LEShort | NumericType::LELong => Endian::Little,
        }
    }
}

/// The type keyword of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Short,
    Long,
    String,
    Date,
    BEShort,
    BELong,
    BEDate,
    LEShort,
    LELong,
    LEDate,
}

impl FieldType {
    /// How the field is decoded from the buffer, or `None` for strings.
    ///
    /// Dates are stored as 4-byte second counts, so they decode as longs.
    pub fn numeric(self) -> Option<NumericType> {
        match self {
            FieldType::Byte => Some(NumericType::Byte),
            FieldType::Short => Some(NumericType::Short),
            FieldType::Long | FieldType::Date => Some(NumericType::Long),
            FieldType::BEShort => Some(NumericType::BEShort),
            FieldType::BELong | FieldType::BEDate => Some(NumericType::BELong),
            FieldType::LEShort => Some(NumericType::LEShort),
            FieldType::LELong | FieldType::LEDate => Some(NumericType::LELong),
            FieldType::String => None,
        }
    }

    /// Bytes consumed by a numeric field. Strings report 0; their length
    /// depends on what matched.
    pub fn width(self) -> usize {
        self.numeric().map_or(0, NumericType::width)
    }

    pub fn is_date(self) -> bool {
        matches!(self, FieldType::Date | FieldType::BEDate | FieldType::LEDate)
    }

    pub fn is_string(self) -> bool {
        self == FieldType::String
    }
}

/// The indirect part of `(base.t+add)` offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indirect {
    pub base_offset: i32,
    pub pointer_type: NumericType,
    /// Magnitude of the displacement added to the pointer value.
    pub relative_add: i32,
    /// `1` or `-1`.
    pub sign: i8,
}

impl Indirect {
    /// Signed amount added to the pointer value read at `base_offset`.
    pub fn displacement(&self) -> i64 {
        if self.sign < 0 {
            -i64::from(self.relative_add)
        } else {
            i64::from(self.relative_add)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offset {
    Absolute(i32),
    Indirect(Indirect),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Operation applied to a numeric field before comparison, with its result
/// optionally bit-inverted (`~`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskOp {
    pub op: ArithOp,
    pub inverted: bool,
}

impl MaskOp {
    pub fn and() -> MaskOp {
        MaskOp {
            op: ArithOp::And,
            inverted: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Equal,
    NotEqual,
    Greater,
    Less,
    /// All bits of the value are set.
    BitAnd,
    /// At least one bit of the value is clear.
    BitXorNot,
    Always,
}

bitflags! {
    /// Comparison modes of string rules.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StringFlags: u8 {
        /// `c`: lowercase pattern letters also match uppercase input.
        const IGNORE_CASE = 0b001;
        /// `B`: a blank in the pattern needs at least one blank in the input.
        const COMPACT_BLANK = 0b010;
        /// `b`: a blank in the pattern matches any number of input blanks.
        const COMPACT_OPTIONAL_BLANK = 0b100;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchValue {
    Numeric(i64),
    Bytes { data: Vec<u8>, flags: StringFlags },
}

impl MatchValue {
    /// Number of pattern bytes; numeric values report 0.
    pub fn len(&self) -> usize {
        match self {
            MatchValue::Numeric(_) => 0,
            MatchValue::Bytes { data, .. } => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One compiled line of a magic database.
#[derive(Debug, Clone, PartialEq)]
pub struct MagicRule {
    /// Continuation depth: 0 starts an entry, N continues the nearest
    /// preceding rule at N-1.
    pub level: u16,
    pub offset: Offset,
    /// `&` offsets count from where the parent's match ended.
    pub relative_to_parent: bool,
    pub field_type: FieldType,
    pub unsigned: bool,
    pub mask: u32,
    pub mask_op: Option<MaskOp>,
    pub relation: Relation,
    pub value: MatchValue,
    /// printf-style template with at most one conversion.
    pub description: String,
    pub no_leading_space: bool,
    pub mime: Option<Mime>,
}

impl Default for MagicRule {
    fn default() -> MagicRule {
        MagicRule {
            level: 0,
            offset: Offset::Absolute(0),
            relative_to_parent: false,
            field_type: FieldType::Byte,
            unsigned: false,
            mask: 0,
            mask_op: None,
            relation: Relation::Always,
            value: MatchValue::Numeric(0),
            description: String::new(),
            no_leading_space: false,
            mime: None,
        }
    }
}

/// An ordered, immutable sequence of rules.
///
/// Entries are delimited implicitly: every level-0 rule starts one, and the
/// rules following it with a level above 0 are its continuations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MagicTable {
    rules: Vec<MagicRule>,
}

impl MagicTable {
    pub fn new() -> MagicTable {
        MagicTable::default()
    }

    pub fn rules(&self) -> &[MagicRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Appends every rule of `other` after the rules already present.
    pub fn append(&mut self, mut other: MagicTable) -> Result<(), TryReserveError> {
        self.rules.try_reserve(other.rules.len())?;
        self.rules.append(&mut other.rules);
        Ok(())
    }

    pub(crate) fn push(&mut self, rule: MagicRule) -> Result<(), TryReserveError> {
        self.rules.try_reserve(1)?;
        self.rules.push(rule);
        Ok(())
    }

    pub(crate) fn last_mut(&mut self) -> Option<&mut MagicRule> {
        self.rules.last_mut()
    }

    /// Iterates over entries: a level-0 rule followed by its continuations.
    ///
    /// Continuations that precede the first level-0 rule belong to no entry
    /// and are skipped.
    pub fn entries(&self) -> Entries<'_> {
        let start = self
            .rules
            .iter()
            .position(|r| r.level == 0)
            .unwrap_or(self.rules.len());
        Entries {
            rest: &self.rules[start..],
        }
    }
}

impl From<Vec<MagicRule>> for MagicTable {
    fn from(rules: Vec<MagicRule>) -> MagicTable {
        MagicTable { rules }
    }
}

impl std::iter::FromIterator<MagicRule> for MagicTable {
    fn from_iter<I: IntoIterator<Item = MagicRule>>(iter: I) -> MagicTable {
        MagicTable {
            rules: iter.into_iter().collect(),
        }
    }
}

pub struct Entries<'a> {
    rest: &'a [MagicRule],
}

impl<'a> Iterator for Entries<'a> {
    type Item = &'a [MagicRule];

    fn next(&mut self) -> Option<&'a [MagicRule]> {
        if self.rest.is_empty() {
            return None;
        }
        let end = self.rest[1..]
            .iter()
            .position(|r| r.level == 0)
            .map_or(self.rest.len(), |p| p + 1);
        let (entry, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(entry)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self {
            Relation::Equal => '=',
            Relation::NotEqual => '!',
            Relation::Greater => '>',
            Relation::Less => '<',
            Relation::BitAnd => '&',
            Relation::BitXorNot => '^',
            Relation::Always => 'x',
        };
        write!(f, "{c}")
    }
}
