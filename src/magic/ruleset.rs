//! Compiles the textual magic grammar into a [`MagicTable`].
//!
//! One line is one rule:
//!
//! ```text
//! [>...]offset   [u]type[&mask]   [reln]value   description
//! ```
//!
//! Lines that fail to compile are reported and skipped together with their
//! continuations; the rest of the file still compiles.

use std::collections::TryReserveError;
use std::path::PathBuf;

use fnv::FnvHashMap;
use mime::Mime;
use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_till, take_while},
    character::complete::{alpha1, anychar, char, digit1, hex_digit1, one_of, space0},
    combinator::{eof, map, opt, peek, value},
    multi::many0_count,
    sequence::{pair, preceded, terminated},
    IResult,
};
use thiserror::Error;

use super::convert::{is_c_space, sign_extend};
use super::{
    ArithOp, FieldType, Indirect, MagicRule, MagicTable, MaskOp, MatchValue, NumericType, Offset,
    Relation, StringFlags,
};

/// Longest description accepted, in bytes.
pub const MAX_DESC: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("offset `{0}` invalid")]
    InvalidOffset(String),
    #[error("missing ')' in indirect offset `{0}`")]
    UnterminatedIndirect(String),
    #[error("type `{0}` invalid")]
    UnknownType(String),
    #[error("string extension `{0}` invalid")]
    UnknownStringFlag(char),
    #[error("value `{text}` invalid: {reason}")]
    InvalidValue { text: String, reason: &'static str },
    #[error("description is {0} bytes long, the limit is {max}", max = MAX_DESC)]
    DescriptionTooLong(usize),
    #[error("continuation at level {level} has no parent at level {parent}")]
    LevelJump { level: u16, parent: u16 },
    #[error("`!:` annotation has no rule to attach to")]
    OrphanAnnotation,
    #[error("mime type `{0}` invalid")]
    InvalidMime(String),
}

/// A [`ParseError`] and the 1-based line it occurred on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {error}")]
pub struct LineError {
    pub line: usize,
    pub error: ParseError,
}

/// Conditions that stop compilation altogether.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("out of memory while building the rule table")]
    Alloc(#[from] TryReserveError),
    #[error("cannot read magic file {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

lazy_static! {
    static ref KEYWORDS: FnvHashMap<&'static str, FieldType> = {
        let mut out = FnvHashMap::default();
        out.insert("byte", FieldType::Byte);
        out.insert("char", FieldType::Byte);
        out.insert("short", FieldType::Short);
        out.insert("long", FieldType::Long);
        out.insert("string", FieldType::String);
        out.insert("date", FieldType::Date);
        out.insert("beshort", FieldType::BEShort);
        out.insert("belong", FieldType::BELong);
        out.insert("bedate", FieldType::BEDate);
        out.insert("leshort", FieldType::LEShort);
        out.insert("lelong", FieldType::LELong);
        out.insert("ledate", FieldType::LEDate);
        out
    };
}

// Below parsers follow C `strtoul(s, &end, 0)`: 0x is hex, a leading 0 is
// octal, anything else decimal. Out of range values wrap to 32 bits.
fn radix(digits: &str, radix: u32) -> u32 {
    if digits.is_empty() {
        return 0;
    }
    u64::from_str_radix(digits, radix).map_or(u32::MAX, |v| v as u32)
}

fn c_unsigned(i: &str) -> IResult<&str, u32> {
    alt((
        map(preceded(tag_no_case("0x"), hex_digit1), |d| radix(d, 16)),
        map(
            preceded(char('0'), take_while(|c: char| c.is_digit(8))),
            |d| radix(d, 8),
        ),
        map(digit1, |d| radix(d, 10)),
    ))(i)
}

fn c_integer(i: &str) -> IResult<&str, u32> {
    let (i, sign) = opt(one_of("+-"))(i)?;
    let (i, magnitude) = c_unsigned(i)?;
    let v = if sign == Some('-') {
        magnitude.wrapping_neg()
    } else {
        magnitude
    };
    Ok((i, v))
}

// Optional `u`, `l`, `s`, `h`, `b`, `c` after a number. Consumed and ignored.
fn size_suffix(i: &str) -> IResult<&str, ()> {
    value((), pair(opt(one_of("uU")), opt(one_of("lLsShHbBcC"))))(i)
}

fn continuation_level(i: &str) -> IResult<&str, usize> {
    many0_count(char('>'))(i)
}

fn flag<'a>(c: char) -> impl FnMut(&'a str) -> IResult<&'a str, bool> {
    map(opt(char(c)), |o: Option<char>| o.is_some())
}

fn pointer_code(i: &str) -> IResult<&str, Option<char>> {
    opt(preceded(char('.'), anychar))(i)
}

fn pointer_type(code: char) -> Option<NumericType> {
    match code {
        'l' => Some(NumericType::LELong),
        'L' => Some(NumericType::BELong),
        'h' | 's' => Some(NumericType::LEShort),
        'H' | 'S' => Some(NumericType::BEShort),
        'b' | 'c' | 'B' | 'C' => Some(NumericType::Byte),
        _ => None,
    }
}

// `[+-]n` inside an indirect offset; the sign is returned separately.
fn displacement(i: &str) -> IResult<&str, (i8, u32)> {
    map(pair(one_of("+-"), c_unsigned), |(s, n)| {
        (if s == '-' { -1 } else { 1 }, n)
    })(i)
}

fn type_keyword(i: &str) -> IResult<&str, Option<FieldType>> {
    let (rest, word) = alpha1(i)?;
    let found = (1..=word.len())
        .rev()
        .find_map(|n| KEYWORDS.get(&word[..n]).map(|t| (n, *t)));
    match found {
        Some((n, ty)) => Ok((&i[n..], Some(ty))),
        None => Ok((rest, None)),
    }
}

fn arith_op(i: &str) -> IResult<&str, MaskOp> {
    map(
        pair(flag('~'), one_of("&|^+-*/%")),
        |(inverted, c)| {
            let op = match c {
                '&' => ArithOp::And,
                '|' => ArithOp::Or,
                '^' => ArithOp::Xor,
                '+' => ArithOp::Add,
                '-' => ArithOp::Sub,
                '*' => ArithOp::Mul,
                '/' => ArithOp::Div,
                _ => ArithOp::Mod,
            };
            MaskOp { op, inverted }
        },
    )(i)
}

fn relation(i: &str) -> IResult<&str, Relation> {
    alt((
        value(Relation::Greater, char('>')),
        value(Relation::Less, char('<')),
        value(Relation::BitAnd, char('&')),
        value(Relation::BitXorNot, char('^')),
        value(Relation::Equal, char('=')),
        value(Relation::NotEqual, char('!')),
        value(
            Relation::Always,
            terminated(char('x'), peek(alt((value((), one_of(" \t")), value((), eof))))),
        ),
    ))(i)
}

/// Decodes a C-escaped string literal up to the first unescaped blank.
fn string_literal(i: &str) -> IResult<&str, Vec<u8>> {
    let bytes = i.as_bytes();
    let mut out = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if is_c_space(c) {
            break;
        }
        pos += 1;
        if c != b'\\' {
            out.push(c);
            continue;
        }
        let e = match bytes.get(pos) {
            Some(&e) => e,
            None => break,
        };
        pos += 1;
        match e {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b'b' => out.push(0x08),
            b't' => out.push(b'\t'),
            b'f' => out.push(0x0c),
            b'v' => out.push(0x0b),
            b'0'..=b'7' => {
                let mut val = u32::from(e - b'0');
                for _ in 0..2 {
                    match bytes.get(pos) {
                        Some(&d @ b'0'..=b'7') => {
                            val = (val << 3) | u32::from(d - b'0');
                            pos += 1;
                        }
                        _ => break,
                    }
                }
                out.push(val as u8);
            }
            b'x' => {
                let mut val: Option<u32> = None;
                for _ in 0..2 {
                    match bytes.get(pos).and_then(|d| char::from(*d).to_digit(16)) {
                        Some(d) => {
                            val = Some((val.unwrap_or(0) << 4) | d);
                            pos += 1;
                        }
                        None => break,
                    }
                }
                // A bare \x is just an x.
                out.push(val.map_or(b'x', |v| v as u8));
            }
            other => {
                out.push(other);
                // Keep multi-byte characters whole.
                while !i.is_char_boundary(pos) {
                    out.push(bytes[pos]);
                    pos += 1;
                }
            }
        }
    }

    Ok((&i[pos..], out))
}

fn string_flags(i: &str) -> Result<(&str, StringFlags), ParseError> {
    let blank = |c: char| c == ' ' || c == '\t';
    let (rest, letters) =
        take_till::<_, _, nom::error::Error<&str>>(blank)(i).unwrap_or((i, ""));
    let mut flags = StringFlags::empty();
    for c in letters.chars() {
        flags |= match c {
            'c' => StringFlags::IGNORE_CASE,
            'B' => StringFlags::COMPACT_BLANK,
            'b' => StringFlags::COMPACT_OPTIONAL_BLANK,
            other => return Err(ParseError::UnknownStringFlag(other)),
        };
    }
    Ok((rest, flags))
}

fn token(i: &str) -> String {
    i.split(|c: char| c == ' ' || c == '\t')
        .next()
        .unwrap_or("")
        .to_string()
}

fn invalid_value(text: &str, reason: &'static str) -> ParseError {
    ParseError::InvalidValue {
        text: token(text),
        reason,
    }
}

/// Compiles one rule line.
pub fn compile_line(line: &str) -> Result<MagicRule, ParseError> {
    let line = line.trim_end_matches(&['\n', '\r'][..]).trim_start();
    let invalid_offset = || ParseError::InvalidOffset(token(line));

    let (rest, level) = continuation_level(line).map_err(|_| invalid_offset())?;
    let level = u16::try_from(level).map_err(|_| invalid_offset())?;

    // Offset: `off`, `(off[.t][+-n])`, `&off` and `(&off...)` / `&(off...)`.
    let (rest, early_relative) = if level > 0 {
        flag('&')(rest).map_err(|_| invalid_offset())?
    } else {
        (rest, false)
    };
    let (rest, indirect) = flag('(')(rest).map_err(|_| invalid_offset())?;
    let (rest, late_relative) = if level > 0 && !early_relative {
        flag('&')(rest).map_err(|_| invalid_offset())?
    } else {
        (rest, false)
    };
    let relative_to_parent = early_relative || late_relative;

    let (mut rest, base) = c_integer(rest).map_err(|_| invalid_offset())?;
    let offset = if indirect {
        let spec = rest;
        let (r, code) = pointer_code(rest).map_err(|_| invalid_offset())?;
        let pointer_type = match code {
            None => NumericType::Long,
            Some(c) => pointer_type(c).ok_or_else(invalid_offset)?,
        };
        let (r, add) = opt(displacement)(r).map_err(|_| invalid_offset())?;
        let (sign, relative_add) = add.unwrap_or((1, 0));
        let (r, _) = char::<_, nom::error::Error<&str>>(')')(r)
            .map_err(|_| ParseError::UnterminatedIndirect(token(spec)))?;
        rest = r;
        Offset::Indirect(Indirect {
            base_offset: base as i32,
            pointer_type,
            relative_add: relative_add as i32,
            sign,
        })
    } else {
        Offset::Absolute(base as i32)
    };

    // Type, with an optional `u` prefix.
    let (rest, _) = space0::<_, nom::error::Error<&str>>(rest).unwrap_or((rest, ""));
    let type_token = token(rest);
    let (rest, unsigned) =
        flag('u')(rest).map_err(|_| ParseError::UnknownType(type_token.clone()))?;
    let (rest, field_type) = match type_keyword(rest) {
        Ok((r, Some(t))) => (r, t),
        _ => return Err(ParseError::UnknownType(type_token)),
    };

    // Mask operation or string flags.
    let mut mask = 0;
    let mut mask_op = None;
    let mut flags = StringFlags::empty();
    let mut rest = rest;
    if field_type.is_string() {
        if let Some(r) = rest.strip_prefix('/') {
            let (r, f) = string_flags(r)?;
            flags = f;
            rest = r;
        }
    } else if let Ok((r, op)) = arith_op(rest) {
        let (r, raw) = c_integer(r).map_err(|_| invalid_value(r, "mask is not a number"))?;
        let (r, _) = size_suffix(r).unwrap_or((r, ()));
        mask = sign_extend(field_type, unsigned, raw) as u32;
        if mask == 0 && matches!(op.op, ArithOp::Div | ArithOp::Mod) {
            return Err(invalid_value(rest, "zero divisor"));
        }
        mask_op = Some(op);
        rest = r;
    }

    // Relation; `=` when none is given.
    let (rest, _) = space0::<_, nom::error::Error<&str>>(rest).unwrap_or((rest, ""));
    let (rest, explicit) = opt(relation)(rest).map_err(|_| invalid_value(rest, "bad relation"))?;
    let relation = explicit.unwrap_or(Relation::Equal);
    if field_type.is_string()
        && !matches!(
            relation,
            Relation::Equal | Relation::NotEqual | Relation::Always
        )
    {
        return Err(invalid_value(
            line.trim_start_matches('>'),
            "strings only compare with `=`, `!` or `x`",
        ));
    }

    // Value, unless the relation is `x`.
    let (rest, _) = space0::<_, nom::error::Error<&str>>(rest).unwrap_or((rest, ""));
    let (rest, value) = if relation == Relation::Always {
        let v = if field_type.is_string() {
            MatchValue::Bytes {
                data: Vec::new(),
                flags,
            }
        } else {
            MatchValue::Numeric(0)
        };
        (rest, v)
    } else if field_type.is_string() {
        let (r, data) = string_literal(rest).map_err(|_| invalid_value(rest, "bad string"))?;
        (r, MatchValue::Bytes { data, flags })
    } else {
        let (r, raw) = c_integer(rest).map_err(|_| invalid_value(rest, "not a number"))?;
        let (r, _) = size_suffix(r).unwrap_or((r, ()));
        (r, MatchValue::Numeric(sign_extend(field_type, unsigned, raw)))
    };

    // Everything left is the description.
    let description = rest.trim_start_matches(|c| c == ' ' || c == '\t').trim_end();
    let (description, no_leading_space) = match description
        .strip_prefix('\u{8}')
        .or_else(|| description.strip_prefix("\\b"))
    {
        Some(d) => (d, true),
        None => (description, false),
    };
    if description.len() > MAX_DESC {
        return Err(ParseError::DescriptionTooLong(description.len()));
    }

    Ok(MagicRule {
        level,
        offset,
        relative_to_parent,
        field_type,
        unsigned,
        mask,
        mask_op,
        relation,
        value,
        description: description.to_string(),
        no_leading_space,
        mime: None,
    })
}

fn attach_annotation(table: &mut MagicTable, annotation: &str) -> Result<(), ParseError> {
    let annotation = annotation.trim();
    let (key, arg) = annotation
        .split_once(|c: char| c == ' ' || c == '\t')
        .unwrap_or((annotation, ""));
    let rule = table.last_mut().ok_or(ParseError::OrphanAnnotation)?;
    match key {
        "mime" => {
            let arg = arg.trim();
            let parsed: Mime = arg
                .parse()
                .map_err(|_| ParseError::InvalidMime(arg.to_string()))?;
            rule.mime = Some(parsed);
        }
        other => tracing::debug!("ignoring `!:{}` annotation", other),
    }
    Ok(())
}

fn check_level(rule: MagicRule, previous: Option<u16>) -> Result<MagicRule, ParseError> {
    if rule.level == 0 {
        return Ok(rule);
    }
    match previous {
        Some(p) if rule.level <= p.saturating_add(1) => Ok(rule),
        _ => Err(ParseError::LevelJump {
            level: rule.level,
            parent: rule.level - 1,
        }),
    }
}

/// Compiles a sequence of lines into one table.
///
/// Per-line problems are collected and the line is skipped, together with
/// every continuation below it. Only running out of memory is fatal.
pub fn compile_database<'a, I>(lines: I) -> Result<(MagicTable, Vec<LineError>), CompileError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut table = MagicTable::new();
    let mut errors = Vec::new();
    // Level of the last rule kept, None before the first one.
    let mut last_level: Option<u16> = None;
    // Level of a rejected line whose continuations are being dropped.
    let mut dropping: Option<usize> = None;

    for (index, raw) in lines.into_iter().enumerate() {
        let line = raw.trim_end_matches(&['\n', '\r'][..]);
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let lineno = index + 1;

        if let Some(annotation) = trimmed.strip_prefix("!:") {
            if dropping.is_some() {
                continue;
            }
            if let Err(error) = attach_annotation(&mut table, annotation) {
                errors.push(LineError { line: lineno, error });
            }
            continue;
        }

        let depth = trimmed.bytes().take_while(|&b| b == b'>').count();
        if let Some(d) = dropping {
            if depth > d {
                continue;
            }
            dropping = None;
        }

        match compile_line(trimmed).and_then(|rule| check_level(rule, last_level)) {
            Ok(rule) => {
                last_level = Some(rule.level);
                table.push(rule)?;
            }
            Err(error) => {
                errors.push(LineError { line: lineno, error });
                dropping = Some(depth);
            }
        }
    }

    Ok((table, errors))
}

/// Compiles the text of a whole magic file.
pub fn compile(text: &str) -> Result<(MagicTable, Vec<LineError>), CompileError> {
    compile_database(text.lines())
}

#[test]
fn c_integer_test() {
    assert_eq!(c_integer("0x1F rest"), Ok((" rest", 0x1f)));
    assert_eq!(c_integer("017"), Ok(("", 15)));
    assert_eq!(c_integer("0"), Ok(("", 0)));
    assert_eq!(c_integer("09"), Ok(("9", 0)));
    assert_eq!(c_integer("42x"), Ok(("x", 42)));
    assert_eq!(c_integer("-1"), Ok(("", 0xffff_ffff)));
    assert_eq!(c_integer("0x100000001"), Ok(("", 1)));
    assert!(c_integer("x").is_err());
}

#[test]
fn string_literal_test() {
    assert_eq!(string_literal("\\037\\213 gzip").unwrap(), (" gzip", vec![0x1f, 0x8b]));
    assert_eq!(string_literal("\\x1f\\x8b").unwrap(), ("", vec![0x1f, 0x8b]));
    assert_eq!(string_literal("a\\ b\tc").unwrap(), ("\tc", b"a b".to_vec()));
    assert_eq!(string_literal("\\xg").unwrap(), ("", b"xg".to_vec()));
    assert_eq!(string_literal("\\n\\r\\t\\f\\v\\b").unwrap().1, b"\n\r\t\x0c\x0b\x08".to_vec());
    assert_eq!(string_literal("\\0").unwrap().1, vec![0]);
    assert_eq!(string_literal("\\1234").unwrap().1, vec![0o123, b'4']);
    assert_eq!(string_literal("%PDF-").unwrap().1, b"%PDF-".to_vec());
    assert_eq!(string_literal("\\é x").unwrap(), (" x", "é".as_bytes().to_vec()));
}

#[test]
fn type_keyword_test() {
    assert_eq!(type_keyword("belong 1"), Ok((" 1", Some(FieldType::BELong))));
    assert_eq!(type_keyword("char"), Ok(("", Some(FieldType::Byte))));
    assert_eq!(type_keyword("bytex"), Ok(("x", Some(FieldType::Byte))));
    assert_eq!(type_keyword("quad"), Ok(("", None)));
}

#[test]
fn relation_test() {
    assert_eq!(relation("x "), Ok((" ", Relation::Always)));
    assert_eq!(relation("x"), Ok(("", Relation::Always)));
    assert!(relation("xyz").is_err());
    assert_eq!(relation("!0"), Ok(("0", Relation::NotEqual)));
}

#[test]
fn indirect_offset_test() {
    let rule = compile_line(">(0x3c.l+4)\tbelong\t0x50450000\tPE").unwrap();
    assert_eq!(
        rule.offset,
        Offset::Indirect(Indirect {
            base_offset: 0x3c,
            pointer_type: NumericType::LELong,
            relative_add: 4,
            sign: 1,
        })
    );
    let rule = compile_line(">(4.S-2) byte 1 x").unwrap();
    match rule.offset {
        Offset::Indirect(ind) => {
            assert_eq!(ind.pointer_type, NumericType::BEShort);
            assert_eq!(ind.displacement(), -2);
        }
        Offset::Absolute(_) => panic!("expected an indirect offset"),
    }
    assert_eq!(
        compile_line("(4.l+2 byte 1 x"),
        Err(ParseError::UnterminatedIndirect(".l+2".to_string()))
    );
    assert!(matches!(
        compile_line("(4.q) byte 1 x"),
        Err(ParseError::InvalidOffset(_))
    ));
}
