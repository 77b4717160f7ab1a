//! Renders rule descriptions.
//!
//! A description is a printf template with at most one conversion, which
//! receives the value the rule matched. Only the first conversion is
//! substituted; `%%` always prints a percent sign.

use chrono::DateTime;

/// Widths and precisions are clamped to this.
const MAX_WIDTH: usize = 256;

/// What a matched rule hands to its description.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i64),
    /// Seconds since the epoch, shown as a timestamp by `%s`.
    Date(i64),
    Str(String),
}

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    alt: bool,
    width: usize,
    precision: Option<usize>,
}

/// `ctime`-style rendering of a 32-bit timestamp, in UTC.
pub fn format_date(secs: i64) -> String {
    match DateTime::from_timestamp(secs, 0) {
        Some(t) => t.format("%a %b %e %H:%M:%S %Y").to_string(),
        None => format!("*invalid date {secs}*"),
    }
}

fn pad(body: String, sign: &str, spec: &Spec, numeric: bool) -> String {
    let len = sign.len() + body.chars().count();
    if len >= spec.width {
        return format!("{sign}{body}");
    }
    let fill = spec.width - len;
    if spec.left {
        format!("{sign}{body}{}", " ".repeat(fill))
    } else if spec.zero && numeric && spec.precision.is_none() {
        format!("{sign}{}{body}", "0".repeat(fill))
    } else {
        format!("{}{sign}{body}", " ".repeat(fill))
    }
}

fn min_digits(digits: String, spec: &Spec) -> String {
    match spec.precision {
        Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
        _ => digits,
    }
}

fn render_conversion(conv: char, spec: &Spec, arg: &Arg) -> String {
    let int = match arg {
        Arg::Int(v) | Arg::Date(v) => *v,
        Arg::Str(s) => s.trim().parse().unwrap_or(0),
    };
    match conv {
        'd' | 'i' => {
            let sign = if int < 0 {
                "-"
            } else if spec.plus {
                "+"
            } else if spec.space {
                " "
            } else {
                ""
            };
            pad(min_digits(int.unsigned_abs().to_string(), spec), sign, spec, true)
        }
        'u' => pad(min_digits((int as u32).to_string(), spec), "", spec, true),
        'x' | 'X' => {
            let mut digits = min_digits(format!("{:x}", int as u32), spec);
            if conv == 'X' {
                digits = digits.to_uppercase();
            }
            let prefix = match (spec.alt && int as u32 != 0, conv) {
                (true, 'x') => "0x",
                (true, _) => "0X",
                (false, _) => "",
            };
            pad(digits, prefix, spec, true)
        }
        'o' => {
            let mut digits = min_digits(format!("{:o}", int as u32), spec);
            if spec.alt && !digits.starts_with('0') {
                digits.insert(0, '0');
            }
            pad(digits, "", spec, true)
        }
        'c' => pad(char::from(int as u8).to_string(), "", spec, false),
        _ => {
            let text = match arg {
                Arg::Int(v) => v.to_string(),
                Arg::Date(v) => format_date(*v),
                Arg::Str(s) => s.clone(),
            };
            let text = match spec.precision {
                Some(p) => text.chars().take(p).collect(),
                None => text,
            };
            pad(text, "", spec, false)
        }
    }
}

/// Substitutes `arg` into the first conversion of `template`.
pub fn render(template: &str, arg: &Arg) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    let mut used = false;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }
        if used {
            out.push('%');
            continue;
        }

        // %[flags][width][.precision][length]conversion
        let mut spec = Spec::default();
        let mut raw = String::from("%");
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' => spec.space = true,
                '#' => spec.alt = true,
                _ => break,
            }
            raw.push(f);
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = (spec.width * 10 + d as usize).min(MAX_WIDTH);
            raw.push(chars.next().unwrap_or('0'));
        }
        if chars.peek() == Some(&'.') {
            raw.push('.');
            chars.next();
            let mut p = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                p = (p * 10 + d as usize).min(MAX_WIDTH);
                raw.push(chars.next().unwrap_or('0'));
            }
            spec.precision = Some(p);
        }
        while let Some(&l) = chars.peek() {
            if l != 'h' && l != 'l' {
                break;
            }
            raw.push(l);
            chars.next();
        }

        match chars.next() {
            Some(conv @ ('d' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' | 's')) => {
                out.push_str(&render_conversion(conv, &spec, arg));
                used = true;
            }
            // Not a conversion we know: print it as written.
            Some(other) => {
                out.push_str(&raw);
                out.push(other);
            }
            None => out.push_str(&raw),
        }
    }

    out
}
