//! Textual type descriptions.
//!
//! Two forms are understood: a bare type spec such as `INT` or `DINT[4,4]`,
//! and a structure block:
//!
//! ```text
//! DATATYPE POSITION (FamilyType := NoFamily)
//!     DINT x;
//!     DINT y (Radix := Decimal);
//! END_DATATYPE
//! ```
//!
//! Attribute groups in parentheses are ignored. Consecutive scalar BOOL
//! members are packed as bits of a shared host byte.

use crate::error::{EipError, Result};

use super::udt::MemberDef;

const KEYWORD_BEGIN: &str = "DATATYPE";
const KEYWORD_END: &str = "END_DATATYPE";

/// Check whether the text is a `DATATYPE ... END_DATATYPE` block.
pub fn is_datatype_block(text: &str) -> bool {
    text.trim_start()
        .get(..KEYWORD_BEGIN.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(KEYWORD_BEGIN))
}

/// Split `NAME[d1,d2,d3]` into the name and its dimensions.
pub fn parse_type_spec(text: &str) -> Result<(String, Vec<usize>)> {
    let text = text.trim();
    let bad = || EipError::UndefinedType(text.to_string());

    let Some(open) = text.find('[') else {
        if text.is_empty() || text.contains(char::is_whitespace) {
            return Err(bad());
        }
        return Ok((text.to_string(), Vec::new()));
    };

    let close = text.rfind(']').ok_or_else(bad)?;
    if close != text.len() - 1 || close < open {
        return Err(bad());
    }

    let name = text[..open].trim();
    if name.is_empty() {
        return Err(bad());
    }

    let dims = text[open + 1..close]
        .split(',')
        .map(|d| d.trim().parse::<usize>().map_err(|_| bad()))
        .collect::<Result<Vec<_>>>()?;
    if dims.is_empty() || dims.len() > 3 || dims.contains(&0) {
        return Err(bad());
    }

    Ok((name.to_string(), dims))
}

fn strip_attributes(text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    let mut in_quote = false;

    for c in text.chars() {
        match c {
            '"' | '\'' if depth > 0 => in_quote = !in_quote,
            '(' if !in_quote => {
                depth += 1;
                if depth == 1 {
                    out.push(' ');
                }
            }
            ')' if !in_quote => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| EipError::UndefinedType("unbalanced ')'".into()))?;
            }
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }

    if depth != 0 {
        return Err(EipError::UndefinedType("unbalanced '('".into()));
    }
    Ok(out)
}

/// Parse a `DATATYPE` block into the structure name and its members.
pub fn parse_datatype(text: &str) -> Result<(String, Vec<MemberDef>)> {
    let bad = |why: &str| EipError::UndefinedType(format!("DATATYPE: {why}"));

    let cleaned = strip_attributes(text)?;
    let body = cleaned.trim();

    if !is_datatype_block(body) {
        return Err(bad("missing DATATYPE keyword"));
    }
    let body = body[KEYWORD_BEGIN.len()..].trim_start();

    let name_end = body
        .find(|c: char| c.is_whitespace() || c == ';')
        .ok_or_else(|| bad("missing name"))?;
    let name = &body[..name_end];
    let rest = &body[name_end..];

    let mut members = Vec::new();
    let mut ended = false;
    let mut next_bit: Option<u8> = None;

    for statement in rest.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        if statement.eq_ignore_ascii_case(KEYWORD_END) {
            ended = true;
            break;
        }

        let (type_name, declarator) = statement
            .split_once(char::is_whitespace)
            .ok_or_else(|| bad(&format!("incomplete member {statement:?}")))?;
        let declarator: String = declarator.split_whitespace().collect();
        let (member_name, dims) = parse_type_spec(&declarator)?;

        let mut member = MemberDef::new(member_name, type_name).with_dims(&dims);
        if type_name.eq_ignore_ascii_case("BOOL") && dims.is_empty() {
            let bit = next_bit.unwrap_or(0);
            member = member.with_bit(bit);
            next_bit = (bit < 7).then_some(bit + 1);
        } else {
            next_bit = None;
        }
        members.push(member);
    }

    if !ended {
        return Err(bad("missing END_DATATYPE"));
    }
    if members.is_empty() {
        return Err(bad("no members"));
    }

    Ok((name.to_string(), members))
}
