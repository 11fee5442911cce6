//! Converts the script's text lines into a `Vec<Operation>`.
//!
//! Lines beginning with `//` or consisting solely of whitespace are
//! skipped. Every other line must match one of the fixed instruction
//! prefixes; anything else is a fatal parse error.

use regex::Regex;

use crate::error::{SimError, SimResult};

use super::types::Operation;

/// Parses an entire script into operations, in file order.
///
/// A read's kind (read-write vs. snapshot) is not carried on the
/// `Operation` itself: `sim::manager` looks it up from the issuing
/// transaction's own record, which was tagged at `begin`/`beginRO`
/// time, so there is no need to pre-scan for `beginRO` declarations
/// here.
pub fn parse(text: &str) -> SimResult<Vec<Operation>> {
    let digits = Regex::new(r"\d+").expect("static regex is valid");

    let mut ops = Vec::new();
    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if is_ignorable(line) {
            continue;
        }
        ops.push(parse_line(&digits, line, lineno)?);
    }
    Ok(ops)
}

fn is_ignorable(line: &str) -> bool {
    line.is_empty() || line.starts_with("//")
}

fn extract_ids(digits: &Regex, line: &str, lineno: usize) -> SimResult<Vec<u64>> {
    let open = line.find('(').ok_or_else(|| parse_err(lineno, line, "missing '('"))?;
    let close = line.find(')').ok_or_else(|| parse_err(lineno, line, "missing ')'"))?;
    if close < open {
        return Err(parse_err(lineno, line, "')' before '('"));
    }
    let inside = &line[open + 1..close];
    let mut ids = Vec::new();
    for part in inside.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(m) = digits.find(part) {
            ids.push(m.as_str().parse::<u64>().map_err(|_| parse_err(lineno, line, "bad integer"))?);
        } else {
            return Err(parse_err(lineno, line, &format!("no integer found in argument {:?}", part)));
        }
    }
    Ok(ids)
}

fn extract_first_id(digits: &Regex, line: &str, lineno: usize) -> SimResult<u64> {
    let ids = extract_ids(digits, line, lineno)?;
    ids.into_iter().next().ok_or_else(|| parse_err(lineno, line, "expected at least one argument"))
}

fn parse_err(lineno: usize, line: &str, message: &str) -> SimError {
    SimError::Parse {
        line: lineno + 1,
        message: format!("{message} (in {:?})", line),
    }
}

fn parse_line(digits: &Regex, line: &str, lineno: usize) -> SimResult<Operation> {
    if line.starts_with("beginRO") {
        let txn = extract_first_id(digits, line, lineno)?;
        Ok(Operation::BeginReadOnly { txn })
    } else if line.starts_with("begin") {
        let txn = extract_first_id(digits, line, lineno)?;
        Ok(Operation::Begin { txn })
    } else if line.starts_with("end") {
        let txn = extract_first_id(digits, line, lineno)?;
        Ok(Operation::End { txn })
    } else if line.starts_with("fail") {
        let site = extract_first_id(digits, line, lineno)?;
        Ok(Operation::Fail { site })
    } else if line.starts_with("recover") {
        let site = extract_first_id(digits, line, lineno)?;
        Ok(Operation::Recover { site })
    } else if line.starts_with("dump") {
        Ok(Operation::Dump)
    } else if line.starts_with('W') {
        let ids = extract_ids(digits, line, lineno)?;
        if ids.len() != 3 {
            return Err(parse_err(lineno, line, "W expects (txn, var, value)"));
        }
        Ok(Operation::Write { txn: ids[0], var: ids[1], value: ids[2] as i64 })
    } else if line.starts_with('R') {
        let ids = extract_ids(digits, line, lineno)?;
        if ids.len() != 2 {
            return Err(parse_err(lineno, line, "R expects (txn, var)"));
        }
        Ok(Operation::Read { txn: ids[0], var: ids[1] })
    } else {
        Err(parse_err(lineno, line, "unknown instruction prefix"))
    }
}
