use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize, value},
    error::ErrorKind,
    multi::many0,
    sequence::{preceded, terminated},
};

use crate::Error;
use crate::MAX_PARSE_DEPTH;
use crate::ast::{NumberType, SYMBOL_SPECIAL_CHARS, Symbol, Value, is_valid_symbol};

fn parse_failure(input: &str, kind: ErrorKind) -> nom::Err<nom::error::Error<&str>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

/// Convert nom parsing errors to user-friendly messages
fn parse_error_to_message(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            match e.code {
                ErrorKind::Char => format!("Expected character at position {position}"),
                ErrorKind::TooLarge => {
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})")
                }
                _ => {
                    if position < input.len() {
                        let remaining_chars: String =
                            input.chars().skip(position).take(10).collect();
                        format!("Invalid syntax near '{remaining_chars}'")
                    } else {
                        "Unexpected end of input".into()
                    }
                }
            }
        }
        nom::Err::Incomplete(_) => "Incomplete input".into(),
    }
}

/// Whitespace and `;` line comments
fn skip_atmosphere(input: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((multispace1, preceded(char(';'), not_line_ending)))),
    )
    .parse(input)
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'')
}

/// Succeeds without consuming when an atom ends here
fn atom_end(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        None => Ok((input, ())),
        Some(c) if is_delimiter(c) => Ok((input, ())),
        Some(_) => Err(parse_failure(input, ErrorKind::Verify)),
    }
}

/// Parse an integer or a double. A token with a fraction or an exponent is a
/// double; anything else must fit an integer.
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = terminated(
        recognize((
            opt(one_of("+-")),
            alt((
                recognize((digit1, opt((char('.'), digit0)))),
                recognize((char('.'), digit1)),
            )),
            opt((one_of("eE"), opt(one_of("+-")), digit1)),
        )),
        atom_end,
    )
    .parse(input)?;

    let number = if text.contains(['.', 'e', 'E']) {
        text.parse::<f64>().ok().map(Value::Double)
    } else {
        text.parse::<NumberType>().ok().map(Value::Integer)
    };
    // Overflowing integers are rejected here; symbol parsing rejects them too
    number
        .map(|number| (rest, number))
        .ok_or_else(|| parse_failure(input, ErrorKind::Digit))
}

/// Parse a boolean (#t, #f, #true or #false)
fn parse_bool(input: &str) -> IResult<&str, Value> {
    terminated(
        alt((
            value(Value::Bool(true), alt((tag("#true"), tag("#t")))),
            value(Value::Bool(false), alt((tag("#false"), tag("#f")))),
        )),
        atom_end,
    )
    .parse(input)
}

/// Parse a character literal: `#\a`, `#\(`, or a named one such as `#\space`
fn parse_char(input: &str) -> IResult<&str, Value> {
    let (after_prefix, _) = tag("#\\").parse(input)?;
    let mut chars = after_prefix.chars();
    let Some(first) = chars.next() else {
        return Err(parse_failure(after_prefix, ErrorKind::Char));
    };

    let (rest, ch) = if first.is_ascii_alphabetic() {
        let (rest, tail) = take_while(|c: char| c.is_ascii_alphanumeric()).parse(chars.as_str())?;
        let name = &after_prefix[..first.len_utf8() + tail.len()];
        let ch = match name {
            "space" => ' ',
            "newline" => '\n',
            "tab" => '\t',
            _ if tail.is_empty() => first,
            _ => return Err(parse_failure(after_prefix, ErrorKind::Char)),
        };
        (rest, ch)
    } else {
        (chars.as_str(), first)
    };

    let (rest, ()) = atom_end(rest)?;
    Ok((rest, Value::Char(ch)))
}

/// Parse a symbol (identifier)
fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let mut symbol_chars =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c));

    let (remaining, candidate) = symbol_chars.parse(input)?;
    let (remaining, ()) = atom_end(remaining)?;

    if is_valid_symbol(candidate) {
        Ok((remaining, Value::Symbol(Symbol::new(candidate))))
    } else {
        Err(parse_failure(input, ErrorKind::Alpha))
    }
}

/// Parse a string literal
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut char_iter = remaining.chars();
        match char_iter.next() {
            Some('"') => {
                return Ok((char_iter.as_str(), Value::from(text)));
            }
            Some('\\') => {
                match char_iter.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    // Unknown or incomplete escape sequence
                    Some(_) | None => return Err(parse_failure(remaining, ErrorKind::Char)),
                }
                remaining = char_iter.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = char_iter.as_str();
            }
            // Reached end of input without finding closing quote
            None => return Err(parse_failure(remaining, ErrorKind::Char)),
        }
    }
}

/// A `.` standing alone, as in `(a . b)`
fn parse_dot(input: &str) -> IResult<&str, ()> {
    value((), terminated(char('.'), atom_end)).parse(input)
}

/// Parse a proper or dotted list
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (mut input, _) = char('(').parse(input)?;
    let mut items = Vec::new();

    loop {
        let (rest, ()) = skip_atmosphere(input)?;

        if let Ok((rest, _)) = char::<&str, nom::error::Error<&str>>(')').parse(rest) {
            return Ok((rest, Value::list(items)));
        }

        if let Ok((after_dot, ())) = parse_dot(rest) {
            if items.is_empty() {
                return Err(parse_failure(rest, ErrorKind::Verify));
            }
            let (after_tail, tail) = parse_sexpr(after_dot, depth + 1)?;
            let (after_tail, ()) = skip_atmosphere(after_tail)?;
            let (after_close, _) = char(')').parse(after_tail)?;
            return Ok((after_close, Value::list_with_tail(items, tail)));
        }

        let (rest, item) = parse_sexpr(rest, depth + 1)?;
        items.push(item);
        input = rest;
    }
}

/// Parse quoted expression ('expr -> (quote expr))
fn parse_quote(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('\'').parse(input)?;
    let (input, expr) = parse_sexpr(input, depth + 1)?;
    Ok((input, Value::list([Value::sym("quote"), expr])))
}

/// Parse one S-expression, skipping leading whitespace and comments
fn parse_sexpr(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    preceded(
        skip_atmosphere,
        alt((
            |input| parse_quote(input, depth),
            |input| parse_list(input, depth),
            parse_number,
            parse_char,
            parse_bool,
            parse_string,
            parse_symbol,
        )),
    )
    .parse(input)
}

/// Parse exactly one S-expression from input.
pub fn parse_scheme(input: &str) -> Result<Value, Error> {
    match terminated(|input| parse_sexpr(input, 0), skip_atmosphere).parse(input) {
        Ok(("", value)) => Ok(value),
        Ok((remaining, _)) => Err(Error::ParseError(format!(
            "Unexpected remaining input: '{remaining}'"
        ))),
        Err(e) => Err(Error::ParseError(parse_error_to_message(input, e))),
    }
}

/// Parse every S-expression in input, in order
pub fn parse_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut exprs = Vec::new();
    let mut remaining = input;
    loop {
        let (rest, ()) = skip_atmosphere(remaining)
            .map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        if rest.is_empty() {
            return Ok(exprs);
        }
        let (rest, expr) =
            parse_sexpr(rest, 0).map_err(|e| Error::ParseError(parse_error_to_message(input, e)))?;
        exprs.push(expr);
        remaining = rest;
    }
}
