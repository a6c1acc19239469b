//! SQL parser using nom.
//!
//! Reads the single-table SELECT subset that the engine itself produces,
//! so corrected SQL and fallback output can be compared and validated
//! structurally.
//!
//! # Grammar
//!
//! ```text
//! SELECT ( * | col [, col]* ) FROM table
//!     [ WHERE pred [ AND pred ]* ] [ ; ]
//!
//! pred  := col op value | col IS [NOT] NULL
//! op    := = | != | <> | > | >= | < | <=
//! value := 'text' | number | DATE 'yyyy-mm-dd' | TO_DATE('yyyy-mm-dd'[, 'fmt'])
//! col   := ident [ . ident ]
//! ```
//!
//! Joins, OR, grouping and subqueries are rejected.

use chrono::NaiveDate;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, opt, recognize, value},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::ast::*;
use crate::error::{NlsqlError, NlsqlResult};

/// Parse a complete SELECT statement.
pub fn parse(input: &str) -> NlsqlResult<QueryAst> {
    let input = input.trim();

    match parse_select(input) {
        Ok((remaining, ast)) => {
            let (remaining, _) = trailer(remaining)
                .map_err(|_| NlsqlError::sql_parse(input.len() - remaining.len(), "bad statement end"))?;
            if remaining.is_empty() {
                Ok(ast)
            } else {
                Err(NlsqlError::sql_parse(
                    input.len() - remaining.len(),
                    format!("Unexpected trailing content: '{}'", remaining),
                ))
            }
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(NlsqlError::sql_parse(
            input.len() - e.input.len(),
            format!("Parse failed near '{}'", preview(e.input)),
        )),
        Err(nom::Err::Incomplete(_)) => Err(NlsqlError::sql_parse(input.len(), "Incomplete statement")),
    }
}

fn preview(s: &str) -> &str {
    match s.char_indices().nth(24) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Optional `;` and whitespace after the statement.
fn trailer(input: &str) -> IResult<&str, ()> {
    value((), tuple((multispace0, opt(char(';')), multispace0)))(input)
}

fn parse_select(input: &str) -> IResult<&str, QueryAst> {
    let (input, _) = tag_no_case("SELECT")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, columns) = parse_columns(input)?;
    let (input, _) = delimited(multispace1, tag_no_case("FROM"), multispace1)(input)?;
    let (input, table) = parse_identifier(input)?;
    let (input, predicates) = opt(parse_where)(input)?;

    Ok((
        input,
        QueryAst {
            table: table.to_string(),
            columns,
            predicates: predicates.unwrap_or_default(),
        },
    ))
}

/// `*` yields an empty column list.
fn parse_columns(input: &str) -> IResult<&str, Vec<String>> {
    alt((
        value(Vec::new(), char('*')),
        separated_list1(
            tuple((multispace0, char(','), multispace0)),
            parse_column_ref,
        ),
    ))(input)
}

fn parse_where(input: &str) -> IResult<&str, Vec<Predicate>> {
    let (input, _) = preceded(multispace1, tag_no_case("WHERE"))(input)?;
    let (input, _) = multispace1(input)?;
    let (input, first) = parse_predicate(input)?;
    let (input, rest) = many0(preceded(
        tuple((multispace1, tag_no_case("AND"), multispace1)),
        parse_predicate,
    ))(input)?;

    let mut predicates = vec![first];
    predicates.extend(rest);
    Ok((input, predicates))
}

fn parse_predicate(input: &str) -> IResult<&str, Predicate> {
    let (input, column) = parse_column_ref(input)?;
    alt((
        map(parse_null_check, {
            let column = column.clone();
            move |op| Predicate::new(column.clone(), op, Value::Null)
        }),
        map(
            pair(delimited(multispace0, parse_operator, multispace0), parse_value),
            move |(op, v)| Predicate::new(column.clone(), op, v),
        ),
    ))(input)
}

fn parse_null_check(input: &str) -> IResult<&str, Operator> {
    let (input, _) = tuple((multispace1, tag_no_case("IS"), multispace1))(input)?;
    let (input, not) = opt(terminated(tag_no_case("NOT"), multispace1))(input)?;
    let (input, _) = tag_no_case("NULL")(input)?;
    let op = if not.is_some() {
        Operator::IsNotNull
    } else {
        Operator::IsNull
    };
    Ok((input, op))
}

fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        value(Operator::Gte, tag(">=")),
        value(Operator::Lte, tag("<=")),
        value(Operator::Ne, tag("!=")),
        value(Operator::Ne, tag("<>")),
        value(Operator::Eq, char('=')),
        value(Operator::Gt, char('>')),
        value(Operator::Lt, char('<')),
    ))(input)
}

/// Parse an identifier (table name, column name).
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// `col` or `table.col`, kept verbatim for the validator.
fn parse_column_ref(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(parse_identifier, opt(pair(char('.'), parse_identifier)))),
        |s: &str| s.to_string(),
    )(input)
}

fn parse_value(input: &str) -> IResult<&str, Value> {
    alt((
        parse_to_date,
        map(
            preceded(pair(tag_no_case("DATE"), multispace1), parse_quoted_string),
            text_or_date,
        ),
        parse_number,
        map(parse_quoted_string, text_or_date),
    ))(input)
}

/// `TO_DATE('2019-01-01', 'YYYY-MM-DD')`; only ISO input is understood.
fn parse_to_date(input: &str) -> IResult<&str, Value> {
    let (input, _) = pair(tag_no_case("TO_DATE"), multispace0)(input)?;
    let (input, _) = pair(char('('), multispace0)(input)?;
    let (input, text) = parse_quoted_string(input)?;
    let (input, _) = opt(tuple((
        multispace0,
        char(','),
        multispace0,
        parse_quoted_string,
    )))(input)?;
    let (input, _) = pair(multispace0, char(')'))(input)?;
    Ok((input, text_or_date(text)))
}

/// Parse a number (integer or float).
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (input, num_str) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    if !num_str.contains('.') {
        if let Ok(n) = num_str.parse::<i64>() {
            return Ok((input, Value::Int(n)));
        }
    }
    // decimals, and integers too wide for i64
    match num_str.parse::<f64>() {
        Ok(n) if n.is_finite() && num_str.contains('.') => Ok((input, Value::Float(n))),
        Ok(n) if n.is_finite() => Ok((input, Value::number(n))),
        _ => Err(nom::Err::Failure(nom::error::Error::new(
            num_str,
            nom::error::ErrorKind::Float,
        ))),
    }
}

/// Parse a single-quoted string, with `''` as an escaped quote.
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        let (r, chunk) = take_while(|c: char| c != '\'')(rest)?;
        out.push_str(chunk);
        let (r, _) = char('\'')(r)?;
        match r.strip_prefix('\'') {
            Some(r) => {
                out.push('\'');
                rest = r;
            }
            None => return Ok((r, out)),
        }
    }
}

fn text_or_date(s: String) -> Value {
    match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
        Ok(d) => Value::Date(d),
        Err(_) => Value::Text(s),
    }
}
