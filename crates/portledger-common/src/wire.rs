//! Compact text forms for transmitting a set of port pairs.
//!
//! Two forms exist for the same data:
//!
//! - header form, `8080=40010,9090=40011`
//! - colon form, `8080:40010,9090:40011`
//!
//! Whitespace around each field is ignored. Any malformed entry rejects the
//! whole input.

use nom::{
    IResult, Parser,
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res},
    multi::separated_list1,
    sequence::{delimited, separated_pair},
};

use crate::error::{PortLedgerError, Result};
use crate::port::{Port, PortPair, PortPairs};

const HEADER_DELIMITER: char = '=';
const COLON_DELIMITER: char = ':';

fn port_field(input: &str) -> IResult<&str, Port> {
    map_res(delimited(space0, digit1, space0), |digits: &str| {
        digits.parse::<u16>().map(Port::new)
    })
    .parse(input)
}

fn pair(delimiter: char) -> impl FnMut(&str) -> IResult<&str, PortPair> {
    move |input| {
        separated_pair(port_field, char(delimiter), port_field)
            .map(|(internal, external)| PortPair { internal, external })
            .parse(input)
    }
}

fn parse_pairs(input: &str, delimiter: char) -> Result<PortPairs> {
    if input.trim().is_empty() {
        return Ok(PortPairs::new());
    }
    let parsed: IResult<&str, Vec<PortPair>> =
        all_consuming(separated_list1(char(','), pair(delimiter))).parse(input);
    match parsed {
        Ok((_, pairs)) => Ok(pairs.into()),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(PortLedgerError::InvalidPortPairs {
            input: input.to_string(),
            reason: format!(
                "expected a comma delimited list of <internal>{delimiter}<external> pairs \
                 with ports 0-65535, stopped at '{}'",
                e.input
            ),
        }),
        Err(nom::Err::Incomplete(_)) => Err(PortLedgerError::InvalidPortPairs {
            input: input.to_string(),
            reason: "unexpected end of input".into(),
        }),
    }
}

fn format_pairs(pairs: &PortPairs, delimiter: char) -> String {
    pairs
        .iter()
        .map(|p| format!("{}{delimiter}{}", p.internal, p.external))
        .collect::<Vec<_>>()
        .join(",")
}

impl PortPairs {
    /// Parses the header form `internal=external,...`.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::InvalidPortPairs`] if any entry is
    /// malformed or out of range.
    pub fn from_header(input: &str) -> Result<Self> {
        parse_pairs(input, HEADER_DELIMITER)
    }

    /// Renders the header form `internal=external,...`.
    #[must_use]
    pub fn to_header(&self) -> String {
        format_pairs(self, HEADER_DELIMITER)
    }

    /// Parses the colon form `internal:external,...`.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::InvalidPortPairs`] if any entry is
    /// malformed or out of range.
    pub fn from_colon(input: &str) -> Result<Self> {
        parse_pairs(input, COLON_DELIMITER)
    }

    /// Renders the colon form `internal:external,...`.
    #[must_use]
    pub fn to_colon(&self) -> String {
        format_pairs(self, COLON_DELIMITER)
    }
}
