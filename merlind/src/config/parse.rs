//! `nom`-based parser for the nested block/key-value grammar described by
//! spec §6: `name [label] { key = value; ... }`. Only a grammar, not a
//! validator — see [`super::model::Config::from_blocks`] for the part
//! that rejects unrecognised keys.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded, terminated},
    IResult,
};

use super::ast::{Block, Var};

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn ident(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

/// Skips whitespace and `#`-to-end-of-line comments.
fn ws(input: &str) -> IResult<&str, ()> {
    let mut rest = input;
    loop {
        let (r, _) = multispace0(rest)?;
        rest = r;
        if let Some(stripped) = rest.strip_prefix('#') {
            let line_end = stripped.find('\n').map(|i| i + 1).unwrap_or(stripped.len());
            rest = &stripped[line_end..];
            continue;
        }
        break;
    }
    Ok((rest, ()))
}

fn quoted_string(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c| c != '"'), char('"'))(input)
}

fn bare_value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && c != ';' && c != '}' && c != '#')(input)
}

fn value(input: &str) -> IResult<&str, &str> {
    alt((quoted_string, bare_value))(input)
}

fn var(input: &str) -> IResult<&str, Var> {
    let (input, _) = ws(input)?;
    let (input, key) = ident(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = char('=')(input)?;
    let (input, _) = ws(input)?;
    let (input, value) = value(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = opt(char(';'))(input)?;
    Ok((
        input,
        Var {
            key: key.to_string(),
            value: value.to_string(),
        },
    ))
}

fn block(input: &str) -> IResult<&str, Block> {
    let (input, _) = ws(input)?;
    let (input, name) = ident(input)?;
    let (input, _) = multispace0(input)?;
    let (input, label) = opt(terminated(ident, multispace0))(input)?;
    let (input, _) = char('{')(input)?;
    let (input, (vars, nested)) = block_body(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = char('}')(input)?;
    Ok((
        input,
        Block {
            name: name.to_string(),
            label: label.map(|s| s.to_string()),
            vars,
            nested,
        },
    ))
}

fn block_body(mut input: &str) -> IResult<&str, (Vec<Var>, Vec<Block>)> {
    let mut vars = Vec::new();
    let mut nested = Vec::new();
    loop {
        let (rest, _) = ws(input)?;
        input = rest;
        if input.starts_with('}') || input.is_empty() {
            break;
        }
        if let Ok((rest, b)) = block(input) {
            nested.push(b);
            input = rest;
            continue;
        }
        let (rest, v) = var(input)?;
        vars.push(v);
        input = rest;
    }
    Ok((input, (vars, nested)))
}

/// Parses a whole configuration file into its top-level blocks: one
/// `daemon { ... }` plus any number of `peer/poller/noc NAME { ... }`.
pub fn parse_file(text: &str) -> IResult<&str, Vec<Block>> {
    let (input, blocks) = many0(preceded(ws, block))(text)?;
    let (input, _) = ws(input)?;
    Ok((input, blocks))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_daemon_block() {
        let text = r#"
            # top comment
            daemon {
                port = 15551
                address = 0.0.0.0
                merlin_user = nagios

                database {
                    enabled = 1
                }
                object_config {
                    push = "mon oconf push"
                }
            }
        "#;
        let (rest, blocks) = parse_file(text).unwrap();
        assert!(rest.trim().is_empty());
        assert_eq!(blocks.len(), 1);
        let daemon = &blocks[0];
        assert_eq!(daemon.name, "daemon");
        assert_eq!(daemon.var("port"), Some("15551"));
        let db = daemon.nested_one("database").unwrap();
        assert_eq!(db.var("enabled"), Some("1"));
        let oc = daemon.nested_one("object_config").unwrap();
        assert_eq!(oc.var("push"), Some("mon oconf push"));
    }

    #[test]
    fn parses_node_blocks_with_labels() {
        let text = r#"
            peer node-b {
                address = 10.0.0.2
                port = 15551
            }
            poller edge-1 {
                address = 10.0.1.5
                hostgroup = edge,dmz
            }
        "#;
        let (_, blocks) = parse_file(text).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].name, "peer");
        assert_eq!(blocks[0].label.as_deref(), Some("node-b"));
        assert_eq!(blocks[1].var("hostgroup"), Some("edge,dmz"));
    }
}
