//! Recursive-descent parser for the filter grammar: `key ";" key ";" ...` where a key is
//! `gate=...`, `break=...`, `null=...`, `empty=...`, `leaf[...]`, or a bare predicate.

use crate::analysis::{Eval, Wdl};
use crate::error::{MiningError, Result};

use super::{Attr, Cmp, FilterNode, Gate, Predicate, PredicateValue};

pub fn parse(source: &str) -> Result<FilterNode> {
    let stripped: String = source.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = stripped.as_bytes();
    let mut pos = 0usize;
    let node = parse_node(bytes, &mut pos)?;
    if pos != bytes.len() {
        return Err(err(format!(
            "unexpected trailing input at byte {pos} in filter '{source}'"
        )));
    }
    Ok(node)
}

fn err(message: String) -> MiningError {
    MiningError::DslParse(message)
}

enum Key {
    Gate(Gate),
    Break(u32),
    Null(bool),
    Empty(bool),
    Leaf(FilterNode),
    Pred(Predicate),
}

fn parse_node(s: &[u8], pos: &mut usize) -> Result<FilterNode> {
    let mut gate = Gate::And;
    let mut pv_index = 1u32;
    let mut null_result = false;
    let mut empty_result = true;
    let mut predicates = Vec::new();
    let mut children = Vec::new();

    while *pos < s.len() && s[*pos] != b']' {
        match parse_key(s, pos)? {
            Key::Gate(g) => gate = g,
            Key::Break(b) => pv_index = b,
            Key::Null(b) => null_result = b,
            Key::Empty(b) => empty_result = b,
            Key::Leaf(node) => children.push(node),
            Key::Pred(p) => predicates.push(p),
        }
        if *pos < s.len() && s[*pos] == b';' {
            *pos += 1;
        }
    }

    Ok(FilterNode {
        gate,
        pv_index,
        null_result,
        empty_result,
        predicates,
        children,
    })
}

fn starts_with(s: &[u8], pos: usize, needle: &str) -> bool {
    s[pos..].starts_with(needle.as_bytes())
}

fn read_value(s: &[u8], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < s.len() && s[*pos] != b';' && s[*pos] != b']' {
        *pos += 1;
    }
    String::from_utf8_lossy(&s[start..*pos]).into_owned()
}

fn parse_key(s: &[u8], pos: &mut usize) -> Result<Key> {
    if starts_with(s, *pos, "gate=") {
        *pos += "gate=".len();
        let value = read_value(s, pos);
        let gate = Gate::from_name(&value)
            .ok_or_else(|| err(format!("unknown gate '{value}'")))?;
        return Ok(Key::Gate(gate));
    }
    if starts_with(s, *pos, "break=") {
        *pos += "break=".len();
        let value = read_value(s, pos);
        let n: u32 = value
            .parse()
            .map_err(|_| err(format!("invalid break index '{value}'")))?;
        return Ok(Key::Break(n));
    }
    if starts_with(s, *pos, "null=") {
        *pos += "null=".len();
        let value = read_value(s, pos);
        return Ok(Key::Null(parse_bool(&value)?));
    }
    if starts_with(s, *pos, "empty=") {
        *pos += "empty=".len();
        let value = read_value(s, pos);
        return Ok(Key::Empty(parse_bool(&value)?));
    }
    if starts_with(s, *pos, "leaf[") {
        *pos += "leaf[".len();
        let start = *pos;
        let mut depth = 1i32;
        while *pos < s.len() && depth > 0 {
            match s[*pos] {
                b'[' => depth += 1,
                b']' => depth -= 1,
                _ => (),
            }
            if depth > 0 {
                *pos += 1;
            }
        }
        if depth != 0 {
            return Err(err("unterminated leaf[...]".into()));
        }
        let inner = &s[start..*pos];
        *pos += 1; // consume the matching ']'

        let mut inner_pos = 0usize;
        let node = parse_node(inner, &mut inner_pos)?;
        if inner_pos != inner.len() {
            return Err(err("unexpected trailing input inside leaf[...]".into()));
        }
        return Ok(Key::Leaf(node));
    }

    let token = read_value(s, pos);
    if token.is_empty() {
        return Err(err("expected a key but found nothing".into()));
    }
    parse_predicate(&token).map(Key::Pred)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(err(format!("expected 'true' or 'false', found '{other}'"))),
    }
}

const ATTRS: &[(&str, Attr)] = &[
    ("depth", Attr::Depth),
    ("seldepth", Attr::Seldepth),
    ("multipv", Attr::Multipv),
    ("hashfull", Attr::Hashfull),
    ("nodes", Attr::Nodes),
    ("nps", Attr::Nps),
    ("tbhits", Attr::Tbhits),
    ("time", Attr::Time),
    ("eval", Attr::Eval),
    ("chances", Attr::Chances),
];

const CMPS: &[(&str, Cmp)] = &[
    (">=", Cmp::Ge),
    ("<=", Cmp::Le),
    (">", Cmp::Gt),
    ("<", Cmp::Lt),
    ("=", Cmp::Eq),
];

fn parse_predicate(token: &str) -> Result<Predicate> {
    let (attr_name, attr) = ATTRS
        .iter()
        .find(|(name, _)| token.starts_with(name))
        .ok_or_else(|| err(format!("unknown predicate attribute in '{token}'")))?;

    let rest = &token[attr_name.len()..];
    let (cmp_name, cmp) = CMPS
        .iter()
        .find(|(sym, _)| rest.starts_with(sym))
        .ok_or_else(|| err(format!("expected a comparator after '{attr_name}' in '{token}'")))?;

    let value_str = &rest[cmp_name.len()..];
    if value_str.is_empty() {
        return Err(err(format!("predicate '{token}' has no value")));
    }

    let value = parse_value(*attr, value_str)?;
    Ok(Predicate {
        attr: *attr,
        cmp: *cmp,
        value,
    })
}

fn parse_value(attr: Attr, value_str: &str) -> Result<PredicateValue> {
    match attr {
        Attr::Eval => Ok(PredicateValue::Eval(parse_eval_literal(value_str)?)),
        Attr::Chances => Ok(PredicateValue::Wdl(parse_wdl_literal(value_str)?)),
        _ => {
            let n: i64 = value_str
                .parse()
                .map_err(|_| err(format!("invalid integer value '{value_str}'")))?;
            Ok(PredicateValue::Number(n))
        }
    }
}

fn parse_eval_literal(value_str: &str) -> Result<Eval> {
    if let Some(mate_str) = value_str.strip_prefix('#') {
        let mate: i32 = mate_str
            .parse()
            .map_err(|_| err(format!("invalid mate literal '#{mate_str}'")))?;
        return Ok(Eval::Mate(mate));
    }

    if let Some((whole, frac)) = value_str.split_once('.') {
        let negative = whole.starts_with('-');
        let whole: i32 = whole
            .parse()
            .map_err(|_| err(format!("invalid decimal eval literal '{value_str}'")))?;
        let frac_digits = format!("{frac:0<2}");
        let frac_digits = &frac_digits[..2];
        let frac: i32 = frac_digits
            .parse()
            .map_err(|_| err(format!("invalid decimal eval literal '{value_str}'")))?;
        let magnitude = whole.abs() * 100 + frac;
        return Ok(Eval::Centipawn(if negative { -magnitude } else { magnitude }));
    }

    let cp: i32 = value_str
        .parse()
        .map_err(|_| err(format!("invalid eval literal '{value_str}'")))?;
    Ok(Eval::Centipawn(cp))
}

fn parse_wdl_literal(value_str: &str) -> Result<Wdl> {
    let mut parts = value_str.split('/');
    let mut next = |what: &str| -> Result<u32> {
        parts
            .next()
            .ok_or_else(|| err(format!("WDL literal '{value_str}' missing {what}")))?
            .parse()
            .map_err(|_| err(format!("WDL literal '{value_str}' has an invalid {what}")))
    };

    let win = next("win")?;
    let draw = next("draw")?;
    let loss = next("loss")?;
    if parts.next().is_some() {
        return Err(err(format!("WDL literal '{value_str}' has extra components")));
    }

    Ok(Wdl { win, draw, loss })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gate_and_defaults() {
        let node = parse("gate=OR;").unwrap();
        assert_eq!(node.gate, Gate::Or);
        assert_eq!(node.pv_index, 1);
        assert!(!node.null_result);
        assert!(node.empty_result);
    }

    #[test]
    fn parses_break_null_empty() {
        let node = parse("break=2;null=true;empty=false;").unwrap();
        assert_eq!(node.pv_index, 2);
        assert!(node.null_result);
        assert!(!node.empty_result);
    }

    #[test]
    fn parses_nested_leaf_with_inner_brackets() {
        let node = parse("gate=AND;leaf[gate=OR;leaf[gate=AND;depth>1;];];").unwrap();
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].children.len(), 1);
    }

    #[test]
    fn rejects_unterminated_leaf() {
        assert!(parse("gate=AND;leaf[depth>1;").is_err());
    }

    #[test]
    fn rejects_unknown_attribute() {
        assert!(parse("gate=AND;bogus>1;").is_err());
    }

    #[test]
    fn parses_negative_decimal_eval() {
        let node = parse("eval<=-1.50;").unwrap();
        assert_eq!(
            node.predicates[0].value,
            PredicateValue::Eval(Eval::Centipawn(-150))
        );
    }
}
