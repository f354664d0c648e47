//! The filter DSL: a small algebra of nested gates over one [`Analysis`], used both as the
//! *accelerate* prefilter and the authoritative *verify* predicate.

use std::fmt::{self, Display};

use crate::analysis::{Analysis, Eval, PvOutput, Wdl};
use crate::error::Result;

mod parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    And,
    NotAnd,
    Or,
    NotOr,
    Xor,
    XNotOr,
    Same,
    NotSame,
}

impl Gate {
    fn name(self) -> &'static str {
        match self {
            Gate::And => "AND",
            Gate::NotAnd => "NOT_AND",
            Gate::Or => "OR",
            Gate::NotOr => "NOT_OR",
            Gate::Xor => "XOR",
            Gate::XNotOr => "X_NOT_OR",
            Gate::Same => "SAME",
            Gate::NotSame => "NOT_SAME",
        }
    }

    fn from_name(name: &str) -> Option<Gate> {
        Some(match name {
            "AND" => Gate::And,
            "NOT_AND" => Gate::NotAnd,
            "OR" => Gate::Or,
            "NOT_OR" => Gate::NotOr,
            "XOR" => Gate::Xor,
            "X_NOT_OR" => Gate::XNotOr,
            "SAME" => Gate::Same,
            "NOT_SAME" => Gate::NotSame,
            _ => return None,
        })
    }

    /// Combines a vector of predicate/child results into this gate's truth value. Only ever
    /// called with a non-empty vector; the `empty` fallback is handled by the caller.
    fn apply(self, values: &[bool]) -> bool {
        let all = values.iter().all(|v| *v);
        let any = values.iter().any(|v| *v);
        let true_count = values.iter().filter(|v| **v).count();
        let odd = true_count % 2 == 1;
        let same = all || !any;

        match self {
            Gate::And => all,
            Gate::NotAnd => !all,
            Gate::Or => any,
            Gate::NotOr => !any,
            Gate::Xor => odd,
            Gate::XNotOr => !odd,
            Gate::Same => same,
            Gate::NotSame => !same,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attr {
    Depth,
    Seldepth,
    Multipv,
    Hashfull,
    Nodes,
    Nps,
    Tbhits,
    Time,
    Eval,
    Chances,
}

impl Attr {
    fn name(self) -> &'static str {
        match self {
            Attr::Depth => "depth",
            Attr::Seldepth => "seldepth",
            Attr::Multipv => "multipv",
            Attr::Hashfull => "hashfull",
            Attr::Nodes => "nodes",
            Attr::Nps => "nps",
            Attr::Tbhits => "tbhits",
            Attr::Time => "time",
            Attr::Eval => "eval",
            Attr::Chances => "chances",
        }
    }

    fn from_name(name: &str) -> Option<Attr> {
        Some(match name {
            "depth" => Attr::Depth,
            "seldepth" => Attr::Seldepth,
            "multipv" => Attr::Multipv,
            "hashfull" => Attr::Hashfull,
            "nodes" => Attr::Nodes,
            "nps" => Attr::Nps,
            "tbhits" => Attr::Tbhits,
            "time" => Attr::Time,
            "eval" => Attr::Eval,
            "chances" => Attr::Chances,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Gt,
    Ge,
    Eq,
    Le,
    Lt,
}

impl Cmp {
    fn name(self) -> &'static str {
        match self {
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
            Cmp::Eq => "=",
            Cmp::Le => "<=",
            Cmp::Lt => "<",
        }
    }

    fn apply<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Cmp::Gt => lhs > rhs,
            Cmp::Ge => lhs >= rhs,
            Cmp::Eq => lhs == rhs,
            Cmp::Le => lhs <= rhs,
            Cmp::Lt => lhs < rhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    Number(i64),
    Eval(Eval),
    Wdl(Wdl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub attr: Attr,
    pub cmp: Cmp,
    pub value: PredicateValue,
}

impl Predicate {
    fn evaluate(&self, pv: &PvOutput) -> bool {
        match (self.attr, &self.value) {
            (Attr::Depth, PredicateValue::Number(n)) => self.cmp.apply(pv.depth as i64, *n),
            (Attr::Seldepth, PredicateValue::Number(n)) => self.cmp.apply(pv.seldepth as i64, *n),
            (Attr::Multipv, PredicateValue::Number(n)) => self.cmp.apply(pv.multipv as i64, *n),
            (Attr::Hashfull, PredicateValue::Number(n)) => {
                self.cmp.apply(pv.hashfull_permille as i64, *n)
            }
            (Attr::Nodes, PredicateValue::Number(n)) => self.cmp.apply(pv.nodes as i64, *n),
            (Attr::Nps, PredicateValue::Number(n)) => self.cmp.apply(pv.nps as i64, *n),
            (Attr::Tbhits, PredicateValue::Number(n)) => self.cmp.apply(pv.tbhits as i64, *n),
            (Attr::Time, PredicateValue::Number(n)) => self.cmp.apply(pv.time_ms as i64, *n),
            (Attr::Eval, PredicateValue::Eval(threshold)) => self.cmp.apply(pv.eval, *threshold),
            (Attr::Chances, PredicateValue::Wdl(threshold)) => match pv.wdl {
                Some(wdl) => {
                    self.cmp.apply(wdl.win as i64, threshold.win as i64)
                        && self.cmp.apply(wdl.draw as i64, threshold.draw as i64)
                        && self.cmp.apply(wdl.loss as i64, threshold.loss as i64)
                }
                None => false,
            },
            _ => unreachable!("predicate value type must match its attribute"),
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.attr.name(), self.cmp.name())?;
        match &self.value {
            PredicateValue::Number(n) => write!(f, "{n}"),
            PredicateValue::Eval(Eval::Mate(m)) => write!(f, "#{m}"),
            PredicateValue::Eval(Eval::Centipawn(cp)) => {
                let sign = if *cp < 0 { "-" } else { "" };
                write!(f, "{sign}{}.{:02}", (cp.abs()) / 100, (cp.abs()) % 100)
            }
            PredicateValue::Eval(Eval::Invalid) => write!(f, "0"),
            PredicateValue::Wdl(wdl) => write!(f, "{}/{}/{}", wdl.win, wdl.draw, wdl.loss),
        }
    }
}

/// One node of the filter tree: a gate over its predicates and nested `leaf[...]` children.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub gate: Gate,
    /// MultiPV index this node reads from, 1-based.
    pub pv_index: u32,
    pub null_result: bool,
    pub empty_result: bool,
    pub predicates: Vec<Predicate>,
    pub children: Vec<FilterNode>,
}

impl FilterNode {
    fn leaf(gate: Gate, predicates: Vec<Predicate>) -> Self {
        Self {
            gate,
            pv_index: 1,
            null_result: false,
            empty_result: true,
            predicates,
            children: Vec::new(),
        }
    }

    fn branch(gate: Gate, children: Vec<FilterNode>) -> Self {
        Self {
            gate,
            pv_index: 1,
            null_result: false,
            empty_result: true,
            predicates: Vec::new(),
            children,
        }
    }

    pub fn evaluate(&self, analysis: &Analysis) -> bool {
        let Some(pv) = analysis.pv(self.pv_index) else {
            return self.null_result;
        };

        if self.predicates.is_empty() && self.children.is_empty() {
            return self.empty_result;
        }

        let mut results = Vec::with_capacity(self.predicates.len() + self.children.len());
        results.extend(self.predicates.iter().map(|p| p.evaluate(pv)));
        results.extend(self.children.iter().map(|c| c.evaluate(analysis)));

        self.gate.apply(&results)
    }

    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        out.push_str("gate=");
        out.push_str(self.gate.name());
        out.push(';');
        out.push_str(&format!("break={};", self.pv_index));
        out.push_str(&format!("null={};", self.null_result));
        out.push_str(&format!("empty={};", self.empty_result));
        for predicate in &self.predicates {
            out.push_str(&predicate.to_string());
            out.push(';');
        }
        for child in &self.children {
            out.push_str("leaf[");
            out.push_str(&child.to_canonical_string());
            out.push_str("];");
        }
        out
    }
}

/// An immutable, parsed filter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    root: FilterNode,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self> {
        let root = parser::parse(source)?;
        Ok(Self { root })
    }

    pub fn evaluate(&self, analysis: &Analysis) -> bool {
        self.root.evaluate(analysis)
    }

    pub fn canonical_string(&self) -> String {
        self.root.to_canonical_string()
    }

    /// A filter that always evaluates to true: an empty `AND` node.
    pub fn always_true() -> Self {
        Self {
            root: FilterNode::leaf(Gate::And, Vec::new()),
        }
    }

    /// A minimum-search-depth gate on PV1, used as the `quality` half of the canonical verify
    /// filter.
    pub fn quality(min_depth: u32) -> Self {
        Self {
            root: FilterNode::leaf(
                Gate::And,
                vec![Predicate {
                    attr: Attr::Depth,
                    cmp: Cmp::Ge,
                    value: PredicateValue::Number(min_depth as i64),
                }],
            ),
        }
    }

    /// PV1 evaluates to at least a forced mate in `max_mate_len` moves for the side to move, or
    /// a centipawn advantage of at least `min_cp`.
    pub fn winning(min_cp: i32, max_mate_len: i32) -> Self {
        Self {
            root: FilterNode::leaf(
                Gate::Or,
                vec![
                    Predicate {
                        attr: Attr::Eval,
                        cmp: Cmp::Ge,
                        value: PredicateValue::Eval(Eval::Centipawn(min_cp)),
                    },
                    Predicate {
                        attr: Attr::Eval,
                        cmp: Cmp::Ge,
                        value: PredicateValue::Eval(Eval::Mate(max_mate_len)),
                    },
                ],
            ),
        }
    }

    /// PV1 evaluates within `+/- max_abs_cp` of equality: a position that stays level rather
    /// than swinging decisively.
    pub fn drawing(max_abs_cp: i32) -> Self {
        Self {
            root: FilterNode::leaf(
                Gate::And,
                vec![
                    Predicate {
                        attr: Attr::Eval,
                        cmp: Cmp::Le,
                        value: PredicateValue::Eval(Eval::Centipawn(max_abs_cp)),
                    },
                    Predicate {
                        attr: Attr::Eval,
                        cmp: Cmp::Ge,
                        value: PredicateValue::Eval(Eval::Centipawn(-max_abs_cp)),
                    },
                ],
            ),
        }
    }

    /// The canonical compound `verify = AND(quality, OR(winning, drawing))` filter, built
    /// directly from its parts without reparsing.
    pub fn verify(quality: &Filter, winning: &Filter, drawing: &Filter) -> Self {
        let or_node = FilterNode::branch(Gate::Or, vec![winning.root.clone(), drawing.root.clone()]);
        Self {
            root: FilterNode::branch(Gate::And, vec![quality.root.clone(), or_node]),
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical_string())
    }
}
