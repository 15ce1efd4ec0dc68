//! Comparison operators available in CHECK expressions

use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Operation of a `<left> <op> <right>` expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Equals,
    Differs,
    Contains,
    Matches,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Equals => "EQUALS",
            Operation::Differs => "DIFFERS",
            Operation::Contains => "CONTAINS",
            Operation::Matches => "MATCHES",
            Operation::Greater => "GREATER",
            Operation::GreaterEqual => "GREATER_EQUAL",
            Operation::Less => "LESS",
            Operation::LessEqual => "LESS_EQUAL",
        }
    }

    /// Apply the operation to resolved operands
    ///
    /// Only an invalid MATCHES pattern is an error; everything else is a
    /// plain comparison.
    pub fn evaluate(&self, left: &str, right: &str) -> Result<bool, regex::Error> {
        let outcome = match self {
            Operation::Equals => first_line(left) == right.trim(),
            Operation::Differs => first_line(left) != right.trim(),
            Operation::Contains => left.contains(right.trim()),
            Operation::Matches => Regex::new(right)?.is_match(left),
            Operation::Greater => compare(left, right) == Some(Ordering::Greater),
            Operation::GreaterEqual => matches!(
                compare(left, right),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operation::Less => compare(left, right) == Some(Ordering::Less),
            Operation::LessEqual => matches!(
                compare(left, right),
                Some(Ordering::Less | Ordering::Equal)
            ),
        };
        Ok(outcome)
    }
}

fn first_line(text: &str) -> &str {
    text.split('\n').next().unwrap_or("").trim()
}

/// Numeric ordering when both sides are numbers, string ordering otherwise
fn compare(left: &str, right: &str) -> Option<Ordering> {
    match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r),
        _ => Some(left.cmp(right)),
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_ascii_uppercase().as_str() {
            "EQUALS" => Operation::Equals,
            "DIFFERS" => Operation::Differs,
            "CONTAINS" => Operation::Contains,
            "MATCHES" => Operation::Matches,
            "GREATER" => Operation::Greater,
            "GREATER_EQUAL" => Operation::GreaterEqual,
            "LESS" => Operation::Less,
            "LESS_EQUAL" => Operation::LessEqual,
            _ => match s {
                "==" | "eq" => Operation::Equals,
                "!=" | "ne" => Operation::Differs,
                "<" | "lt" => Operation::Less,
                ">" | "gt" => Operation::Greater,
                "<=" | "le" => Operation::LessEqual,
                ">=" | "ge" => Operation::GreaterEqual,
                _ => return Err(format!("unknown operation {:?}", s)),
            },
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(op: &str, left: &str, right: &str) -> bool {
        op.parse::<Operation>().unwrap().evaluate(left, right).unwrap()
    }

    #[test]
    fn test_parse_tokens() {
        assert_eq!("equals".parse::<Operation>().unwrap(), Operation::Equals);
        assert_eq!("==".parse::<Operation>().unwrap(), Operation::Equals);
        assert_eq!("ne".parse::<Operation>().unwrap(), Operation::Differs);
        assert_eq!(">=".parse::<Operation>().unwrap(), Operation::GreaterEqual);
        assert_eq!("LESS_EQUAL".parse::<Operation>().unwrap(), Operation::LessEqual);
        assert!("~=".parse::<Operation>().is_err());
    }

    #[test]
    fn test_equals_uses_first_line() {
        assert!(eval("EQUALS", "  yes \nbecause it works", "yes"));
        assert!(!eval("EQUALS", "no\nyes", "yes"));
    }

    #[test]
    fn test_equals_and_differs_are_complements() {
        let cases = [
            ("yes", "yes"),
            ("yes\nmore", "yes"),
            ("", ""),
            ("a", " a "),
            ("3", "3.0"),
            ("x", "y"),
        ];
        for (left, right) in cases {
            assert_ne!(
                eval("EQUALS", left, right),
                eval("DIFFERS", left, right),
                "{:?} {:?}",
                left,
                right
            );
        }
    }

    #[test]
    fn test_contains_and_matches() {
        assert!(eval("CONTAINS", "git version 2.43", " version "));
        assert!(!eval("CONTAINS", "git", "svn"));
        assert!(eval("MATCHES", "git version 2.43.0", r"\d+\.\d+"));
        assert!(Operation::Matches.evaluate("x", "(").is_err());
    }

    #[test]
    fn test_ordering_numeric_then_string() {
        assert!(eval("<", "9", "10"));
        assert!(eval("GREATER", " 10 ", "9"));
        assert!(eval("le", "2.5", "2.5"));
        // string comparison: "9" > "10"
        assert!(eval("gt", "9", "10x"));
        assert!(eval("ge", "b", "a"));
    }
}
