//! Typed task requests.
//!
//! A [`TaskCall`](meshlink_core::TaskCall) carries an untyped JSON slice. Each
//! handler family validates that slice into one [`TaskRequest`] variant before
//! any work runs, so handlers never inspect raw JSON.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Fold operations over an input list (`math.<op>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOp {
    Sum,
    Product,
    Average,
    Min,
    Max,
    Subtract,
    Divide,
}

impl ListOp {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => Self::Sum,
            "product" => Self::Product,
            "average" => Self::Average,
            "min" => Self::Min,
            "max" => Self::Max,
            "subtract" => Self::Subtract,
            "divide" => Self::Divide,
            _ => return None,
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Product => "product",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::Subtract => "subtract",
            Self::Divide => "divide",
        }
    }
}

/// Binary calculator operators. Several spellings map to each operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

impl BinaryOp {
    /// Parses an operator spelling. Input is trimmed and case-insensitive.
    #[must_use]
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op.trim().to_ascii_lowercase().as_str() {
            "add" | "+" => Self::Add,
            "sub" | "-" => Self::Sub,
            "mul" | "*" | "x" => Self::Mul,
            "div" | "/" | "÷" => Self::Div,
            "mod" | "%" => Self::Mod,
            "pow" | "^" => Self::Pow,
            _ => return None,
        })
    }

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
        }
    }
}

/// String transformations (`string.<op>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Upper,
    Lower,
    Trim,
    Length,
    Reverse,
}

impl TextOp {
    pub const ALL: [TextOp; 5] = [
        Self::Upper,
        Self::Lower,
        Self::Trim,
        Self::Length,
        Self::Reverse,
    ];

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == name)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Trim => "trim",
            Self::Length => "length",
            Self::Reverse => "reverse",
        }
    }
}

// ---------------------------------------------------------------------------
// TaskRequest
// ---------------------------------------------------------------------------

/// A validated task, one variant per supported payload shape.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRequest {
    /// `math.*` over an ordered list of finite numbers.
    List { op: ListOp, inputs: Vec<f64> },
    /// `calc.binary`: `a <op> b`. `op_name` is the normalized spelling received.
    Binary {
        op: BinaryOp,
        op_name: String,
        a: f64,
        b: f64,
    },
    /// `code.execute`: source text for the configured interpreter.
    Execute { code: String },
    /// `string.*` over `text`.
    Text { op: TextOp, text: String },
    /// `echo`: arguments returned as received.
    Echo { args: Value },
}

impl TaskRequest {
    /// Short variant name for logs.
    #[must_use]
    pub fn family(&self) -> &'static str {
        match self {
            Self::List { .. } => "list",
            Self::Binary { .. } => "calc",
            Self::Execute { .. } => "code",
            Self::Text { .. } => "string",
            Self::Echo { .. } => "echo",
        }
    }
}

/// Reads a JSON value as a finite number.
///
/// Numbers and numeric strings (`"3"`, `" 2.5 "`) are accepted; booleans,
/// null, non-finite values, and anything else are not.
#[must_use]
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
