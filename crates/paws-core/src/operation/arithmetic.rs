//! Binary arithmetic on two numeric inputs.

use futures_util::future::{self, BoxFuture};
use paws_types::error::OperationError;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::{Operation, OperationInputs, OperationOutputs, required};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    fn symbol(self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
        }
    }
}

/// `result = a <op> b`.
///
/// Integer inputs stay integers for add, sub and mul (overflow is a
/// failure); division and any float input produce a float.
#[derive(Debug, Clone, Copy)]
pub struct Arithmetic {
    op: ArithmeticOp,
}

impl Arithmetic {
    pub fn new(op: ArithmeticOp) -> Self {
        Self { op }
    }

    pub fn add() -> Self {
        Self::new(ArithmeticOp::Add)
    }

    pub fn sub() -> Self {
        Self::new(ArithmeticOp::Sub)
    }

    pub fn mul() -> Self {
        Self::new(ArithmeticOp::Mul)
    }

    pub fn div() -> Self {
        Self::new(ArithmeticOp::Div)
    }

    fn compute(&self, inputs: &OperationInputs) -> Result<Value, OperationError> {
        let a = number(inputs, "a")?;
        let b = number(inputs, "b")?;

        if self.op != ArithmeticOp::Div {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                let out = match self.op {
                    ArithmeticOp::Add => x.checked_add(y),
                    ArithmeticOp::Sub => x.checked_sub(y),
                    ArithmeticOp::Mul => x.checked_mul(y),
                    ArithmeticOp::Div => None,
                };
                return out.map(Value::from).ok_or_else(|| {
                    OperationError::Failed(format!("integer overflow in {x} {} {y}", self.op.symbol()))
                });
            }
        }

        let (x, y) = (to_f64(a, "a")?, to_f64(b, "b")?);
        let out = match self.op {
            ArithmeticOp::Add => x + y,
            ArithmeticOp::Sub => x - y,
            ArithmeticOp::Mul => x * y,
            ArithmeticOp::Div => {
                if y == 0.0 {
                    return Err(OperationError::Failed("division by zero".to_string()));
                }
                x / y
            }
        };
        Number::from_f64(out)
            .map(Value::Number)
            .ok_or_else(|| OperationError::Failed(format!("non-finite result {out}")))
    }
}

fn number<'a>(inputs: &'a OperationInputs, name: &str) -> Result<&'a Number, OperationError> {
    match required(inputs, name)? {
        Value::Number(n) => Ok(n),
        other => Err(OperationError::invalid(name, format!("expected a number, got {other}"))),
    }
}

fn to_f64(n: &Number, name: &str) -> Result<f64, OperationError> {
    n.as_f64()
        .ok_or_else(|| OperationError::invalid(name, "number out of range"))
}

impl Operation for Arithmetic {
    fn kind(&self) -> &str {
        match self.op {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Sub => "sub",
            ArithmeticOp::Mul => "mul",
            ArithmeticOp::Div => "div",
        }
    }

    fn input_names(&self) -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn output_names(&self) -> Vec<String> {
        vec!["result".to_string()]
    }

    fn description(&self) -> &str {
        "Combine inputs a and b with one arithmetic operator"
    }

    fn run<'a>(
        &'a self,
        inputs: &'a OperationInputs,
    ) -> BoxFuture<'a, Result<OperationOutputs, OperationError>> {
        let result = self
            .compute(inputs)
            .map(|value| OperationOutputs::from([("result".to_string(), value)]));
        Box::pin(future::ready(result))
    }
}
