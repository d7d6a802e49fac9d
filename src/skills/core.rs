//! Always-on utility skills: current time and a small calculator.

use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::{anyhow, bail};
use futures::FutureExt as _;
use std::sync::Arc;

pub fn current_time() -> Skill {
    Skill::new(
        "current_time",
        "Get the current date and time (UTC).",
        serde_json::json!({
            "type": "object",
            "properties": {},
        }),
        ActionClass::Read,
        Arc::new(|_ctx, _args| {
            async move {
                let now = chrono::Utc::now();
                Ok(format!(
                    "{} ({})",
                    now.format("%Y-%m-%d %H:%M:%S UTC"),
                    now.format("%A")
                ))
            }
            .boxed()
        }),
    )
}

pub fn calculator() -> Skill {
    Skill::new(
        "calculator",
        "Evaluate an arithmetic expression (+, -, *, /, parentheses).",
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. \"(3 + 4) * 2\""
                }
            },
            "required": ["expression"],
        }),
        ActionClass::Read,
        Arc::new(|_ctx, args| {
            async move {
                let expression = args
                    .get("expression")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'expression' argument"))?;
                let value = evaluate(expression)?;
                // Render integers without the trailing .0
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    Ok(format!("{}", value as i64))
                } else {
                    Ok(format!("{value}"))
                }
            }
            .boxed()
        }),
    )
}

/// Recursive-descent evaluator over +, -, *, / and parentheses.
fn evaluate(expression: &str) -> anyhow::Result<f64> {
    let tokens: Vec<char> = expression.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pos = 0;
    let value = parse_sum(&tokens, &mut pos)?;
    if pos != tokens.len() {
        bail!("unexpected character '{}' in expression", tokens[pos]);
    }
    Ok(value)
}

fn parse_sum(tokens: &[char], pos: &mut usize) -> anyhow::Result<f64> {
    let mut value = parse_product(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '+' => {
                *pos += 1;
                value += parse_product(tokens, pos)?;
            }
            '-' => {
                *pos += 1;
                value -= parse_product(tokens, pos)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_product(tokens: &[char], pos: &mut usize) -> anyhow::Result<f64> {
    let mut value = parse_atom(tokens, pos)?;
    while let Some(&op) = tokens.get(*pos) {
        match op {
            '*' => {
                *pos += 1;
                value *= parse_atom(tokens, pos)?;
            }
            '/' => {
                *pos += 1;
                let divisor = parse_atom(tokens, pos)?;
                if divisor == 0.0 {
                    bail!("division by zero");
                }
                value /= divisor;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_atom(tokens: &[char], pos: &mut usize) -> anyhow::Result<f64> {
    match tokens.get(*pos) {
        Some('(') => {
            *pos += 1;
            let value = parse_sum(tokens, pos)?;
            if tokens.get(*pos) != Some(&')') {
                bail!("missing closing parenthesis");
            }
            *pos += 1;
            Ok(value)
        }
        Some('-') => {
            *pos += 1;
            Ok(-parse_atom(tokens, pos)?)
        }
        Some(c) if c.is_ascii_digit() || *c == '.' => {
            let start = *pos;
            while tokens
                .get(*pos)
                .is_some_and(|c| c.is_ascii_digit() || *c == '.')
            {
                *pos += 1;
            }
            let literal: String = tokens[start..*pos].iter().collect();
            literal
                .parse::<f64>()
                .map_err(|_| anyhow!("invalid number '{literal}'"))
        }
        Some(c) => bail!("unexpected character '{c}' in expression"),
        None => bail!("unexpected end of expression"),
    }
}
