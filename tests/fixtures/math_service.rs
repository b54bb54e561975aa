use anyhow::Result;
use mesh_node::{ActionError, RequestContext, ServiceDefinition};
use serde_json::{json, Value};

fn operands(ctx: &RequestContext) -> Result<(f64, f64)> {
    Ok((ctx.param("a")?, ctx.param("b")?))
}

/// A simple math service for testing purposes
///
/// `whoami` returns the id of the node that served the call, so tests can
/// see where a call was routed.
pub fn math_service() -> ServiceDefinition {
    ServiceDefinition::new("math")
        .action("add", |ctx| async move {
            let (a, b) = operands(&ctx)?;
            Ok(json!(a + b))
        })
        .action("subtract", |ctx| async move {
            let (a, b) = operands(&ctx)?;
            Ok(json!(a - b))
        })
        .action("divide", |ctx| async move {
            let (a, b) = operands(&ctx)?;
            if b == 0.0 {
                return Err(ActionError::new("ArithmeticError", "Division by zero")
                    .with_data(json!({"a": a}))
                    .into());
            }
            Ok(json!(a / b))
        })
        .action("whoami", |ctx| async move { Ok(json!(ctx.node_id())) })
}

/// Plain number out of a call result
pub fn as_number(value: &Value) -> f64 {
    value.as_f64().unwrap_or(f64::NAN)
}
