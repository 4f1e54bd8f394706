//! Payment routing with branch groups, hooks and file-based settings.
//!
//! Demonstrates:
//! - `on` / `otherwise` routing, including a nested group
//! - Guarded and optional steps
//! - Lifecycle hooks that audit and authorize a run
//! - Loading `WorkflowConfig` from TOML

use async_trait::async_trait;
use nagare::prelude::*;
use serde_json::{json, Map, Value};
use tracing::info;

const SETTINGS: &str = r#"
[workflows.payment]
record_skipped = true
"#;

fn payment_method(expected: &'static str) -> impl Fn(&Context) -> bool + Send + Sync {
    move |ctx: &Context| ctx.get("payment_method").and_then(Value::as_str) == Some(expected)
}

fn respond(name: &'static str) -> impl Service {
    service_fn(name, move |actor: Actor, input: Value| async move {
        info!("{} handled by {}", name, actor.id());
        let handled = json!({ "handled_by": name, "amount": input["amount"].clone() });
        Ok::<Value, ServiceFailure>(json!({ "resource": handled }))
    })
}

#[derive(Debug)]
struct Audit;

#[async_trait]
impl WorkflowHooks for Audit {
    async fn before_workflow(&self, ctx: &mut Context) {
        if ctx.actor().attribute("role") != Some(&json!("cashier")) {
            let mut details = Map::new();
            details.insert("actor".to_string(), json!(ctx.actor().id()));
            ctx.fail("actor may not take payments", details);
        }
    }

    async fn after_step(&self, step: &StepName, _ctx: &mut Context) {
        println!("  audit: {} done", step);
    }
}

fn build() -> Result<Workflow, WorkflowError> {
    let config = WorkflowConfig::load_for(SETTINGS, "payment").map_err(WorkflowError::from)?;

    Workflow::builder("payment")
        .config(config)
        .hooks(Audit)
        .step(Step::new("validate", respond("validate")))
        .branch_named("method", |b| {
            b.on(payment_method("paypal"))
                .step(Step::new("charge_paypal", respond("charge_paypal")))
                .on(payment_method("card"))
                .step(Step::new("charge_card", respond("charge_card")))
                .branch_named("risk", |risk| {
                    risk.on(|ctx: &Context| ctx.get_as::<f64>("amount").unwrap_or(0.0) > 1_000.0)
                        .step(Step::new("three_d_secure", respond("three_d_secure")))
                        .otherwise()
                        .step(Step::new("fast_path", respond("fast_path")))
                })
                .otherwise()
                .step(Step::new("manual_review", respond("manual_review")))
        })
        .step(
            Step::new("receipt_email", respond("receipt_email"))
                .guard(|ctx: &Context| ctx.contains_key("email"))
                .optional(),
        )
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let workflow = build()?;
    let cashier = Actor::new("till-3").with_attribute("role", "cashier");

    let requests = [
        json!({ "payment_method": "paypal", "amount": 25.0, "email": "a@example.com" }),
        json!({ "payment_method": "card", "amount": 2_500.0 }),
        json!({ "payment_method": "cash", "amount": 10.0 }),
    ];

    for params in requests {
        println!("=== {} ===", params["payment_method"]);
        let output = workflow.call(cashier.clone(), params).await?;
        println!("  branches: {:?}", output.metadata.branches_taken);
        println!("  executed: {:?}", output.metadata.steps_executed);
        println!("  skipped:  {:?}\n", output.metadata.steps_skipped);
    }

    println!("=== unauthorized ===");
    match workflow
        .call(Actor::new("visitor"), json!({ "payment_method": "card", "amount": 5.0 }))
        .await
    {
        Ok(_) => println!("Unexpected success"),
        Err(e) => println!("  rejected: {}", e),
    }

    Ok(())
}
