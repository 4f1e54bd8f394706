//! Order checkout with compensation.
//!
//! Demonstrates:
//! - Services implemented as structs sharing an in-memory inventory
//! - Typed payloads stored in the context through serde
//! - Rollback of reserved stock when the payment is declined

use async_trait::async_trait;
use nagare::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderLine {
    sku: String,
    quantity: u32,
    price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Order {
    id: u64,
    lines: Vec<OrderLine>,
    total: f64,
}

#[derive(Debug, Default)]
struct Inventory {
    stock: Mutex<HashMap<String, u32>>,
}

impl Inventory {
    fn reserve(&self, lines: &[OrderLine]) -> Result<(), ServiceFailure> {
        let mut stock = self.stock.lock().map_err(|_| "inventory lock poisoned")?;
        for line in lines {
            let available = stock.get(&line.sku).copied().unwrap_or(0);
            if available < line.quantity {
                return Err(ServiceFailure::new(
                    ErrorCode::ValidationFailed,
                    format!("insufficient stock for {}", line.sku),
                )
                .with_detail("sku", line.sku.clone()));
            }
        }
        for line in lines {
            if let Some(count) = stock.get_mut(&line.sku) {
                *count -= line.quantity;
            }
        }
        Ok(())
    }

    fn release(&self, lines: &[OrderLine]) -> Result<(), ServiceFailure> {
        let mut stock = self.stock.lock().map_err(|_| "inventory lock poisoned")?;
        for line in lines {
            *stock.entry(line.sku.clone()).or_insert(0) += line.quantity;
        }
        Ok(())
    }

    fn available(&self, sku: &str) -> u32 {
        self.stock
            .lock()
            .map(|stock| stock.get(sku).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct CreateOrder;

#[async_trait]
impl Service for CreateOrder {
    async fn call(&self, _actor: &Actor, input: Value) -> Result<Value, ServiceFailure> {
        let lines: Vec<OrderLine> = serde_json::from_value(input["lines"].clone())
            .map_err(|e| ServiceFailure::new(ErrorCode::ValidationFailed, e.to_string()))?;
        let total = lines.iter().map(|l| l.price * f64::from(l.quantity)).sum();
        let order = Order {
            id: 42,
            lines,
            total,
        };
        println!("Created order {} (total: {:.2})", order.id, order.total);
        Ok(json!({ "resource": order }))
    }
}

#[derive(Debug)]
struct ReserveStock {
    inventory: Arc<Inventory>,
}

#[async_trait]
impl Service for ReserveStock {
    async fn call(&self, _actor: &Actor, input: Value) -> Result<Value, ServiceFailure> {
        let order: Order = serde_json::from_value(input)
            .map_err(|e| ServiceFailure::new(ErrorCode::ValidationFailed, e.to_string()))?;
        self.inventory.reserve(&order.lines)?;
        println!("Reserved stock for order {}", order.id);
        Ok(json!({ "reserved": order.lines.len() }))
    }
}

#[derive(Debug)]
struct ChargePayment {
    limit: f64,
}

#[async_trait]
impl Service for ChargePayment {
    async fn call(&self, actor: &Actor, input: Value) -> Result<Value, ServiceFailure> {
        let total = input["total"].as_f64().unwrap_or(0.0);
        if total > self.limit {
            return Err(ServiceFailure::new(ErrorCode::ExecutionError, "card declined")
                .with_detail("total", total)
                .with_detail("limit", self.limit));
        }
        println!("Charged {:.2} to {}", total, actor.id());
        Ok(json!({ "resource": { "status": "paid", "amount": total } }))
    }
}

fn checkout(inventory: &Arc<Inventory>, limit: f64) -> Result<Workflow, WorkflowError> {
    let release = Arc::clone(inventory);

    Workflow::builder("checkout")
        .step(Step::new("create_order", CreateOrder))
        .step(
            Step::new(
                "reserve_stock",
                ReserveStock {
                    inventory: Arc::clone(inventory),
                },
            )
            .input(|ctx: &Context| {
                ctx.get("create_order")
                    .cloned()
                    .ok_or_else(|| ServiceFailure::execution("order was not created"))
            })
            .with_rollback(move |ctx: &Context| -> Result<(), ServiceFailure> {
                let order: Order = ctx
                    .get_as("create_order")
                    .ok_or_else(|| ServiceFailure::execution("order missing during rollback"))?;
                println!("Releasing stock for order {}", order.id);
                release.release(&order.lines)
            }),
        )
        .step(
            Step::new("charge_payment", ChargePayment { limit }).input(|ctx: &Context| {
                Ok(json!({ "total": ctx.get_path("create_order.total").cloned() }))
            }),
        )
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let inventory = Arc::new(Inventory::default());
    inventory.release(&[OrderLine {
        sku: "KB-01".to_string(),
        quantity: 10,
        price: 0.0,
    }])?;

    let params = json!({
        "lines": [{ "sku": "KB-01", "quantity": 2, "price": 89.5 }]
    });

    println!("=== Checkout within the card limit ===\n");
    let workflow = checkout(&inventory, 500.0)?;
    let output = workflow.call(Actor::new("customer-1"), params.clone()).await?;
    println!("{}", serde_json::to_string_pretty(&output.to_json())?);
    println!("Stock left: {}\n", inventory.available("KB-01"));

    println!("=== Checkout over the card limit ===\n");
    let workflow = checkout(&inventory, 100.0)?;
    match workflow.call(Actor::new("customer-2"), params).await {
        Ok(_) => println!("Unexpected success"),
        Err(e) => {
            println!("Checkout failed ({}): {}", e.code(), e);
            println!("Details: {}", serde_json::to_string_pretty(&e.details())?);
        }
    }
    println!("Stock left: {}", inventory.available("KB-01"));

    Ok(())
}
