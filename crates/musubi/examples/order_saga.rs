//! Order processing saga with compensation.
//!
//! Demonstrates:
//! - A workflow under the `compensate` failure strategy
//! - Compensators rolling back completed steps in reverse order
//! - Inspecting the outcome and the event trace

use musubi::prelude::*;

#[derive(Debug, Default)]
struct OrderState {
    account_id: Option<String>,
    charge_id: Option<String>,
    emails_sent: u32,
}

fn main() {
    tracing_subscriber::fmt::init();

    let create_account = Task::new("create_account", |ctx: &mut ExecutionContext<OrderState>| {
        ctx.data.account_id = Some("acct-1001".to_string());
        println!("created account");
        Ok(())
    })
    .with_description("Provisions the customer account")
    .with_undo(|ctx| {
        ctx.data.account_id = None;
        println!("deleted account");
        Ok(())
    });

    let charge_card = Task::new("charge_card", |ctx: &mut ExecutionContext<OrderState>| {
        ctx.data.charge_id = Some("ch-2002".to_string());
        println!("charged card");
        Ok(())
    })
    .with_description("Charges the customer's card")
    .with_undo(|ctx| {
        ctx.data.charge_id = None;
        println!("refunded charge");
        Ok(())
    });

    // No compensator: there is no way to unsend an email.
    let send_email = Task::new("send_email", |_ctx: &mut ExecutionContext<OrderState>| {
        Err(StepError::user("smtp relay refused the connection"))
    })
    .with_description("Sends the confirmation email");

    let workflow = Workflow::builder("order_processing")
        .description("Creates an account, charges the card, confirms by email")
        .step(create_account)
        .step(charge_card)
        .step(send_email)
        .strategy(FailureStrategy::Compensate)
        .build()
        .expect("valid workflow");

    let mut ctx = ExecutionContext::new(OrderState::default());
    let outcome = SyncRunner::new()
        .run(&workflow, &mut ctx)
        .expect("well-formed tree");

    println!("\nstatus: {}", outcome.status);
    for failure in &outcome.errors {
        println!("error: {failure}");
    }

    println!("\ntrace:");
    for event in ctx.trace() {
        println!("  {:>5}ms  {:?}  {}  attempt {}", event.ts_ms, event.kind, event.node, event.attempt);
    }

    // Both side effects were rolled back.
    assert!(ctx.data.account_id.is_none());
    assert!(ctx.data.charge_id.is_none());
}
