//! Building a workflow from a JSON descriptor and a task registry.
//!
//! Demonstrates:
//! - Registering known tasks
//! - Assembling a workflow from a declarative descriptor (e.g. produced by
//!   an LLM) without executing any descriptor-supplied code
//! - Printing the assembled workflow's manifest

use musubi::prelude::*;

fn main() {
    tracing_subscriber::fmt::init();

    let mut registry = Registry::new();
    registry.register(
        Task::new("validate_order", |ctx: &mut ExecutionContext<u32>| {
            ctx.data += 1;
            Ok(())
        })
        .with_description("Checks the order for completeness"),
    );
    registry.register(
        Task::new("reserve_stock", |ctx: &mut ExecutionContext<u32>| {
            ctx.data += 1;
            Ok(())
        })
        .with_description("Reserves inventory for the order"),
    );
    registry.register(
        Task::new("notify_customer", |ctx: &mut ExecutionContext<u32>| {
            ctx.data += 1;
            Ok(())
        })
        .with_description("Sends the order confirmation"),
    );

    let descriptor = WorkflowDescriptor::from_json(
        r#"{
            "name": "order_intake",
            "steps": ["validate_order", "reserve_stock", "notify_customer"],
            "strategy": "continue"
        }"#,
    )
    .expect("well-formed descriptor");

    let workflow = assemble(&descriptor, &registry).expect("all steps registered");
    println!(
        "{}",
        workflow.manifest().to_json().expect("manifest serializes")
    );

    let mut ctx = ExecutionContext::new(0);
    let outcome = SyncRunner::new()
        .run(&workflow, &mut ctx)
        .expect("well-formed tree");
    println!("status: {}, steps run: {}", outcome.status, ctx.data);

    // A descriptor naming an unregistered step is rejected outright.
    let hostile = WorkflowDescriptor::from_json(
        r#"{"name": "evil", "steps": ["drop_tables"], "strategy": "abort"}"#,
    )
    .expect("well-formed descriptor");
    match assemble(&hostile, &registry) {
        Err(AssemblyError::UnknownStep(name)) => println!("rejected unknown step '{name}'"),
        other => panic!("expected rejection, got {other:?}"),
    }
}
