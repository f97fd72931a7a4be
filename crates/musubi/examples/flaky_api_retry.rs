//! Retrying a flaky async call with exponential backoff and jitter.
//!
//! Demonstrates:
//! - An async task under the cooperative runner
//! - A retry policy with backoff, jitter, and error-kind filters
//! - The retry events recorded in the trace

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use musubi::prelude::*;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    // Fails twice with a retryable kind, then succeeds.
    let fetch_quote = Task::new("fetch_quote", move |ctx: &mut ExecutionContext<Option<f64>>| {
        let call = counter.fetch_add(1, Ordering::SeqCst);
        if call < 2 {
            Err(StepError::new("rate_limited", "upstream throttled us"))
        } else {
            ctx.data = Some(101.25);
            Ok(())
        }
    })
    .with_description("Fetches a price quote from the upstream API")
    .with_retry(
        RetryPolicy::exponential(5, Duration::from_millis(50))
            .with_jitter(0.2)
            .retry_on([ErrorKind::Other("rate_limited".to_string())])
            .give_up_on([ErrorKind::Other("invalid_credentials".to_string())]),
    );

    let workflow = Workflow::builder("quote_pipeline")
        .step(fetch_quote)
        .build()
        .expect("valid workflow");

    let mut ctx = ExecutionContext::new(None);
    let outcome = AsyncRunner::new()
        .run(&workflow, &mut ctx)
        .await
        .expect("well-formed tree");

    println!("status: {} after {} calls", outcome.status, calls.load(Ordering::SeqCst));
    println!("quote: {:?}", ctx.data);

    for event in ctx.trace() {
        if event.kind == EventKind::Retry {
            if let EventDetail::Backoff { next_delay_ms } = &event.detail {
                println!("attempt {} backed off {}ms", event.attempt, next_delay_ms);
            }
        }
    }
}
