//! Ordering and at-least-once delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use durable_bus::{Context, HandlerError, QueueStore};

use crate::support::{fast_config, wait_until, AddItemToCart, Broker, Recorder, WAIT};

// ============================================================================
// Test 1: Per-queue FIFO for commands sent while the receiver is offline
// ============================================================================

#[test]
fn offline_commands_are_handled_in_send_order() {
    let broker = Broker::new();

    let payments = broker.endpoint("payments");
    let order = Recorder::new();
    let seen = order.clone();
    payments
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            seen.record(cmd.cart_id);
            Ok(())
        })
        .unwrap();
    payments.install().unwrap();

    let cart = broker.endpoint("cart");
    for id in ["C1", "C2", "C3", "C4"] {
        cart.send("payments", &AddItemToCart::new(id, 1.0, 1)).unwrap();
    }

    payments.start().unwrap();
    assert!(wait_until(WAIT, || order.len() == 4));
    payments.stop().unwrap();

    assert_eq!(order.all(), vec!["C1", "C2", "C3", "C4"]);
}

// ============================================================================
// Test 2: A retried message keeps its place ahead of later ones
// ============================================================================

#[test]
fn retried_message_is_not_overtaken() {
    let broker = Broker::new();

    let payments = broker.endpoint("payments");
    let order = Recorder::new();
    let seen = order.clone();
    payments
        .register_handler(move |ctx: &Context<'_>, cmd: AddItemToCart| {
            seen.record((cmd.cart_id.clone(), ctx.delivery_count()));
            if cmd.cart_id == "C1" && ctx.delivery_count() == 0 {
                return Err(HandlerError::Rejected("transient".into()));
            }
            Ok(())
        })
        .unwrap();
    payments.install().unwrap();

    let cart = broker.endpoint("cart");
    cart.send("payments", &AddItemToCart::new("C1", 1.0, 1)).unwrap();
    cart.send("payments", &AddItemToCart::new("C2", 1.0, 1)).unwrap();

    payments.start().unwrap();
    assert!(wait_until(WAIT, || order.len() == 3));
    let stats = payments.stop().unwrap();

    assert_eq!(
        order.all(),
        vec![
            ("C1".to_string(), 0),
            ("C1".to_string(), 1),
            ("C2".to_string(), 0)
        ]
    );
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.failed_attempts, 1);
}

// ============================================================================
// Test 3: A consumer that dies before acking gets the message again
// ============================================================================

#[test]
fn unacknowledged_message_is_redelivered_after_crash() {
    let broker = Broker::new();

    let cart = broker.endpoint("cart");
    let first = broker.endpoint("payments");
    first.install().unwrap();
    cart.send("payments", &AddItemToCart::new("X", 5.0, 2)).unwrap();

    // Simulate a crash: take the message off the queue and never settle it.
    let taken = broker
        .queues
        .dequeue("payments", Duration::from_millis(10))
        .unwrap()
        .expect("message was enqueued");
    assert!(!taken.body.is_empty());
    assert_eq!(broker.queues.depth("payments").unwrap(), 0);
    drop(first);

    // The broker notices the consumer is gone.
    assert_eq!(broker.queues.recover_in_flight(), 1);

    let restarted = broker.endpoint("payments");
    let handled = Recorder::new();
    let seen = handled.clone();
    restarted
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            seen.record(cmd.price * cmd.quantity as f64);
            Ok(())
        })
        .unwrap();
    restarted.start().unwrap();

    assert!(wait_until(WAIT, || handled.len() == 1));
    restarted.stop().unwrap();
    assert_eq!(handled.all(), vec![10.0]);
    assert_eq!(broker.queues.depth("payments").unwrap(), 0);
}

// ============================================================================
// Test 4: Worker pool handles every message exactly once when all succeed
// ============================================================================

#[test]
fn worker_pool_handles_every_message() {
    let broker = Broker::new();

    let payments = broker.endpoint_with(fast_config("payments").with_concurrency(4));
    let handled = Recorder::new();
    let seen = handled.clone();
    payments
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            std::thread::sleep(Duration::from_millis(2));
            seen.record(cmd.cart_id);
            Ok(())
        })
        .unwrap();
    payments.start().unwrap();

    let cart = broker.endpoint("cart");
    for i in 0..20 {
        cart.send("payments", &AddItemToCart::new(&format!("C{}", i), 1.0, 1))
            .unwrap();
    }

    assert!(wait_until(WAIT, || handled.len() == 20));
    let stats = payments.stop().unwrap();
    assert_eq!(stats.handled, 20);

    let mut ids = handled.all();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(broker.queues.in_flight("payments"), 0);
}

// ============================================================================
// Test 5: stop() lets the in-flight handler finish
// ============================================================================

#[test]
fn stop_waits_for_in_flight_handler() {
    let broker = Broker::new();

    let payments = broker.endpoint("payments");
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
    payments
        .register_handler(move |_: &Context<'_>, _: AddItemToCart| {
            s.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    payments.start().unwrap();

    broker
        .endpoint("cart")
        .send("payments", &AddItemToCart::new("X", 1.0, 1))
        .unwrap();
    assert!(wait_until(WAIT, || started.load(Ordering::SeqCst)));

    let stats = payments.stop().unwrap();
    assert!(finished.load(Ordering::SeqCst));
    assert_eq!(stats.handled, 1);
    assert_eq!(broker.queues.depth("payments").unwrap(), 0);
}

// ============================================================================
// Test 6: With every worker busy the dispatcher holds one delivery, no more
// ============================================================================

#[test]
fn busy_pool_holds_one_extra_delivery() {
    let broker = Broker::new();

    let payments = broker.endpoint_with(fast_config("payments").with_concurrency(2));
    let gate = Arc::new(AtomicBool::new(false));
    let started = Recorder::new();
    let (open, seen) = (Arc::clone(&gate), started.clone());
    payments
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            seen.record(cmd.cart_id);
            while !open.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
        .unwrap();
    payments.start().unwrap();

    let cart = broker.endpoint("cart");
    for i in 0..5 {
        cart.send("payments", &AddItemToCart::new(&format!("C{}", i), 1.0, 1))
            .unwrap();
    }

    assert!(wait_until(WAIT, || started.len() == 2));
    assert!(wait_until(WAIT, || broker.queues.in_flight("payments") == 3));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(broker.queues.in_flight("payments"), 3);
    assert_eq!(broker.queues.depth("payments").unwrap(), 2);

    gate.store(true, Ordering::SeqCst);
    assert!(wait_until(WAIT, || started.len() == 5));
    let stats = payments.stop().unwrap();
    assert_eq!(stats.handled, 5);
    assert_eq!(broker.queues.in_flight("payments"), 0);
}
