//! The cart → payment calculation flow.

use durable_bus::{Context, EndpointState, QueueStore};

use crate::support::{wait_until, AddItemToCart, Broker, CartUpdated, Recorder, WAIT};

// ============================================================================
// Test 1: Commands accumulate while the receiver is stopped
// ============================================================================

#[test]
fn command_sent_while_offline_is_handled_after_start() {
    let broker = Broker::new();

    let payments = broker.endpoint("PaymentCalculationService");
    let totals = Recorder::new();
    let seen = totals.clone();
    payments
        .register_handler(move |_ctx: &Context<'_>, cmd: AddItemToCart| {
            let total = cmd.price * cmd.quantity as f64;
            tracing::info!(cart_id = %cmd.cart_id, total, "payment calculated");
            seen.record(total);
            Ok(())
        })
        .unwrap();
    payments.install().unwrap();

    let cart = broker.endpoint("CartService");
    cart.send("PaymentCalculationService", &AddItemToCart::new("X", 99.99, 1))
        .unwrap();

    assert_eq!(broker.queues.depth("PaymentCalculationService").unwrap(), 1);
    assert!(totals.all().is_empty());

    payments.start().unwrap();
    assert!(wait_until(WAIT, || totals.len() == 1));
    assert_eq!(totals.all(), vec![99.99]);

    let stats = payments.stop().unwrap();
    assert_eq!(stats.handled, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert_eq!(payments.state(), EndpointState::Stopped);

    assert_eq!(broker.queues.depth("PaymentCalculationService").unwrap(), 0);
    assert_eq!(broker.queues.in_flight("PaymentCalculationService"), 0);
}

// ============================================================================
// Test 2: Handler publishes a follow-up event with the same correlation id
// ============================================================================

#[test]
fn follow_up_event_carries_correlation_id() {
    let broker = Broker::new();

    let payments = broker.endpoint("PaymentCalculationService");
    payments
        .register_handler(|ctx: &Context<'_>, cmd: AddItemToCart| {
            ctx.publish(&CartUpdated {
                cart_id: cmd.cart_id,
                total: cmd.price * cmd.quantity as f64,
            })?;
            Ok(())
        })
        .unwrap();

    let cart = broker.endpoint("CartService");
    let correlations = Recorder::new();
    let seen = correlations.clone();
    cart.register_handler(move |ctx: &Context<'_>, event: CartUpdated| {
        seen.record((
            event.total,
            ctx.correlation_id().to_string(),
            ctx.source().to_string(),
        ));
        Ok(())
    })
    .unwrap();

    cart.start().unwrap();
    payments.start().unwrap();

    cart.send("PaymentCalculationService", &AddItemToCart::new("X", 10.0, 3))
        .unwrap();

    assert!(wait_until(WAIT, || correlations.len() == 1));
    let (total, correlation_id, source) = correlations.all().remove(0);
    assert_eq!(total, 30.0);
    assert_eq!(source, "PaymentCalculationService");
    // The command started the conversation, so its message id is the correlation id.
    assert!(!correlation_id.is_empty());

    payments.stop().unwrap();
    cart.stop().unwrap();
}

// ============================================================================
// Test 3: Publishing with no subscribers is not an error
// ============================================================================

#[test]
fn publish_without_subscribers_is_dropped() {
    let broker = Broker::new();
    let cart = broker.endpoint("CartService");
    cart.install().unwrap();

    cart.publish(&CartUpdated {
        cart_id: "X".into(),
        total: 99.99,
    })
    .unwrap();

    for queue in broker.queues.queues() {
        assert_eq!(broker.queues.depth(&queue).unwrap(), 0, "queue {}", queue);
    }
}
