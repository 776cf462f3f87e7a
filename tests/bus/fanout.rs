//! Event fan-out to subscribers.

use std::collections::BTreeSet;

use durable_bus::codec::EnvelopeCodec;
use durable_bus::{BusError, Context, QueueStore, SubscriptionStore};

use crate::support::{wait_until, Broker, CartUpdated, Recorder, WAIT};

fn updated(total: f64) -> CartUpdated {
    CartUpdated {
        cart_id: "X".into(),
        total,
    }
}

// ============================================================================
// Test 1: One copy per subscriber, none for anyone else
// ============================================================================

#[test]
fn every_subscriber_gets_exactly_one_copy() {
    let broker = Broker::new();

    let subscribers = ["billing", "shipping", "analytics"];
    for name in subscribers {
        let endpoint = broker.endpoint(name);
        endpoint
            .register_handler(|_: &Context<'_>, _: CartUpdated| Ok(()))
            .unwrap();
        endpoint.install().unwrap();
    }
    broker.endpoint("bystander").install().unwrap();

    let cart = broker.endpoint("cart");
    cart.publish(&updated(42.0)).unwrap();

    let mut message_ids = BTreeSet::new();
    for name in subscribers {
        let copies = broker.queues.peek(name);
        assert_eq!(copies.len(), 1, "{} should hold one copy", name);
        let envelope = EnvelopeCodec::decode_unchecked(&copies[0]).unwrap();
        assert_eq!(envelope.message_type(), "CartUpdated");
        assert_eq!(envelope.destination(), "");
        assert_eq!(envelope.source(), "cart");
        message_ids.insert(envelope.message_id().to_string());
    }
    // Copies of one publish share its message id.
    assert_eq!(message_ids.len(), 1);

    assert_eq!(broker.queues.depth("bystander").unwrap(), 0);
    assert_eq!(broker.queues.depth("cart").unwrap_or(0), 0);
}

// ============================================================================
// Test 2: Several local handlers for one event run in registration order
// ============================================================================

#[test]
fn local_event_handlers_run_in_order() {
    let broker = Broker::new();

    let billing = broker.endpoint("billing");
    let calls = Recorder::new();
    for label in ["ledger", "invoice", "email"] {
        let seen = calls.clone();
        billing
            .register_handler(move |_: &Context<'_>, event: CartUpdated| {
                seen.record(format!("{}:{}", label, event.total));
                Ok(())
            })
            .unwrap();
    }
    billing.start().unwrap();

    broker.endpoint("cart").publish(&updated(7.5)).unwrap();

    assert!(wait_until(WAIT, || calls.len() == 3));
    let stats = billing.stop().unwrap();
    assert_eq!(calls.all(), vec!["ledger:7.5", "invoice:7.5", "email:7.5"]);
    assert_eq!(stats.handled, 1);
}

// ============================================================================
// Test 3: Subscribing twice is the same as subscribing once
// ============================================================================

#[test]
fn subscription_is_idempotent() {
    let broker = Broker::new();

    let billing = broker.endpoint("billing");
    billing.install().unwrap();
    billing.subscribe::<CartUpdated>().unwrap();
    billing.subscribe::<CartUpdated>().unwrap();
    broker.subscriptions.register("CartUpdated", "billing").unwrap();

    assert_eq!(
        broker.subscriptions.subscribers_of("CartUpdated").unwrap().len(),
        1
    );

    broker.endpoint("cart").publish(&updated(1.0)).unwrap();
    assert_eq!(broker.queues.depth("billing").unwrap(), 1);
}

// ============================================================================
// Test 4: Late subscribers do not see earlier events
// ============================================================================

#[test]
fn no_retroactive_delivery() {
    let broker = Broker::new();
    let cart = broker.endpoint("cart");

    let billing = broker.endpoint("billing");
    billing.install().unwrap();

    cart.publish(&updated(1.0)).unwrap();
    billing.subscribe::<CartUpdated>().unwrap();
    cart.publish(&updated(2.0)).unwrap();

    let copies = broker.queues.peek("billing");
    assert_eq!(copies.len(), 1);
    let envelope = EnvelopeCodec::decode_unchecked(&copies[0]).unwrap();
    let event: CartUpdated = serde_json::from_slice(envelope.payload()).unwrap();
    assert_eq!(event.total, 2.0);
}

// ============================================================================
// Test 5: Failing subscriber queues are reported, the rest keep their copy
// ============================================================================

#[test]
fn partial_publish_names_failed_queues() {
    let broker = Broker::new();

    let billing = broker.endpoint("billing");
    billing.install().unwrap();
    billing.subscribe::<CartUpdated>().unwrap();
    // Subscribed, but its queue was never created.
    broker.subscriptions.register("CartUpdated", "ghost").unwrap();

    let err = broker.endpoint("cart").publish(&updated(3.0)).unwrap_err();
    match err {
        BusError::PartialPublish {
            message_type,
            delivered,
            failed,
            ..
        } => {
            assert_eq!(message_type, "CartUpdated");
            assert_eq!(delivered, vec!["billing"]);
            assert_eq!(failed.len(), 1);
            assert_eq!(failed[0].0, "ghost");
        }
        other => panic!("expected PartialPublish, got {:?}", other),
    }

    assert_eq!(broker.queues.depth("billing").unwrap(), 1);
}

// ============================================================================
// Test 6: Deregistering stops future copies
// ============================================================================

#[test]
fn deregistered_endpoint_gets_no_more_events() {
    let broker = Broker::new();

    let billing = broker.endpoint("billing");
    billing
        .register_handler(|_: &Context<'_>, _: CartUpdated| Ok(()))
        .unwrap();
    billing.install().unwrap();

    let cart = broker.endpoint("cart");
    cart.publish(&updated(1.0)).unwrap();
    assert_eq!(billing.deregister().unwrap(), 1);
    cart.publish(&updated(2.0)).unwrap();

    assert_eq!(broker.queues.depth("billing").unwrap(), 1);
    assert!(broker.subscriptions.is_empty());
}
