//! The same flows on the file-backed stores, across simulated restarts.

use std::sync::Arc;
use std::time::Duration;

use durable_bus::{
    Bus, Context, FileQueueStore, FileSubscriptionStore, Format, QueueStore, SubscriptionStore,
};

use crate::support::{fast_config, wait_until, AddItemToCart, CartUpdated, Recorder, WAIT};

fn open_endpoint(root: &std::path::Path, name: &str, format: Format) -> (Bus, FileQueueStore) {
    crate::support::init_tracing();
    let queues = FileQueueStore::open(root.join("queues")).unwrap();
    let subscriptions = FileSubscriptionStore::open(root.join("subscriptions")).unwrap();
    let bus = Bus::new(
        fast_config(name).with_serialization(format),
        Arc::new(queues.clone()),
        Arc::new(subscriptions),
    )
    .unwrap();
    (bus, queues)
}

#[test]
fn commands_survive_receiver_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First run: the receiver installs its queue, then goes away.
    {
        let (payments, _) = open_endpoint(dir.path(), "PaymentCalculationService", Format::Json);
        payments.install().unwrap();
    }

    // A producer in "another process" sends while the receiver is down.
    {
        let (cart, _) = open_endpoint(dir.path(), "CartService", Format::Bitcode);
        cart.send("PaymentCalculationService", &AddItemToCart::new("X", 99.99, 1))
            .unwrap();
        cart.send("PaymentCalculationService", &AddItemToCart::new("Y", 5.0, 2))
            .unwrap();
    }

    let (payments, queues) = open_endpoint(dir.path(), "PaymentCalculationService", Format::Json);
    assert_eq!(queues.depth("PaymentCalculationService").unwrap(), 2);

    let totals = Recorder::new();
    let seen = totals.clone();
    payments
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            seen.record((cmd.cart_id, cmd.price * cmd.quantity as f64));
            Ok(())
        })
        .unwrap();
    payments.start().unwrap();

    assert!(wait_until(WAIT, || totals.len() == 2));
    payments.stop().unwrap();

    assert_eq!(
        totals.all(),
        vec![("X".to_string(), 99.99), ("Y".to_string(), 10.0)]
    );
    assert_eq!(queues.depth("PaymentCalculationService").unwrap(), 0);
}

#[test]
fn crash_before_ack_redelivers_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (cart, queues) = open_endpoint(dir.path(), "cart", Format::Json);
        queues.create_queue("payments").unwrap();
        cart.send("payments", &AddItemToCart::new("X", 3.0, 3)).unwrap();

        // Dequeued but never settled: the process "dies" here.
        let taken = queues
            .dequeue("payments", Duration::from_millis(50))
            .unwrap()
            .unwrap();
        assert!(!taken.body.is_empty());
        assert_eq!(queues.depth("payments").unwrap(), 0);
    }

    let (payments, queues) = open_endpoint(dir.path(), "payments", Format::Json);
    assert_eq!(queues.depth("payments").unwrap(), 1);

    let totals = Recorder::new();
    let seen = totals.clone();
    payments
        .register_handler(move |_: &Context<'_>, cmd: AddItemToCart| {
            seen.record(cmd.price * cmd.quantity as f64);
            Ok(())
        })
        .unwrap();
    payments.start().unwrap();

    assert!(wait_until(WAIT, || totals.len() == 1));
    payments.stop().unwrap();
    assert_eq!(totals.all(), vec![9.0]);
    assert_eq!(queues.depth("payments").unwrap(), 0);
}

#[test]
fn subscriptions_outlive_the_subscriber() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (billing, _) = open_endpoint(dir.path(), "billing", Format::Json);
        billing
            .register_handler(|_: &Context<'_>, _: CartUpdated| Ok(()))
            .unwrap();
        billing.install().unwrap();
    }

    // Publisher starts fresh and still finds the subscriber on disk.
    let (cart, queues) = open_endpoint(dir.path(), "cart", Format::Json);
    cart.publish(&CartUpdated {
        cart_id: "X".into(),
        total: 12.0,
    })
    .unwrap();
    assert_eq!(queues.depth("billing").unwrap(), 1);

    let subscriptions = FileSubscriptionStore::open(dir.path().join("subscriptions")).unwrap();
    assert_eq!(
        subscriptions
            .subscriptions_for("billing")
            .unwrap()
            .into_iter()
            .collect::<Vec<_>>(),
        vec!["CartUpdated"]
    );

    let delivery = queues
        .dequeue("billing", Duration::from_millis(50))
        .unwrap()
        .unwrap();
    queues.ack(&delivery.handle).unwrap();
}
