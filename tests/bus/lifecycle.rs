//! Endpoint state machine and registration rules.

use durable_bus::{BusConfig, BusError, Context, EndpointState, MessageKind};

use crate::support::{AddItemToCart, Broker, CartUpdated, CheckoutCart};

#[test]
fn handlers_cannot_be_added_once_running() {
    let broker = Broker::new();
    let payments = broker.endpoint("payments");
    payments.start().unwrap();

    let err = payments
        .register_handler(|_: &Context<'_>, _: AddItemToCart| Ok(()))
        .unwrap_err();
    assert!(matches!(
        err,
        BusError::LateRegistration { ref message_type, state: EndpointState::Running }
            if message_type == "AddItemToCart"
    ));

    payments.stop().unwrap();
    assert!(matches!(
        payments.register_handler(|_: &Context<'_>, _: CartUpdated| Ok(())),
        Err(BusError::LateRegistration { state: EndpointState::Stopped, .. })
    ));
}

#[test]
fn a_stopped_endpoint_cannot_restart() {
    let broker = Broker::new();
    let payments = broker.endpoint("payments");
    payments.start().unwrap();
    payments.stop().unwrap();

    assert!(matches!(
        payments.start(),
        Err(BusError::InvalidState { operation: "start", state: EndpointState::Stopped })
    ));
}

#[test]
fn one_handler_per_command_type() {
    let broker = Broker::new();
    let payments = broker.endpoint("payments");
    payments
        .register_handler(|_: &Context<'_>, _: AddItemToCart| Ok(()))
        .unwrap();

    assert!(matches!(
        payments.register_handler(|_: &Context<'_>, _: AddItemToCart| Ok(())),
        Err(BusError::DuplicateHandler { .. })
    ));
}

#[test]
fn derive_uses_struct_name_or_override() {
    use durable_bus::Message;

    assert_eq!(AddItemToCart::MESSAGE_TYPE, "AddItemToCart");
    assert_eq!(AddItemToCart::KIND, MessageKind::Command);
    assert_eq!(CartUpdated::MESSAGE_TYPE, "CartUpdated");
    assert_eq!(CartUpdated::KIND, MessageKind::Event);
    assert_eq!(CheckoutCart::MESSAGE_TYPE, "cart.checkout");
}

#[test]
fn routed_sends_use_configured_destination() {
    let broker = Broker::new();
    let payments = broker.endpoint("payments");
    payments.install().unwrap();

    let cart = broker.endpoint_with(
        crate::support::fast_config("cart").with_route::<AddItemToCart>("payments"),
    );
    cart.send_routed(&AddItemToCart::new("X", 1.0, 1)).unwrap();
    assert_eq!(broker.queues.peek("payments").len(), 1);

    assert!(matches!(
        cart.send_routed(&CheckoutCart { cart_id: "X".into() }),
        Err(BusError::NoRoute { ref message_type }) if message_type == "cart.checkout"
    ));
}

#[test]
fn invalid_endpoint_names_are_rejected() {
    let broker = Broker::new();
    let result = durable_bus::Bus::new(
        BusConfig::new("has spaces"),
        std::sync::Arc::new(broker.queues.clone()),
        std::sync::Arc::new(broker.subscriptions.clone()),
    );
    assert!(matches!(result, Err(BusError::InvalidName { .. })));
}

#[test]
fn one_type_name_cannot_be_both_kinds() {
    #[derive(serde::Serialize, serde::Deserialize, durable_bus::Event)]
    #[message(name = "AddItemToCart")]
    struct Impostor;

    let broker = Broker::new();
    let payments = broker.endpoint("payments");
    payments
        .register_handler(|_: &Context<'_>, _: AddItemToCart| Ok(()))
        .unwrap();

    assert!(matches!(
        payments.register_type::<Impostor>(),
        Err(BusError::SchemaConflict { registered: MessageKind::Command, .. })
    ));
}
