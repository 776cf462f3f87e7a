mod message;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(Command)] / #[derive(Event)]
// ============================================================================

/// Derive macro that marks a struct as a command.
///
/// Implements `durable_bus::Message` (with `KIND = MessageKind::Command`) and
/// the `durable_bus::Command` marker trait. The message type name defaults to
/// the struct name.
///
/// # Usage
///
/// ```ignore
/// #[derive(Serialize, Deserialize, Command)]
/// struct AddItemToCart {
///     cart_id: String,
///     price: f64,
///     quantity: u32,
/// }
///
/// assert_eq!(AddItemToCart::MESSAGE_TYPE, "AddItemToCart");
/// ```
///
/// Override the wire name with `#[message(name = "...")]`:
/// ```ignore
/// #[derive(Serialize, Deserialize, Command)]
/// #[message(name = "cart.add-item")]
/// struct AddItemToCart { /* ... */ }
/// ```
#[proc_macro_derive(Command, attributes(message))]
pub fn derive_command(input: TokenStream) -> TokenStream {
    message::derive_message(input, message::Kind::Command)
}

/// Derive macro that marks a struct as an event.
///
/// Same as `#[derive(Command)]` but implements `durable_bus::Event` and
/// uses `KIND = MessageKind::Event`, so the bus routes it by fan-out.
#[proc_macro_derive(Event, attributes(message))]
pub fn derive_event(input: TokenStream) -> TokenStream {
    message::derive_message(input, message::Kind::Event)
}
