//! Integration tests for order placement.

#![allow(clippy::unwrap_used)]

use secrecy::SecretString;

use cloud_kitchen_core::{MenuItemId, MerchantId, OrderStatus, Price, Role};
use cloud_kitchen_integration_tests::{
    FakeBackend, PASSWORD, memory_store, storefront, storefront_with,
};
use cloud_kitchen_storefront::StorefrontOptions;
use cloud_kitchen_storefront::cart::MenuItem;
use cloud_kitchen_storefront::checkout::{CheckoutError, CheckoutRequest};
use cloud_kitchen_storefront::config::CheckoutConfig;

fn dish(name: &str, cents: i64) -> MenuItem {
    MenuItem {
        id: MenuItemId::random(),
        name: name.to_string(),
        price: Price::from_cents(cents),
    }
}

fn request() -> CheckoutRequest {
    CheckoutRequest {
        delivery_address: "12 Market Street, Springfield".to_string(),
        phone: None,
        special_instructions: Some("Ring twice".to_string()),
    }
}

#[tokio::test]
async fn test_authenticated_order_is_written_and_cart_cleared() {
    let backend = FakeBackend::new();
    let customer = backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();

    let merchant = MerchantId::random();
    let noodles = dish("Noodles", 999);
    app.cart().add_item(&noodles, merchant).unwrap();
    app.cart().add_item(&noodles, merchant).unwrap();

    let receipt = app.checkout().place_order(&request()).await.unwrap();

    assert_eq!(receipt.subtotal, Price::from_cents(1998));
    assert_eq!(receipt.delivery_fee, Price::from_cents(299));
    assert_eq!(receipt.total, Price::from_cents(2297));
    assert!(receipt.cart_cleared);
    assert_eq!(app.cart().item_count(), 0);

    let orders = backend.orders();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].customer_id, Some(customer));
    assert_eq!(orders[0].restaurant_id, Some(merchant));
    assert_eq!(orders[0].status, OrderStatus::Pending);
    assert_eq!(orders[0].customer_name, "Casey Customer");

    let items = backend.order_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].order_id, receipt.order.id);
    assert_eq!(items[0].quantity, 2);
}

#[tokio::test]
async fn test_failed_item_insert_keeps_cart() {
    let backend = FakeBackend::new();
    backend.add_user_with_role("c@x.com", "Casey Customer", Role::Customer);
    backend.fail_order_items(true);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .sign_in("c@x.com", &SecretString::from(PASSWORD))
        .await
        .unwrap();
    app.cart()
        .add_item(&dish("Curry", 1250), MerchantId::random())
        .unwrap();
    let before = app.cart().snapshot();

    let result = app.checkout().place_order(&request()).await;

    let Err(CheckoutError::OrderPlacement { order_id, .. }) = result else {
        panic!("expected an order placement error");
    };
    assert_eq!(order_id, Some(backend.orders()[0].id));
    assert_eq!(app.cart().snapshot(), before);
}

#[tokio::test]
async fn test_failed_order_insert_keeps_cart() {
    let backend = FakeBackend::new();
    backend.fail_orders(true);
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();
    app.cart()
        .add_item(&dish("Curry", 1250), MerchantId::random())
        .unwrap();

    let result = app.checkout().place_order(&request()).await;

    assert!(matches!(
        result,
        Err(CheckoutError::OrderPlacement { order_id: None, .. })
    ));
    assert_eq!(app.cart().item_count(), 1);
}

#[tokio::test]
async fn test_guest_order_has_no_customer_id() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();
    app.cart()
        .add_item(&dish("Soup", 650), MerchantId::random())
        .unwrap();

    app.checkout().place_order(&request()).await.unwrap();

    let orders = backend.orders();
    assert_eq!(orders[0].customer_id, None);
    assert_eq!(orders[0].customer_name, "Jane");
    assert_eq!(orders[0].customer_phone, "+15551234567");
    assert_eq!(orders[0].special_instructions.as_deref(), Some("Ring twice"));
}

#[tokio::test]
async fn test_guest_checkout_can_be_disabled() {
    let backend = FakeBackend::new();
    let options = StorefrontOptions {
        checkout: CheckoutConfig {
            allow_guest_checkout: false,
            ..CheckoutConfig::default()
        },
        ..StorefrontOptions::default()
    };
    let app = storefront_with(&backend, memory_store(), options).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();
    app.cart()
        .add_item(&dish("Soup", 650), MerchantId::random())
        .unwrap();

    let result = app.checkout().place_order(&request()).await;

    assert!(matches!(result, Err(CheckoutError::GuestCheckoutDisabled)));
    assert!(backend.orders().is_empty());
}

#[tokio::test]
async fn test_anonymous_cannot_check_out() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;
    app.cart()
        .add_item(&dish("Soup", 650), MerchantId::random())
        .unwrap();

    let result = app.checkout().place_order(&request()).await;

    assert!(matches!(result, Err(CheckoutError::NotSignedIn)));
}

#[tokio::test]
async fn test_input_is_validated() {
    let backend = FakeBackend::new();
    let app = storefront(&backend, memory_store()).await;
    app.identity()
        .continue_as_guest("Jane", "+15551234567", "jane@x.com")
        .await
        .unwrap();

    let empty = app.checkout().place_order(&request()).await;
    assert!(matches!(empty, Err(CheckoutError::EmptyCart)));

    app.cart()
        .add_item(&dish("Soup", 650), MerchantId::random())
        .unwrap();

    let short_address = CheckoutRequest {
        delivery_address: "Here".to_string(),
        ..request()
    };
    assert!(matches!(
        app.checkout().place_order(&short_address).await,
        Err(CheckoutError::Invalid(_))
    ));

    let bad_phone = CheckoutRequest {
        phone: Some("call me".to_string()),
        ..request()
    };
    assert!(matches!(
        app.checkout().place_order(&bad_phone).await,
        Err(CheckoutError::InvalidPhone(_))
    ));

    assert!(backend.orders().is_empty());
}
