//! Order placement.
//!
//! Turns the current identity and a cart snapshot into an order row plus its
//! item rows. The two inserts are separate requests with no transaction, so a
//! failure between them leaves an order without items; that case is logged
//! with the order id and the cart is kept so the customer can retry.

use std::sync::Arc;

use secrecy::SecretString;
use thiserror::Error;
use tracing::{error, info, instrument};

use cloud_kitchen_core::{OrderId, OrderStatus, Phone, PhoneError, Price, UserId};

use crate::backend::{BackendError, OrderStore};
use crate::cart::{Cart, CartEngine};
use crate::config::CheckoutConfig;
use crate::error::add_breadcrumb;
use crate::identity::{IdentityContext, IdentityState};
use crate::models::{NewOrder, NewOrderItem, OrderRecord};
use crate::validation::{self, ValidationError};

/// Errors that can occur while placing an order.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Nobody is signed in and no guest details were given.
    #[error("sign in or continue as guest to place an order")]
    NotSignedIn,

    /// Guest ordering is switched off.
    #[error("guest checkout is disabled")]
    GuestCheckoutDisabled,

    /// Nothing to order.
    #[error("cart is empty")]
    EmptyCart,

    /// Missing or malformed contact phone.
    #[error("invalid phone: {0}")]
    InvalidPhone(#[from] PhoneError),

    /// Address or instructions failed validation.
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// A backend write failed.
    #[error("order placement failed: {source}")]
    OrderPlacement {
        /// Set when the order row was written but its items were not.
        order_id: Option<OrderId>,
        #[source]
        source: BackendError,
    },
}

/// Customer-entered checkout fields.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub delivery_address: String,
    /// Overrides the phone on file.
    pub phone: Option<String>,
    pub special_instructions: Option<String>,
}

/// A placed order.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order: OrderRecord,
    pub subtotal: Price,
    pub delivery_fee: Price,
    pub total: Price,
    /// `false` if the cart was modified while the order was being written.
    pub cart_cleared: bool,
}

struct Customer {
    id: Option<UserId>,
    name: String,
    email: String,
    phone: Option<String>,
    access_token: Option<SecretString>,
}

/// Places orders from the shared cart.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    identity: IdentityContext,
    cart: CartEngine,
    orders: Arc<dyn OrderStore>,
    config: CheckoutConfig,
}

impl CheckoutOrchestrator {
    #[must_use]
    pub fn new(
        identity: IdentityContext,
        cart: CartEngine,
        orders: Arc<dyn OrderStore>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            identity,
            cart,
            orders,
            config,
        }
    }

    fn customer(&self) -> Result<Customer, CheckoutError> {
        match self.identity.state() {
            IdentityState::Authenticated(profile) => Ok(Customer {
                id: Some(profile.id),
                name: profile.display_name().to_string(),
                email: profile.email.clone(),
                phone: profile.phone.clone(),
                access_token: self
                    .identity
                    .sessions()
                    .current()
                    .map(|session| session.access_token().clone()),
            }),
            IdentityState::Guest(_) if !self.config.allow_guest_checkout => {
                Err(CheckoutError::GuestCheckoutDisabled)
            }
            IdentityState::Guest(guest) => Ok(Customer {
                id: None,
                name: guest.full_name().to_string(),
                email: guest.email().to_string(),
                phone: Some(guest.phone().to_string()),
                access_token: None,
            }),
            IdentityState::Loading | IdentityState::Anonymous => Err(CheckoutError::NotSignedIn),
        }
    }

    /// Write an order for the current cart.
    ///
    /// The total is the cart subtotal plus the configured delivery fee. On
    /// success the cart is cleared unless it changed while the order was
    /// being written.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::NotSignedIn`] / [`CheckoutError::GuestCheckoutDisabled`]
    ///   depending on the identity.
    /// - [`CheckoutError::EmptyCart`], [`CheckoutError::InvalidPhone`] or
    ///   [`CheckoutError::Invalid`] for bad input.
    /// - [`CheckoutError::OrderPlacement`] if either insert fails; the cart is
    ///   left as it was.
    #[instrument(skip_all)]
    pub async fn place_order(&self, request: &CheckoutRequest) -> Result<OrderReceipt, CheckoutError> {
        let customer = self.customer()?;

        let delivery_address = validation::delivery_address(&request.delivery_address)?;
        let special_instructions =
            validation::special_instructions(request.special_instructions.as_deref())?;
        let phone = request
            .phone
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .or(customer.phone.as_deref())
            .map_or(Err(PhoneError::Empty), Phone::parse)?;

        let cart = self.cart.snapshot();
        let Some(restaurant_id) = cart.merchant() else {
            return Err(CheckoutError::EmptyCart);
        };

        let subtotal = cart.total_amount();
        let delivery_fee = self.config.delivery_fee;
        let total = subtotal + delivery_fee;

        let order = NewOrder {
            customer_id: customer.id,
            restaurant_id,
            customer_name: customer.name,
            customer_email: customer.email,
            customer_phone: phone.to_string(),
            status: OrderStatus::Pending,
            total_amount: total,
            delivery_address,
            special_instructions,
        };

        let token = customer.access_token.as_ref();
        let record = self
            .orders
            .insert_order(&order, token)
            .await
            .map_err(|source| CheckoutError::OrderPlacement {
                order_id: None,
                source,
            })?;

        let items = order_items(record.id, &cart);
        if let Err(source) = self.orders.insert_order_items(&items, token).await {
            error!(
                order_id = %record.id,
                error = %source,
                "Order items not written, order row left without items"
            );
            return Err(CheckoutError::OrderPlacement {
                order_id: Some(record.id),
                source,
            });
        }

        let cart_cleared = self.cart.clear_if_revision(cart.revision());
        info!(
            order_id = %record.id,
            restaurant_id = %restaurant_id,
            total = %total,
            guest = customer.id.is_none(),
            cart_cleared,
            "Order placed"
        );
        let order_id = record.id.to_string();
        add_breadcrumb("checkout", "Order placed", Some(&[("order_id", order_id.as_str())]));

        Ok(OrderReceipt {
            order: record,
            subtotal,
            delivery_fee,
            total,
            cart_cleared,
        })
    }
}

fn order_items(order_id: OrderId, cart: &Cart) -> Vec<NewOrderItem> {
    cart.lines()
        .iter()
        .map(|line| NewOrderItem {
            order_id,
            menu_item_id: line.item_id,
            item_name: line.name.clone(),
            price: line.price,
            quantity: line.quantity,
        })
        .collect()
}
