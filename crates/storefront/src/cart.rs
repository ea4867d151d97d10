//! Shopping cart scoped to a single merchant.
//!
//! A cart only ever holds items from one restaurant. Adding an item from a
//! different restaurant is refused with [`CartConflict`] until the caller
//! confirms that the cart should be replaced.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use cloud_kitchen_core::{MenuItemId, MerchantId, Price};

/// A catalog item as shown on a restaurant's menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: MenuItemId,
    pub name: String,
    pub price: Price,
}

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub item_id: MenuItemId,
    pub name: String,
    pub price: Price,
    pub quantity: u32,
    pub merchant_id: MerchantId,
}

impl CartItem {
    /// Price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.price.times(self.quantity)
    }
}

/// The item belongs to a different merchant than the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cart holds items from restaurant {current}, cannot add from {requested}")]
pub struct CartConflict {
    /// Merchant the cart is scoped to.
    pub current: MerchantId,
    /// Merchant of the rejected item.
    pub requested: MerchantId,
}

/// What happened to an add that may have needed confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Added to the existing cart.
    Added,
    /// The cart was emptied and now holds only the new item.
    Replaced,
    /// The replacement was declined; the cart is unchanged.
    Declined,
}

/// Ordered cart lines plus the merchant they belong to.
///
/// Every line's `merchant_id` equals `merchant`, and `merchant` is `None`
/// exactly when there are no lines. `revision` increases on every mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cart {
    lines: Vec<CartItem>,
    merchant: Option<MerchantId>,
    revision: u64,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[CartItem] {
        &self.lines
    }

    /// Merchant the cart is scoped to, `None` when empty.
    #[must_use]
    pub const fn merchant(&self) -> Option<MerchantId> {
        self.merchant
    }

    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    fn push_or_increment(&mut self, item: &MenuItem, merchant: MerchantId) {
        if let Some(line) = self.lines.iter_mut().find(|line| line.item_id == item.id) {
            line.quantity = line.quantity.saturating_add(1);
        } else {
            self.lines.push(CartItem {
                item_id: item.id,
                name: item.name.clone(),
                price: item.price,
                quantity: 1,
                merchant_id: merchant,
            });
        }
        self.merchant = Some(merchant);
        self.touch();
    }

    /// Add one unit of `item`.
    ///
    /// # Errors
    ///
    /// Returns [`CartConflict`] without touching the cart if it already holds
    /// items from another merchant.
    pub fn add_item(&mut self, item: &MenuItem, merchant: MerchantId) -> Result<(), CartConflict> {
        match self.merchant {
            Some(current) if current != merchant => Err(CartConflict {
                current,
                requested: merchant,
            }),
            _ => {
                self.push_or_increment(item, merchant);
                Ok(())
            }
        }
    }

    /// Empty the cart and add one unit of `item` from `merchant`.
    pub fn replace_with(&mut self, item: &MenuItem, merchant: MerchantId) {
        self.lines.clear();
        self.merchant = None;
        self.push_or_increment(item, merchant);
    }

    /// Add `item`, asking `confirm` whether to replace a conflicting cart.
    pub fn add_item_or_confirm(
        &mut self,
        item: &MenuItem,
        merchant: MerchantId,
        confirm: impl FnOnce(&CartConflict) -> bool,
    ) -> AddOutcome {
        match self.add_item(item, merchant) {
            Ok(()) => AddOutcome::Added,
            Err(conflict) if confirm(&conflict) => {
                self.replace_with(item, merchant);
                AddOutcome::Replaced
            }
            Err(_) => AddOutcome::Declined,
        }
    }

    /// Set the quantity of a line; zero or less removes it.
    ///
    /// Unknown items are ignored.
    pub fn update_quantity(&mut self, item_id: MenuItemId, quantity: i32) {
        let Ok(quantity) = u32::try_from(quantity) else {
            self.remove_item(item_id);
            return;
        };
        if quantity == 0 {
            self.remove_item(item_id);
            return;
        }

        if let Some(line) = self.lines.iter_mut().find(|line| line.item_id == item_id) {
            line.quantity = quantity;
            self.touch();
        }
    }

    /// Drop a line. The merchant scope is released once the cart is empty.
    pub fn remove_item(&mut self, item_id: MenuItemId) {
        let before = self.lines.len();
        self.lines.retain(|line| line.item_id != item_id);
        if self.lines.len() == before {
            return;
        }
        if self.lines.is_empty() {
            self.merchant = None;
        }
        self.touch();
    }

    /// Remove every line and the merchant scope.
    pub fn clear(&mut self) {
        self.lines.clear();
        self.merchant = None;
        self.touch();
    }

    /// Sum of line totals.
    #[must_use]
    pub fn total_amount(&self) -> Price {
        self.lines.iter().map(CartItem::line_total).sum()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .fold(0, |count, line| count.saturating_add(line.quantity))
    }
}

/// Shared handle to the application's cart.
///
/// Every operation takes the lock briefly; it is never held across an await.
#[derive(Debug, Clone, Default)]
pub struct CartEngine {
    cart: Arc<Mutex<Cart>>,
}

impl CartEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_cart<T>(&self, f: impl FnOnce(&mut Cart) -> T) -> T {
        let mut cart = self.cart.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut cart)
    }

    /// Copy of the current cart.
    #[must_use]
    pub fn snapshot(&self) -> Cart {
        self.with_cart(|cart| cart.clone())
    }

    #[must_use]
    pub fn revision(&self) -> u64 {
        self.with_cart(|cart| cart.revision())
    }

    /// See [`Cart::add_item`].
    ///
    /// # Errors
    ///
    /// Returns [`CartConflict`] if the cart holds another merchant's items.
    pub fn add_item(&self, item: &MenuItem, merchant: MerchantId) -> Result<(), CartConflict> {
        self.with_cart(|cart| cart.add_item(item, merchant))
    }

    /// See [`Cart::replace_with`].
    pub fn replace_with(&self, item: &MenuItem, merchant: MerchantId) {
        self.with_cart(|cart| cart.replace_with(item, merchant));
    }

    /// Add `item`, awaiting `confirm` if the cart belongs to another merchant.
    ///
    /// The confirmation runs without the cart locked. If the cart was changed
    /// meanwhile so that the item now fits, it is simply added. If it moved to
    /// a merchant other than the one the user agreed to replace, nothing
    /// changes and the outcome is [`AddOutcome::Declined`].
    pub async fn add_item_or_confirm<F, Fut>(
        &self,
        item: &MenuItem,
        merchant: MerchantId,
        confirm: F,
    ) -> AddOutcome
    where
        F: FnOnce(CartConflict) -> Fut,
        Fut: Future<Output = bool>,
    {
        let Err(conflict) = self.add_item(item, merchant) else {
            return AddOutcome::Added;
        };

        if !confirm(conflict).await {
            debug!(current = %conflict.current, requested = %merchant, "Cart replacement declined");
            return AddOutcome::Declined;
        }

        self.with_cart(|cart| {
            if cart.add_item(item, merchant).is_ok() {
                AddOutcome::Added
            } else if cart.merchant() == Some(conflict.current) {
                cart.replace_with(item, merchant);
                AddOutcome::Replaced
            } else {
                debug!(
                    confirmed = %conflict.current,
                    current = ?cart.merchant(),
                    "Cart changed merchant during confirmation"
                );
                AddOutcome::Declined
            }
        })
    }

    /// See [`Cart::update_quantity`].
    pub fn update_quantity(&self, item_id: MenuItemId, quantity: i32) {
        self.with_cart(|cart| cart.update_quantity(item_id, quantity));
    }

    /// See [`Cart::remove_item`].
    pub fn remove_item(&self, item_id: MenuItemId) {
        self.with_cart(|cart| cart.remove_item(item_id));
    }

    pub fn clear(&self) {
        self.with_cart(Cart::clear);
    }

    /// Clear the cart only if nothing changed since `revision` was read.
    ///
    /// Returns `true` if the cart was cleared.
    pub fn clear_if_revision(&self, revision: u64) -> bool {
        self.with_cart(|cart| {
            if cart.revision() == revision {
                cart.clear();
                true
            } else {
                false
            }
        })
    }

    #[must_use]
    pub fn total_amount(&self) -> Price {
        self.with_cart(|cart| cart.total_amount())
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.with_cart(|cart| cart.item_count())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(cents: i64) -> MenuItem {
        MenuItem {
            id: MenuItemId::random(),
            name: format!("Dish {cents}"),
            price: Price::from_cents(cents),
        }
    }

    fn assert_single_merchant(cart: &Cart) {
        match cart.merchant() {
            None => assert!(cart.is_empty()),
            Some(merchant) => {
                assert!(!cart.is_empty());
                assert!(cart.lines().iter().all(|line| line.merchant_id == merchant));
            }
        }
    }

    #[test]
    fn test_same_item_twice_is_one_line() {
        let mut cart = Cart::new();
        let merchant = MerchantId::random();
        let x = item(999);

        cart.add_item(&x, merchant).unwrap();
        cart.add_item(&x, merchant).unwrap();

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 2);
        assert_eq!(cart.total_amount(), Price::from_cents(1998));
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_conflicting_add_leaves_cart_unchanged() {
        let mut cart = Cart::new();
        let m1 = MerchantId::random();
        let m2 = MerchantId::random();
        cart.add_item(&item(500), m1).unwrap();
        let before = cart.clone();

        let result = cart.add_item(&item(700), m2);

        assert_eq!(
            result,
            Err(CartConflict {
                current: m1,
                requested: m2
            })
        );
        assert_eq!(cart, before);
    }

    #[test]
    fn test_add_or_confirm() {
        let mut cart = Cart::new();
        let m1 = MerchantId::random();
        let m2 = MerchantId::random();
        cart.add_item(&item(500), m1).unwrap();

        assert_eq!(
            cart.add_item_or_confirm(&item(700), m2, |_| false),
            AddOutcome::Declined
        );
        assert_eq!(cart.merchant(), Some(m1));

        let replacement = item(700);
        assert_eq!(
            cart.add_item_or_confirm(&replacement, m2, |_| true),
            AddOutcome::Replaced
        );
        assert_eq!(cart.merchant(), Some(m2));
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].item_id, replacement.id);
    }

    #[test]
    fn test_non_positive_quantity_removes() {
        for quantity in [0, -1, i32::MIN] {
            let mut cart = Cart::new();
            let x = item(999);
            cart.add_item(&x, MerchantId::random()).unwrap();

            cart.update_quantity(x.id, quantity);

            assert!(cart.is_empty());
            assert_eq!(cart.merchant(), None);
        }
    }

    #[test]
    fn test_update_quantity_sets_directly() {
        let mut cart = Cart::new();
        let x = item(250);
        cart.add_item(&x, MerchantId::random()).unwrap();

        cart.update_quantity(x.id, 4);

        assert_eq!(cart.lines()[0].quantity, 4);
        assert_eq!(cart.total_amount(), Price::from_cents(1000));
    }

    #[test]
    fn test_remove_last_item_resets_merchant() {
        let mut cart = Cart::new();
        let m = MerchantId::random();
        let a = item(100);
        let b = item(200);
        cart.add_item(&a, m).unwrap();
        cart.add_item(&b, m).unwrap();

        cart.remove_item(a.id);
        assert_eq!(cart.merchant(), Some(m));
        cart.remove_item(b.id);
        assert_eq!(cart.merchant(), None);

        // Any merchant is welcome again
        assert!(cart.add_item(&item(300), MerchantId::random()).is_ok());
    }

    #[test]
    fn test_single_merchant_holds_after_every_operation() {
        let mut cart = Cart::new();
        let m1 = MerchantId::random();
        let m2 = MerchantId::random();
        let a = item(100);
        let b = item(200);
        let c = item(300);

        cart.add_item(&a, m1).unwrap();
        assert_single_merchant(&cart);
        let _ = cart.add_item(&c, m2);
        assert_single_merchant(&cart);
        cart.add_item(&b, m1).unwrap();
        assert_single_merchant(&cart);
        cart.update_quantity(a.id, 3);
        assert_single_merchant(&cart);
        cart.replace_with(&c, m2);
        assert_single_merchant(&cart);
        cart.update_quantity(c.id, 0);
        assert_single_merchant(&cart);
        cart.add_item(&a, m1).unwrap();
        assert_single_merchant(&cart);
        cart.clear();
        assert_single_merchant(&cart);
    }

    #[test]
    fn test_revision_increases_on_mutation() {
        let mut cart = Cart::new();
        let x = item(100);
        let r0 = cart.revision();
        cart.add_item(&x, MerchantId::random()).unwrap();
        let r1 = cart.revision();
        cart.update_quantity(x.id, 2);
        let r2 = cart.revision();
        assert!(r0 < r1 && r1 < r2);

        // No-ops leave the revision alone
        cart.remove_item(MenuItemId::random());
        assert_eq!(cart.revision(), r2);
    }

    #[test]
    fn test_engine_clear_if_revision() {
        let engine = CartEngine::new();
        engine.add_item(&item(100), MerchantId::random()).unwrap();
        let revision = engine.revision();

        engine.add_item(&item(200), engine.snapshot().merchant().unwrap()).unwrap();
        assert!(!engine.clear_if_revision(revision));
        assert_eq!(engine.item_count(), 2);

        assert!(engine.clear_if_revision(engine.revision()));
        assert_eq!(engine.item_count(), 0);
    }

    #[tokio::test]
    async fn test_engine_confirm_runs_unlocked() {
        let engine = CartEngine::new();
        let m1 = MerchantId::random();
        let m2 = MerchantId::random();
        engine.add_item(&item(100), m1).unwrap();

        let observer = engine.clone();
        let outcome = engine
            .add_item_or_confirm(&item(200), m2, |conflict| {
                // Reading the cart here would deadlock if the lock were held
                assert_eq!(observer.snapshot().merchant(), Some(conflict.current));
                async { true }
            })
            .await;

        assert_eq!(outcome, AddOutcome::Replaced);
        assert_eq!(engine.snapshot().merchant(), Some(m2));
    }

    #[tokio::test]
    async fn test_engine_confirm_does_not_replace_a_different_merchant() {
        let engine = CartEngine::new();
        let m1 = MerchantId::random();
        let m2 = MerchantId::random();
        let m3 = MerchantId::random();
        engine.add_item(&item(100), m1).unwrap();

        let other_tab = engine.clone();
        let outcome = engine
            .add_item_or_confirm(&item(200), m2, |_| {
                other_tab.clear();
                other_tab.add_item(&item(300), m3).unwrap();
                async { true }
            })
            .await;

        assert_eq!(outcome, AddOutcome::Declined);
        let cart = engine.snapshot();
        assert_eq!(cart.merchant(), Some(m3));
        assert_eq!(cart.item_count(), 1);
    }
}
