//! Simulated payment capture and the grant fan-out that turns a payment
//! into enrollments, cache entries and order receipts.
//!
//! Every checkout is keyed by order id. Grants are upserts, so re-running a
//! pending order (see [`CheckoutService::retry_order`]) only fills in what
//! an interrupted fan-out left behind. Paying again for something that was
//! already captured resumes that order and never charges twice.

pub mod flow;
pub mod gateway;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::cart::{Cart, CartItem};
use crate::catalog::{Product, ProductKind};
use crate::coupon::{AppliedCoupon, quote_coupon};
use crate::enrollment::{Enrollment, LedgerSnapshot};
use crate::entitlement::{CacheSnapshot, Customer, grant_cached, targets_owned};
use crate::error::StorefrontError;
use crate::orders::{Order, OrderStatus, new_order_id};
use crate::stores::Stores;

use flow::{CheckoutFlows, CheckoutPhase, FlowGuard};
use gateway::{CaptureRequest, PaymentGateway};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct ProductQuote {
    pub product_id: String,
    pub total: i64,
    pub coupon: Option<AppliedCoupon>,
    pub discount: i64,
    pub payable: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutReceipt {
    pub orders: Vec<Order>,
    pub total: i64,
    pub discount: i64,
    pub payable: i64,
    pub payment_ref: Option<String>,
    /// Ownership-dependent views must be refreshed by the client.
    pub reload_required: bool,
}

/// Published after every completed checkout.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutCompleted {
    pub user_id: String,
    pub order_ids: Vec<String>,
}

pub struct CheckoutService {
    stores: Stores,
    gateway: Arc<dyn PaymentGateway + Send + Sync>,
    flows: CheckoutFlows,
    events: broadcast::Sender<CheckoutCompleted>,
}

impl CheckoutService {
    pub fn new(stores: Stores, gateway: Arc<dyn PaymentGateway + Send + Sync>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            stores,
            gateway,
            flows: CheckoutFlows::default(),
            events,
        }
    }

    pub fn phase(&self, user_id: &str) -> CheckoutPhase {
        self.flows.phase(user_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CheckoutCompleted> {
        self.events.subscribe()
    }

    pub async fn quote_product(
        &self,
        product_id: &str,
        coupon_code: Option<&str>,
    ) -> Result<(Product, ProductQuote), StorefrontError> {
        let product = self
            .stores
            .catalog
            .get_product(product_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| StorefrontError::NotFound("product not found".into()))?;

        let quote = match coupon_code {
            Some(code) => {
                let q = quote_coupon(self.stores.coupons.as_ref(), code, product.price).await?;
                ProductQuote {
                    product_id: product.id.clone(),
                    total: q.total,
                    coupon: Some(q.coupon),
                    discount: q.discount,
                    payable: q.payable,
                }
            }
            None => ProductQuote {
                product_id: product.id.clone(),
                total: product.price,
                coupon: None,
                discount: 0,
                payable: product.price,
            },
        };
        Ok((product, quote))
    }

    /// Buys one product. `on_complete` runs once the purchase is durable,
    /// before the flow resets to `details`.
    pub async fn pay_product<F>(
        &self,
        customer: &Customer,
        product_id: &str,
        coupon_code: Option<&str>,
        on_complete: F,
    ) -> Result<CheckoutReceipt, StorefrontError>
    where
        F: FnOnce(&CheckoutReceipt) + Send,
    {
        let guard = self.flows.begin(&customer.user_id)?;

        // 已扣款未完成的订单直接续做，不再扣款
        let paid = self.stores.orders.list_paid_pending_orders(&customer.user_id).await?;
        if let Some(mut order) = paid.into_iter().find(|o| o.product_id == product_id) {
            tracing::info!(order_id = %order.id, product_id, "resuming paid order");
            self.fulfill(&mut order).await?;
            let receipt = receipt_for(vec![order], false);
            return Ok(self.complete(guard, customer, receipt, on_complete));
        }

        let (product, quote) = self.quote_product(product_id, coupon_code).await?;

        let owned = self
            .stores
            .resolver()
            .resolve(customer, std::slice::from_ref(&product))
            .await?;
        if owned.is_owned(&product.id) {
            return Err(StorefrontError::Conflict("product already owned".into()));
        }

        let mut order = pending_order(customer, &CartItem::from(&product), quote.payable);
        self.stores.orders.create_order(&order).await?;
        tracing::info!(order_id = %order.id, product_id = %product.id, amount = order.amount, "checkout started");

        let payment_ref = self.capture(customer, std::slice::from_mut(&mut order), quote.payable).await?;
        self.fulfill(&mut order).await?;

        let receipt = CheckoutReceipt {
            orders: vec![order],
            total: quote.total,
            discount: quote.discount,
            payable: quote.payable,
            payment_ref: Some(payment_ref),
            reload_required: false,
        };
        Ok(self.complete(guard, customer, receipt, on_complete))
    }

    /// Buys everything in the user's cart with one capture for the
    /// post-discount total the user confirmed. One order per cart item.
    pub async fn pay_cart<F>(
        &self,
        customer: &Customer,
        confirmed_total: i64,
        on_complete: F,
    ) -> Result<CheckoutReceipt, StorefrontError>
    where
        F: FnOnce(&CheckoutReceipt) + Send,
    {
        let guard = self.flows.begin(&customer.user_id)?;
        let mut cart = self.stores.carts.load_cart(&customer.user_id).await?;
        if cart.is_empty() {
            return Err(StorefrontError::Validation("cart is empty".into()));
        }

        let paid: Vec<Order> = self
            .stores
            .orders
            .list_paid_pending_orders(&customer.user_id)
            .await?
            .into_iter()
            .filter(|o| cart.items().iter().any(|i| i.id == o.product_id))
            .collect();
        if !paid.is_empty() {
            return self.resume_cart(guard, customer, cart, paid, on_complete).await;
        }

        let (total, discount, payable) = (cart.total(), cart.discount(), cart.payable());
        if confirmed_total != payable {
            return Err(StorefrontError::Validation("amount mismatch".into()));
        }

        let prices: Vec<i64> = cart.items().iter().map(|i| i.price).collect();
        let amounts = allocate_amounts(&prices, discount);
        let mut orders: Vec<Order> = cart
            .items()
            .iter()
            .zip(amounts)
            .map(|(item, amount)| pending_order(customer, item, amount))
            .collect();
        for order in &orders {
            self.stores.orders.create_order(order).await?;
        }
        tracing::info!(
            user_id = %customer.user_id,
            items = orders.len(),
            total,
            discount,
            payable,
            "cart checkout started"
        );

        let payment_ref = self.capture(customer, &mut orders, payable).await?;
        for order in orders.iter_mut() {
            self.fulfill(order).await?;
        }

        cart.clear();
        self.stores.carts.save_cart(&customer.user_id, &cart).await?;

        let receipt = CheckoutReceipt {
            orders,
            total,
            discount,
            payable,
            payment_ref: Some(payment_ref),
            reload_required: true,
        };
        Ok(self.complete(guard, customer, receipt, on_complete))
    }

    /// Finishes the captured orders of an interrupted cart checkout, then
    /// drops every cart item the user now owns. Items added afterwards stay.
    async fn resume_cart<F>(
        &self,
        guard: FlowGuard<'_>,
        customer: &Customer,
        mut cart: Cart,
        mut orders: Vec<Order>,
        on_complete: F,
    ) -> Result<CheckoutReceipt, StorefrontError>
    where
        F: FnOnce(&CheckoutReceipt) + Send,
    {
        tracing::info!(user_id = %customer.user_id, orders = orders.len(), "resuming paid cart checkout");
        for order in orders.iter_mut() {
            self.fulfill(order).await?;
        }

        let ledger = LedgerSnapshot::load(self.stores.ledger.as_ref(), &customer.user_id).await?;
        let settled: Vec<String> = cart
            .items()
            .iter()
            .filter(|i| targets_owned(&i.target_ids, &CacheSnapshot::default(), &ledger))
            .map(|i| i.id.clone())
            .collect();
        for id in &settled {
            cart.remove(id);
        }
        cart.remove_coupon();
        self.stores.carts.save_cart(&customer.user_id, &cart).await?;

        let receipt = receipt_for(orders, true);
        Ok(self.complete(guard, customer, receipt, on_complete))
    }

    /// Finishes a pending order from what the order itself records. Orders
    /// that already succeeded come back unchanged.
    pub async fn retry_order<F>(
        &self,
        customer: &Customer,
        order_id: &str,
        on_complete: F,
    ) -> Result<CheckoutReceipt, StorefrontError>
    where
        F: FnOnce(&CheckoutReceipt) + Send,
    {
        let guard = self.flows.begin(&customer.user_id)?;
        let mut order = self
            .stores
            .orders
            .get_order(order_id)
            .await?
            .filter(|o| o.user_id == customer.user_id)
            .ok_or_else(|| StorefrontError::NotFound("order not found".into()))?;

        match order.status {
            OrderStatus::Success => {
                return Ok(receipt_for(vec![order], false));
            }
            OrderStatus::Failed => {
                return Err(StorefrontError::Conflict(
                    "payment for this order failed; start a new checkout".into(),
                ));
            }
            OrderStatus::Pending => {}
        }

        if order.payment_ref.is_none() {
            let amount = order.amount;
            self.capture(customer, std::slice::from_mut(&mut order), amount).await?;
        }
        tracing::info!(order_id = %order.id, targets = order.targets.len(), "retrying order fulfilment");
        self.fulfill(&mut order).await?;

        let receipt = receipt_for(vec![order], false);
        Ok(self.complete(guard, customer, receipt, on_complete))
    }

    /// One capture for `amount`; on approval every order gets the payment
    /// reference, on decline every order is marked failed.
    async fn capture(
        &self,
        customer: &Customer,
        orders: &mut [Order],
        amount: i64,
    ) -> Result<String, StorefrontError> {
        let reference = orders.first().map(|o| o.id.clone()).unwrap_or_default();
        let request = CaptureRequest {
            reference,
            amount,
            email: customer.email.clone(),
        };
        match self.gateway.capture(&request).await {
            Ok(receipt) => {
                for order in orders.iter_mut() {
                    self.stores.orders.record_payment(&order.id, &receipt.payment_ref).await?;
                    order.payment_ref = Some(receipt.payment_ref.clone());
                }
                tracing::debug!(
                    payment_ref = %receipt.payment_ref,
                    amount = receipt.amount,
                    captured_at = %receipt.captured_at,
                    "payment recorded"
                );
                Ok(receipt.payment_ref)
            }
            Err(e) => {
                for order in orders.iter_mut() {
                    if let Err(mark_err) = self.stores.orders.set_status(&order.id, OrderStatus::Failed).await {
                        tracing::error!(order_id = %order.id, "failed to mark order failed: {}", mark_err);
                    }
                    order.status = OrderStatus::Failed;
                }
                tracing::warn!(reference = %request.reference, "capture failed: {}", e);
                Err(e)
            }
        }
    }

    /// (a) ledger rows for every target, (b) cache entries for every target,
    /// (c) order marked `Success`. The first failing write aborts and leaves
    /// the order pending for a retry.
    async fn fulfill(&self, order: &mut Order) -> Result<(), StorefrontError> {
        let index = self.target_index().await;
        let now = Utc::now();

        for target in &order.targets {
            let enrollment = Enrollment {
                user_id: order.user_id.clone(),
                target_id: target.clone(),
                target_type: index.get(target).copied().unwrap_or(order.target_type),
                created_at: now,
            };
            if let Err(e) = self.stores.ledger.grant(&enrollment).await {
                tracing::error!(order_id = %order.id, target_id = %target, "enrollment write failed: {}", e);
                return Err(e);
            }
        }
        for target in &order.targets {
            if let Err(e) = grant_cached(self.stores.entitlements.as_ref(), target, &order.user_email).await {
                tracing::error!(order_id = %order.id, target_id = %target, "entitlement cache write failed: {}", e);
                return Err(e);
            }
        }

        self.stores.orders.set_status(&order.id, OrderStatus::Success).await?;
        order.status = OrderStatus::Success;
        tracing::info!(order_id = %order.id, targets = order.targets.len(), "order fulfilled");
        Ok(())
    }

    // 内容树只用于确定授权单元的类型；读取失败时回退到商品类型
    async fn target_index(&self) -> HashMap<String, ProductKind> {
        match self.stores.content.get_content_tree().await {
            Ok(record) => record.tree.target_index(),
            Err(e) => {
                tracing::warn!("content tree unavailable, using product kinds: {}", e);
                HashMap::new()
            }
        }
    }

    fn complete<F>(
        &self,
        guard: FlowGuard<'_>,
        customer: &Customer,
        receipt: CheckoutReceipt,
        on_complete: F,
    ) -> CheckoutReceipt
    where
        F: FnOnce(&CheckoutReceipt),
    {
        if let Err(e) = guard.succeed() {
            tracing::warn!(user_id = %customer.user_id, "checkout flow out of sync: {}", e);
        }
        on_complete(&receipt);
        // 没有订阅者时 send 返回错误，属正常情况
        let _ = self.events.send(CheckoutCompleted {
            user_id: customer.user_id.clone(),
            order_ids: receipt.orders.iter().map(|o| o.id.clone()).collect(),
        });
        drop(guard);
        receipt
    }
}

fn pending_order(customer: &Customer, item: &CartItem, amount: i64) -> Order {
    Order {
        id: new_order_id(),
        user_id: customer.user_id.clone(),
        user_email: customer.email.clone(),
        product_id: item.id.clone(),
        plan: item.name.clone(),
        amount,
        status: OrderStatus::Pending,
        targets: item.target_ids.clone(),
        target_type: item.kind,
        payment_ref: None,
        created_at: Utc::now(),
        list_price: item.price,
    }
}

/// Receipt rebuilt from stored orders: list prices, charged amounts and the
/// difference between them.
fn receipt_for(orders: Vec<Order>, reload_required: bool) -> CheckoutReceipt {
    // 旧数据没有原价，按实付计
    let total: i64 = orders.iter().map(|o| o.list_price.max(o.amount)).sum();
    let payable: i64 = orders.iter().map(|o| o.amount).sum();
    CheckoutReceipt {
        total,
        discount: total - payable,
        payable,
        payment_ref: orders.first().and_then(|o| o.payment_ref.clone()),
        orders,
        reload_required,
    }
}

/// Splits `discount` across `prices` in proportion to each price and
/// returns what each item pays. Rounding leftovers go to the earliest items
/// with room, so the amounts always sum to `sum(prices) - discount`.
pub fn allocate_amounts(prices: &[i64], discount: i64) -> Vec<i64> {
    let total: i64 = prices.iter().sum();
    if total <= 0 || discount <= 0 {
        return prices.to_vec();
    }
    let discount = discount.min(total);

    let mut shares: Vec<i64> = prices
        .iter()
        .map(|p| ((*p as i128 * discount as i128) / total as i128) as i64)
        .collect();
    let mut remainder = discount - shares.iter().sum::<i64>();
    for (share, price) in shares.iter_mut().zip(prices) {
        if remainder == 0 {
            break;
        }
        let extra = (price - *share).min(remainder);
        *share += extra;
        remainder -= extra;
    }

    prices.iter().zip(shares).map(|(p, s)| p - s).collect()
}
