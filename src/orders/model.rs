//! Order aggregate and its embedded value types

use crate::payments::types::Gateway;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    Vnpay,
    Momo,
    Paypal,
    BankTransfer,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cod => "cod",
            PaymentMethod::Vnpay => "vnpay",
            PaymentMethod::Momo => "momo",
            PaymentMethod::Paypal => "paypal",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }

    /// The online gateway that settles this method, if any.
    pub fn gateway(&self) -> Option<Gateway> {
        match self {
            PaymentMethod::Vnpay => Some(Gateway::Vnpay),
            PaymentMethod::Momo => Some(Gateway::Momo),
            PaymentMethod::Paypal => Some(Gateway::Paypal),
            PaymentMethod::Cod | PaymentMethod::BankTransfer => None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.gateway().is_some()
    }
}

impl From<Gateway> for PaymentMethod {
    fn from(gateway: Gateway) -> Self {
        match gateway {
            Gateway::Vnpay => PaymentMethod::Vnpay,
            Gateway::Momo => PaymentMethod::Momo,
            Gateway::Paypal => PaymentMethod::Paypal,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipping,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Customers may cancel only before fulfilment starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Next step of the forward-only fulfilment chain.
    pub fn next(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => Some(OrderStatus::Confirmed),
            OrderStatus::Confirmed => Some(OrderStatus::Processing),
            OrderStatus::Processing => Some(OrderStatus::Shipping),
            OrderStatus::Shipping => Some(OrderStatus::Delivered),
            OrderStatus::Delivered | OrderStatus::Cancelled => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Confirmed => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Shipping => 3,
            OrderStatus::Delivered => 4,
            OrderStatus::Cancelled => u8::MAX,
        }
    }

    /// True when `target` lies strictly ahead on the fulfilment chain.
    pub fn can_advance_to(&self, target: OrderStatus) -> bool {
        *self != OrderStatus::Cancelled
            && target != OrderStatus::Cancelled
            && target.rank() > self.rank()
    }
}

macro_rules! impl_text_enum {
    ($ty:ty, $field:literal, [$($variant:expr),+ $(,)?]) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                let value = value.trim().to_lowercase();
                [$($variant),+]
                    .into_iter()
                    .find(|candidate| candidate.as_str() == value)
                    .ok_or_else(|| format!("unknown {}: {}", $field, value))
            }
        }
    };
}

impl_text_enum!(
    PaymentMethod,
    "payment method",
    [
        PaymentMethod::Cod,
        PaymentMethod::Vnpay,
        PaymentMethod::Momo,
        PaymentMethod::Paypal,
        PaymentMethod::BankTransfer,
    ]
);
impl_text_enum!(
    PaymentStatus,
    "payment status",
    [
        PaymentStatus::Pending,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Cancelled,
        PaymentStatus::Refunded,
    ]
);
impl_text_enum!(
    OrderStatus,
    "order status",
    [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipping,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ]
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShippingAddress {
    pub full_name: String,
    pub phone: String,
    pub address_line: String,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    pub city: String,
    #[serde(default)]
    pub note: Option<String>,
}

impl ShippingAddress {
    /// First required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("full_name", &self.full_name),
            ("phone", &self.phone),
            ("address_line", &self.address_line),
            ("city", &self.city),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }
}

/// Line item frozen at order time. Product name, image and shop name are
/// copied so the order stays readable after the catalog changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub shop_id: Uuid,
    pub product_name: String,
    pub product_image: Option<String>,
    pub shop_name: String,
    pub quantity: i32,
    pub unit_price: BigDecimal,
    pub total_price: BigDecimal,
}

impl OrderItem {
    pub fn from_product(product: &Product, quantity: i32) -> Self {
        Self {
            product_id: product.id,
            shop_id: product.shop_id,
            product_name: product.name.clone(),
            product_image: product.image_url.clone(),
            shop_name: product.shop_name.clone(),
            quantity,
            unit_price: product.price.clone(),
            total_price: &product.price * BigDecimal::from(quantity),
        }
    }
}

/// Gateway-opaque settlement details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PaymentInfo {
    pub gateway: Option<Gateway>,
    pub transaction_id: Option<String>,
    pub result_code: Option<String>,
    #[serde(default)]
    pub raw: serde_json::Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: String,
    pub items: Vec<OrderItem>,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub subtotal: BigDecimal,
    pub shipping_fee: BigDecimal,
    pub total_amount: BigDecimal,
    pub payment_info: Option<PaymentInfo>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds a pending order; totals are derived from the items, never supplied.
    pub fn new(
        customer_id: impl Into<String>,
        items: Vec<OrderItem>,
        shipping_address: ShippingAddress,
        payment_method: PaymentMethod,
        shipping_fee: BigDecimal,
    ) -> Self {
        let now = Utc::now();
        let subtotal = items
            .iter()
            .fold(BigDecimal::zero(), |acc, item| acc + &item.total_price);
        let total_amount = &subtotal + &shipping_fee;

        Self {
            id: Uuid::new_v4(),
            order_number: generate_order_number(now),
            customer_id: customer_id.into(),
            items,
            shipping_address,
            payment_method,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
            subtotal,
            shipping_fee,
            total_amount,
            payment_info: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn totals_consistent(&self) -> bool {
        let lines = self
            .items
            .iter()
            .fold(BigDecimal::zero(), |acc, item| acc + &item.total_price);
        lines == self.subtotal && &lines + &self.shipping_fee == self.total_amount
    }

    pub fn is_owned_by(&self, customer_id: &str) -> bool {
        self.customer_id == customer_id
    }
}

/// `ORD-YYYYMMDD-XXXXXXXX`
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}

/// Catalog product as seen by checkout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub shop_id: Uuid,
    pub shop_name: String,
    pub name: String,
    pub image_url: Option<String>,
    pub price: BigDecimal,
    pub stock_quantity: i32,
    pub is_active: bool,
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    pub fn product(price: i64, stock: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            shop_id: Uuid::new_v4(),
            shop_name: "Test Shop".to_string(),
            name: "Test Product".to_string(),
            image_url: Some("https://cdn.example/p.png".to_string()),
            price: BigDecimal::from(price),
            stock_quantity: stock,
            is_active: true,
        }
    }

    pub fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Nguyen Van A".to_string(),
            phone: "0900000000".to_string(),
            address_line: "1 Le Loi".to_string(),
            ward: None,
            district: Some("District 1".to_string()),
            city: "Ho Chi Minh".to_string(),
            note: None,
        }
    }

    pub fn order_with_method(method: PaymentMethod) -> Order {
        let product = product(1, 10);
        Order::new(
            "customer-1",
            vec![OrderItem::from_product(&product, 2)],
            address(),
            method,
            BigDecimal::zero(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_derives_totals_from_lines() {
        let product = fixtures::product(10, 5);
        let order = Order::new(
            "c-1",
            vec![OrderItem::from_product(&product, 2)],
            fixtures::address(),
            PaymentMethod::Vnpay,
            BigDecimal::from(3),
        );
        assert_eq!(order.subtotal, BigDecimal::from(20));
        assert_eq!(order.total_amount, BigDecimal::from(23));
        assert!(order.totals_consistent());
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_status, OrderStatus::Pending);
    }

    #[test]
    fn order_number_has_expected_shape() {
        let number = generate_order_number(Utc::now());
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "ORD");
        assert_eq!(parts[1].len(), 8);
        assert_eq!(parts[2].len(), 8);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn order_status_only_moves_forward() {
        assert!(OrderStatus::Pending.can_advance_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_advance_to(OrderStatus::Shipping));
        assert!(!OrderStatus::Shipping.can_advance_to(OrderStatus::Confirmed));
        assert!(!OrderStatus::Cancelled.can_advance_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Pending.can_advance_to(OrderStatus::Cancelled));
        assert_eq!(OrderStatus::Delivered.next(), None);
    }

    #[test]
    fn only_early_orders_are_cancellable() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Confirmed.is_cancellable());
        assert!(!OrderStatus::Shipping.is_cancellable());
        assert!(!OrderStatus::Delivered.is_cancellable());
    }

    #[test]
    fn text_enums_round_trip_through_strings() {
        assert_eq!(
            PaymentMethod::from_str("bank_transfer").unwrap(),
            PaymentMethod::BankTransfer
        );
        assert_eq!(PaymentStatus::from_str("PAID").unwrap(), PaymentStatus::Paid);
        assert!(OrderStatus::from_str("lost").is_err());
        assert_eq!(PaymentMethod::Cod.gateway(), None);
        assert_eq!(PaymentMethod::Momo.gateway(), Some(Gateway::Momo));
    }

    #[test]
    fn missing_address_field_is_reported() {
        let mut address = fixtures::address();
        address.phone = "  ".to_string();
        assert_eq!(address.missing_field(), Some("phone"));
    }
}
