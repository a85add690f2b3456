pub mod model;

pub use model::{
    Order, OrderItem, OrderStatus, PaymentInfo, PaymentMethod, PaymentStatus, Product,
    ShippingAddress,
};
