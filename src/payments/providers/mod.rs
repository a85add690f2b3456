pub mod momo;
pub mod paypal;
pub mod vnpay;

pub use momo::{MomoAdapter, MomoConfig};
pub use paypal::{PaypalAdapter, PaypalConfig};
pub use vnpay::{VnpayAdapter, VnpayConfig};
