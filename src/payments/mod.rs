//! Gateway signing, amount conversion and callback parsing

pub mod amount;
pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;

pub use amount::AmountCodec;
pub use error::{PaymentError, PaymentResult};
pub use factory::GatewayRegistry;
pub use provider::{GatewayAdapter, IpnDisposition, IpnResponse};
pub use types::{CallbackParams, Gateway, PaymentOutcome, ProcessingPolicy, RedirectContext};
