pub mod admin;
pub mod checkout;
pub mod lifecycle;
pub mod reconciler;
pub mod sweeper;
