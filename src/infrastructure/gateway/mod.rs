pub mod mock;
pub mod paypro;
pub mod verifier;
