//! Reusable hypercomplex layers.
pub mod conv_norm;
pub mod init;
pub mod phconv;
