//! Complete model families.
pub mod phc_resnet;
