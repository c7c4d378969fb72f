pub mod discovery;
pub mod key;
pub mod preview;
pub mod reconcile;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;
