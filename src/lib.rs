pub mod adapters;
pub mod app;
pub mod domain;
pub mod monitor;

#[cfg(test)]
mod test_support;
