pub mod bitmap;
pub mod config;
pub mod driver;
pub mod encoder;

#[cfg(test)]
mod testing;
