pub mod backend;
pub mod config;
pub mod runner;
pub mod server;
pub mod smoke;
pub mod util;

#[cfg(test)]
mod test;
