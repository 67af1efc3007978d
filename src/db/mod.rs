mod connection;
mod helpers;
mod migrations;
mod persistence;
mod repositories;

#[cfg(test)]
mod tests;

pub use connection::Database;
