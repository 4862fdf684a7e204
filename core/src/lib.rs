pub mod agent;
pub mod error;
pub mod market;
pub mod production;
pub mod shopping;
pub mod stream;
pub mod war;
