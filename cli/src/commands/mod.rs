pub mod agent;
pub mod health;
pub mod market;
pub mod production;
pub mod shopping;
pub mod war;
