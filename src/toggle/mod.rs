pub mod asyncutil;
pub mod build_info;
pub mod cli;
pub mod config;
pub mod engine;
pub mod profile;
pub mod routes;
pub mod rules;
pub mod service;
pub mod telemetry;
pub mod toggler;

pub async fn main() -> anyhow::Result<()> {
    cli::run().await
}
