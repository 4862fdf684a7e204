use clap::Subcommand;

use crate::util::api_request;

#[derive(Subcommand)]
pub enum ProductionCommands {
    /// Material bill for manufacturing an item
    Materials {
        /// Product type id (e.g. 587 for a Rifter)
        type_id: i64,
        /// Number of runs
        #[arg(long, default_value_t = 1)]
        runs: i64,
        /// Blueprint material efficiency, 0-10
        #[arg(long, default_value_t = 0)]
        me: i32,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: ProductionCommands) -> i32 {
    match command {
        ProductionCommands::Materials { type_id, runs, me } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/api/production/{type_id}/materials"),
                token,
                None,
                &[
                    ("runs".to_string(), runs.to_string()),
                    ("me".to_string(), me.to_string()),
                ],
            )
            .await
        }
    }
}
