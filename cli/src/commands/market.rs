use clap::Subcommand;

use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Subcommand)]
pub enum MarketCommands {
    /// Stored prices for an item
    Prices {
        type_id: i64,
        /// Only this region (e.g. 10000002 for The Forge)
        #[arg(long)]
        region_id: Option<i64>,
    },
    /// Compare an item across trade hubs
    Compare { type_id: i64 },
    /// Fetch fresh orders from ESI for every trade hub
    Refresh { type_id: i64 },
    /// Bulk upsert prices from a JSON file ({"prices": [...]}, "-" for stdin)
    Import {
        #[arg(long)]
        file: String,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: MarketCommands) -> i32 {
    match command {
        MarketCommands::Prices { type_id, region_id } => {
            let query: Vec<(String, String)> = region_id
                .map(|r| ("region_id".to_string(), r.to_string()))
                .into_iter()
                .collect();
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/api/market/prices/{type_id}"),
                token,
                None,
                &query,
            )
            .await
        }
        MarketCommands::Compare { type_id } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/api/market/compare/{type_id}"),
                token,
                None,
                &[],
            )
            .await
        }
        MarketCommands::Refresh { type_id } => {
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/api/market/refresh/{type_id}"),
                token,
                None,
                &[],
            )
            .await
        }
        MarketCommands::Import { file } => {
            let body = read_json_from_file(&file).unwrap_or_else(|e| exit_error(&e, None));
            api_request(
                api_url,
                reqwest::Method::POST,
                "/api/market/prices",
                token,
                Some(body),
                &[],
            )
            .await
        }
    }
}
