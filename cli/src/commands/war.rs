use clap::Subcommand;

use crate::util::{api_request, exit_error, read_json_from_file};

#[derive(Subcommand)]
pub enum WarCommands {
    /// Kill activity over a recent window
    Summary {
        #[arg(long)]
        region_id: Option<i64>,
        /// Look-back window in hours (default 24)
        #[arg(long)]
        hours: Option<i64>,
        /// Entries per top list (default 10)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ingest killmails from a JSON file ({"killmails": [...]}, "-" for stdin)
    Import {
        #[arg(long)]
        file: String,
    },
}

pub async fn run(api_url: &str, token: Option<&str>, command: WarCommands) -> i32 {
    match command {
        WarCommands::Summary {
            region_id,
            hours,
            limit,
        } => {
            let mut query = Vec::new();
            if let Some(r) = region_id {
                query.push(("region_id".to_string(), r.to_string()));
            }
            if let Some(h) = hours {
                query.push(("hours".to_string(), h.to_string()));
            }
            if let Some(l) = limit {
                query.push(("limit".to_string(), l.to_string()));
            }
            api_request(
                api_url,
                reqwest::Method::GET,
                "/api/war/summary",
                token,
                None,
                &query,
            )
            .await
        }
        WarCommands::Import { file } => {
            let body = read_json_from_file(&file).unwrap_or_else(|e| exit_error(&e, None));
            api_request(
                api_url,
                reqwest::Method::POST,
                "/api/war/killmails",
                token,
                Some(body),
                &[],
            )
            .await
        }
    }
}
