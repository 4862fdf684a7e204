use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum ShoppingCommands {
    /// List all shopping lists
    Lists,
    /// Create a shopping list
    Create {
        #[arg(long)]
        name: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        character_id: Option<i64>,
    },
    /// Show a list with items and cost
    Show {
        list_id: Uuid,
        /// Price the list in this region (default The Forge)
        #[arg(long)]
        region_id: Option<i64>,
    },
    /// Rename a list or change its notes
    Update {
        list_id: Uuid,
        #[arg(long)]
        name: Option<String>,
        /// Empty string clears the notes
        #[arg(long)]
        notes: Option<String>,
    },
    /// Delete a list and its items
    Delete { list_id: Uuid },
    /// Add an item (merges into an open item of the same type)
    Add {
        list_id: Uuid,
        #[arg(long)]
        type_id: i64,
        #[arg(long)]
        quantity: i64,
        /// Needed when the type is not in the reference data
        #[arg(long)]
        type_name: Option<String>,
        #[arg(long)]
        target_price: Option<f64>,
    },
    /// Change an item
    UpdateItem {
        item_id: Uuid,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        target_price: Option<f64>,
        /// Mark as purchased
        #[arg(long, conflicts_with = "unpurchased")]
        purchased: bool,
        /// Mark as not purchased
        #[arg(long)]
        unpurchased: bool,
    },
    /// Remove an item
    RemoveItem { item_id: Uuid },
    /// Add the materials of a manufacturing job
    AddProduction {
        list_id: Uuid,
        /// Product type id
        #[arg(long)]
        type_id: i64,
        #[arg(long, default_value_t = 1)]
        runs: i64,
        #[arg(long, default_value_t = 0)]
        me: i32,
    },
    /// Compare the open items across trade hubs
    Compare { list_id: Uuid },
}

pub async fn run(api_url: &str, token: Option<&str>, command: ShoppingCommands) -> i32 {
    match command {
        ShoppingCommands::Lists => get(api_url, token, "/api/shopping/lists", &[]).await,
        ShoppingCommands::Create {
            name,
            notes,
            character_id,
        } => {
            let body = json!({
                "name": name,
                "notes": notes,
                "character_id": character_id,
            });
            send(api_url, token, reqwest::Method::POST, "/api/shopping/lists", body).await
        }
        ShoppingCommands::Show { list_id, region_id } => {
            let query: Vec<(String, String)> = region_id
                .map(|r| ("region_id".to_string(), r.to_string()))
                .into_iter()
                .collect();
            get(api_url, token, &format!("/api/shopping/lists/{list_id}"), &query).await
        }
        ShoppingCommands::Update {
            list_id,
            name,
            notes,
        } => {
            if name.is_none() && notes.is_none() {
                exit_error("Nothing to update", Some("Pass --name and/or --notes"));
            }
            send(
                api_url,
                token,
                reqwest::Method::PATCH,
                &format!("/api/shopping/lists/{list_id}"),
                json!({"name": name, "notes": notes}),
            )
            .await
        }
        ShoppingCommands::Delete { list_id } => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                &format!("/api/shopping/lists/{list_id}"),
                token,
                None,
                &[],
            )
            .await
        }
        ShoppingCommands::Add {
            list_id,
            type_id,
            quantity,
            type_name,
            target_price,
        } => {
            let body = json!({
                "type_id": type_id,
                "quantity": quantity,
                "type_name": type_name,
                "target_price": target_price,
            });
            send(
                api_url,
                token,
                reqwest::Method::POST,
                &format!("/api/shopping/lists/{list_id}/items"),
                body,
            )
            .await
        }
        ShoppingCommands::UpdateItem {
            item_id,
            quantity,
            target_price,
            purchased,
            unpurchased,
        } => {
            let is_purchased = match (purchased, unpurchased) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            if quantity.is_none() && target_price.is_none() && is_purchased.is_none() {
                exit_error(
                    "Nothing to update",
                    Some("Pass --quantity, --target-price, --purchased or --unpurchased"),
                );
            }
            let body = json!({
                "quantity": quantity,
                "target_price": target_price,
                "is_purchased": is_purchased,
            });
            send(
                api_url,
                token,
                reqwest::Method::PATCH,
                &format!("/api/shopping/items/{item_id}"),
                body,
            )
            .await
        }
        ShoppingCommands::RemoveItem { item_id } => {
            api_request(
                api_url,
                reqwest::Method::DELETE,
                &format!("/api/shopping/items/{item_id}"),
                token,
                None,
                &[],
            )
            .await
        }
        ShoppingCommands::AddProduction {
            list_id,
            type_id,
            runs,
            me,
        } => {
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/api/shopping/lists/{list_id}/add-production/{type_id}"),
                token,
                None,
                &[
                    ("runs".to_string(), runs.to_string()),
                    ("me".to_string(), me.to_string()),
                ],
            )
            .await
        }
        ShoppingCommands::Compare { list_id } => {
            get(
                api_url,
                token,
                &format!("/api/shopping/lists/{list_id}/compare"),
                &[],
            )
            .await
        }
    }
}

async fn get(api_url: &str, token: Option<&str>, path: &str, query: &[(String, String)]) -> i32 {
    api_request(api_url, reqwest::Method::GET, path, token, None, query).await
}

async fn send(
    api_url: &str,
    token: Option<&str>,
    method: reqwest::Method,
    path: &str,
    body: serde_json::Value,
) -> i32 {
    api_request(api_url, method, path, token, Some(body), &[]).await
}
