use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use eve_copilot_core::error::ApiError;
use eve_copilot_core::market::JITA;
use eve_copilot_core::production::material_requirements;
use eve_copilot_core::shopping::{
    ItemAddition, ListComparison, ListCost, MAX_ITEM_QUANTITY, MergeAction, SOURCE_MANUAL,
    ShoppingItem,
    ShoppingList, compare_list, list_cost, plan_merge, production_source,
};

use crate::error::AppError;
use crate::extract::{AppJson, AppQuery};
use crate::routes::market::load_prices;
use crate::routes::production::{JobParams, load_blueprint};
use crate::state::AppState;

const MAX_NAME_LEN: usize = 200;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/shopping/lists", get(list_lists).post(create_list))
        .route(
            "/api/shopping/lists/{id}",
            get(get_list).patch(update_list).delete(delete_list),
        )
        .route("/api/shopping/lists/{id}/items", post(add_item))
        .route(
            "/api/shopping/lists/{id}/add-production/{type_id}",
            post(add_production),
        )
        .route("/api/shopping/lists/{id}/compare", get(compare))
        .route(
            "/api/shopping/items/{item_id}",
            patch(update_item).delete(delete_item),
        )
}

// --- Row types ---

#[derive(sqlx::FromRow)]
struct ListRow {
    id: Uuid,
    name: String,
    character_id: Option<i64>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ListRow> for ShoppingList {
    fn from(r: ListRow) -> Self {
        ShoppingList {
            id: r.id,
            name: r.name,
            character_id: r.character_id,
            notes: r.notes,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ListSummaryRow {
    #[sqlx(flatten)]
    list: ListRow,
    item_count: i64,
    open_item_count: i64,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: Uuid,
    list_id: Uuid,
    type_id: i64,
    type_name: String,
    quantity: i64,
    is_purchased: bool,
    target_price: Option<f64>,
    source: String,
    created_at: DateTime<Utc>,
}

impl From<ItemRow> for ShoppingItem {
    fn from(r: ItemRow) -> Self {
        ShoppingItem {
            id: r.id,
            list_id: r.list_id,
            type_id: r.type_id,
            type_name: r.type_name,
            quantity: r.quantity,
            is_purchased: r.is_purchased,
            target_price: r.target_price,
            source: r.source,
            created_at: r.created_at,
        }
    }
}

const ITEM_COLUMNS: &str =
    "id, list_id, type_id, type_name, quantity, is_purchased, target_price, source, created_at";

async fn fetch_list(
    conn: &mut sqlx::PgConnection,
    list_id: Uuid,
    for_update: bool,
) -> Result<ShoppingList, AppError> {
    let sql = if for_update {
        "SELECT id, name, character_id, notes, created_at, updated_at \
         FROM shopping_lists WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, name, character_id, notes, created_at, updated_at \
         FROM shopping_lists WHERE id = $1"
    };
    sqlx::query_as::<_, ListRow>(sql)
        .bind(list_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(ShoppingList::from)
        .ok_or_else(|| AppError::not_found(format!("shopping list {list_id}")))
}

async fn fetch_items(
    conn: &mut sqlx::PgConnection,
    list_id: Uuid,
) -> Result<Vec<ShoppingItem>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM shopping_list_items \
         WHERE list_id = $1 ORDER BY is_purchased, type_name, created_at"
    ))
    .bind(list_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(ShoppingItem::from).collect())
}

/// Merge additions into a list inside the caller's transaction.
/// The list row must already be locked so concurrent merges serialize.
async fn apply_additions(
    conn: &mut sqlx::PgConnection,
    list_id: Uuid,
    additions: &[ItemAddition],
    source: &str,
    target_price: Option<f64>,
) -> Result<Vec<ShoppingItem>, AppError> {
    let existing = fetch_items(conn, list_id).await?;
    let mut touched = Vec::new();

    for action in plan_merge(&existing, additions)? {
        let row = match action {
            MergeAction::Increase { item_id, quantity } => {
                sqlx::query_as::<_, ItemRow>(&format!(
                    "UPDATE shopping_list_items \
                     SET quantity = $2, target_price = COALESCE($3, target_price) \
                     WHERE id = $1 RETURNING {ITEM_COLUMNS}"
                ))
                .bind(item_id)
                .bind(quantity)
                .bind(target_price)
                .fetch_one(&mut *conn)
                .await?
            }
            MergeAction::Insert(add) => {
                sqlx::query_as::<_, ItemRow>(&format!(
                    "INSERT INTO shopping_list_items \
                     (id, list_id, type_id, type_name, quantity, target_price, source) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {ITEM_COLUMNS}"
                ))
                .bind(Uuid::now_v7())
                .bind(list_id)
                .bind(add.type_id)
                .bind(&add.type_name)
                .bind(add.quantity)
                .bind(target_price)
                .bind(source)
                .fetch_one(&mut *conn)
                .await?
            }
        };
        touched.push(ShoppingItem::from(row));
    }

    touch_list(conn, list_id).await?;
    Ok(touched)
}

async fn touch_list(conn: &mut sqlx::PgConnection, list_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE shopping_lists SET updated_at = now() WHERE id = $1")
        .bind(list_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation("name", "name must not be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(AppError::validation(
            "name",
            format!("name must be at most {MAX_NAME_LEN} characters"),
        ));
    }
    Ok(trimmed.to_string())
}

fn validate_quantity(quantity: i64) -> Result<(), AppError> {
    if !(1..=MAX_ITEM_QUANTITY).contains(&quantity) {
        return Err(AppError::Validation {
            message: format!("quantity must be between 1 and {MAX_ITEM_QUANTITY}"),
            field: Some("quantity".to_string()),
            received: Some(serde_json::json!(quantity)),
            docs_hint: None,
        });
    }
    Ok(())
}

fn validate_target_price(price: Option<f64>) -> Result<(), AppError> {
    match price {
        Some(p) if !p.is_finite() || p < 0.0 => Err(AppError::validation(
            "target_price",
            "target_price must be a non-negative number",
        )),
        _ => Ok(()),
    }
}

// --- Lists ---

#[derive(Debug, Serialize, ToSchema)]
pub struct ShoppingListSummary {
    #[serde(flatten)]
    pub list: ShoppingList,
    pub item_count: i64,
    pub open_item_count: i64,
}

/// All shopping lists, most recently changed first
#[utoipa::path(
    get,
    path = "/api/shopping/lists",
    responses(
        (status = 200, description = "Shopping lists", body = Vec<ShoppingListSummary>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn list_lists(
    State(state): State<AppState>,
) -> Result<Json<Vec<ShoppingListSummary>>, AppError> {
    let rows = sqlx::query_as::<_, ListSummaryRow>(
        r#"
        SELECT l.id, l.name, l.character_id, l.notes, l.created_at, l.updated_at,
               COUNT(i.id) AS item_count,
               COUNT(i.id) FILTER (WHERE NOT i.is_purchased) AS open_item_count
        FROM shopping_lists l
        LEFT JOIN shopping_list_items i ON i.list_id = l.id
        GROUP BY l.id
        ORDER BY l.updated_at DESC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|r| ShoppingListSummary {
                list: r.list.into(),
                item_count: r.item_count,
                open_item_count: r.open_item_count,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateListRequest {
    pub name: String,
    #[serde(default)]
    pub character_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Create a shopping list
#[utoipa::path(
    post,
    path = "/api/shopping/lists",
    request_body = CreateListRequest,
    responses(
        (status = 201, description = "List created", body = ShoppingList),
        (status = 400, description = "Validation error", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn create_list(
    State(state): State<AppState>,
    AppJson(req): AppJson<CreateListRequest>,
) -> Result<impl IntoResponse, AppError> {
    let name = validate_name(&req.name)?;

    let row = sqlx::query_as::<_, ListRow>(
        r#"
        INSERT INTO shopping_lists (id, name, character_id, notes)
        VALUES ($1, $2, $3, $4)
        RETURNING id, name, character_id, notes, created_at, updated_at
        "#,
    )
    .bind(Uuid::now_v7())
    .bind(&name)
    .bind(req.character_id)
    .bind(&req.notes)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(list_id = %row.id, "shopping list created");
    Ok((StatusCode::CREATED, Json(ShoppingList::from(row))))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RegionParams {
    /// Region to price the list in (default The Forge / Jita)
    #[serde(default)]
    pub region_id: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ShoppingListDetail {
    #[serde(flatten)]
    pub list: ShoppingList,
    pub items: Vec<ShoppingItem>,
    pub cost: ListCost,
}

/// A shopping list with its items and cost in one region
#[utoipa::path(
    get,
    path = "/api/shopping/lists/{id}",
    params(("id" = Uuid, Path, description = "List id"), RegionParams),
    responses(
        (status = 200, description = "List with items", body = ShoppingListDetail),
        (status = 404, description = "List not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn get_list(
    State(state): State<AppState>,
    Path(list_id): Path<Uuid>,
    AppQuery(params): AppQuery<RegionParams>,
) -> Result<Json<ShoppingListDetail>, AppError> {
    let mut conn = state.db.acquire().await?;
    let list = fetch_list(&mut conn, list_id, false).await?;
    let items = fetch_items(&mut conn, list_id).await?;

    let type_ids: Vec<i64> = items.iter().map(|i| i.type_id).collect();
    let prices = load_prices(&mut *conn, &type_ids).await?;
    let cost = list_cost(&items, &prices, params.region_id.unwrap_or(JITA.region_id));

    Ok(Json(ShoppingListDetail { list, items, cost }))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateListRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// Empty string clears the notes
    #[serde(default)]
    pub notes: Option<String>,
}

/// Rename a list or change its notes
#[utoipa::path(
    patch,
    path = "/api/shopping/lists/{id}",
    params(("id" = Uuid, Path, description = "List id")),
    request_body = UpdateListRequest,
    responses(
        (status = 200, description = "Updated list", body = ShoppingList),
        (status = 404, description = "List not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn update_list(
    State(state): State<AppState>,
    Path(list_id): Path<Uuid>,
    AppJson(req): AppJson<UpdateListRequest>,
) -> Result<Json<ShoppingList>, AppError> {
    let name = req.name.as_deref().map(validate_name).transpose()?;
    let clear_notes = req.notes.as_deref().is_some_and(|n| n.trim().is_empty());

    let row = sqlx::query_as::<_, ListRow>(
        r#"
        UPDATE shopping_lists
        SET name = COALESCE($2, name),
            notes = CASE WHEN $4 THEN NULL ELSE COALESCE($3, notes) END,
            updated_at = now()
        WHERE id = $1
        RETURNING id, name, character_id, notes, created_at, updated_at
        "#,
    )
    .bind(list_id)
    .bind(name)
    .bind(req.notes.as_deref())
    .bind(clear_notes)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::not_found(format!("shopping list {list_id}")))?;

    Ok(Json(row.into()))
}

/// Delete a list and all of its items
#[utoipa::path(
    delete,
    path = "/api/shopping/lists/{id}",
    params(("id" = Uuid, Path, description = "List id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "List not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn delete_list(
    State(state): State<AppState>,
    Path(list_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let result = sqlx::query("DELETE FROM shopping_lists WHERE id = $1")
        .bind(list_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::not_found(format!("shopping list {list_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// --- Items ---

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddItemRequest {
    pub type_id: i64,
    /// Looked up from item types when omitted
    #[serde(default)]
    pub type_name: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub target_price: Option<f64>,
}

async fn resolve_type_name(
    conn: &mut sqlx::PgConnection,
    type_id: i64,
    given: Option<String>,
) -> Result<String, AppError> {
    if let Some(name) = given.filter(|n| !n.trim().is_empty()) {
        return Ok(name.trim().to_string());
    }
    sqlx::query_scalar::<_, String>("SELECT name FROM item_types WHERE type_id = $1")
        .bind(type_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::Validation {
            message: format!("Unknown type_id {type_id}; pass type_name explicitly"),
            field: Some("type_id".to_string()),
            received: Some(serde_json::json!(type_id)),
            docs_hint: None,
        })
}

/// Add an item to a list
///
/// If the list already has an unpurchased item of the same type, its
/// quantity is increased instead of adding a second row.
#[utoipa::path(
    post,
    path = "/api/shopping/lists/{id}/items",
    params(("id" = Uuid, Path, description = "List id")),
    request_body = AddItemRequest,
    responses(
        (status = 201, description = "Item added or merged", body = ShoppingItem),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "List not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn add_item(
    State(state): State<AppState>,
    Path(list_id): Path<Uuid>,
    AppJson(req): AppJson<AddItemRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_quantity(req.quantity)?;
    validate_target_price(req.target_price)?;

    let mut tx = state.db.begin().await?;
    fetch_list(&mut tx, list_id, true).await?;
    let type_name = resolve_type_name(&mut tx, req.type_id, req.type_name).await?;

    let addition = ItemAddition {
        type_id: req.type_id,
        type_name,
        quantity: req.quantity,
    };
    let mut touched =
        apply_additions(&mut tx, list_id, &[addition], SOURCE_MANUAL, req.target_price).await?;
    tx.commit().await?;

    let item = touched
        .pop()
        .ok_or_else(|| AppError::Internal("merge produced no item".to_string()))?;
    Ok((StatusCode::CREATED, Json(item)))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateItemRequest {
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub is_purchased: Option<bool>,
    #[serde(default)]
    pub target_price: Option<f64>,
}

/// Change quantity, purchase state or target price of an item
#[utoipa::path(
    patch,
    path = "/api/shopping/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Item id")),
    request_body = UpdateItemRequest,
    responses(
        (status = 200, description = "Updated item", body = ShoppingItem),
        (status = 404, description = "Item not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn update_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    AppJson(req): AppJson<UpdateItemRequest>,
) -> Result<Json<ShoppingItem>, AppError> {
    if let Some(q) = req.quantity {
        validate_quantity(q)?;
    }
    validate_target_price(req.target_price)?;

    let mut tx = state.db.begin().await?;
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "UPDATE shopping_list_items \
         SET quantity = COALESCE($2, quantity), \
             is_purchased = COALESCE($3, is_purchased), \
             target_price = COALESCE($4, target_price) \
         WHERE id = $1 RETURNING {ITEM_COLUMNS}"
    ))
    .bind(item_id)
    .bind(req.quantity)
    .bind(req.is_purchased)
    .bind(req.target_price)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found(format!("shopping item {item_id}")))?;

    touch_list(&mut tx, row.list_id).await?;
    tx.commit().await?;

    Ok(Json(row.into()))
}

/// Remove an item from its list
#[utoipa::path(
    delete,
    path = "/api/shopping/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Item id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Item not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn delete_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let mut tx = state.db.begin().await?;
    let list_id = sqlx::query_scalar::<_, Uuid>(
        "DELETE FROM shopping_list_items WHERE id = $1 RETURNING list_id",
    )
    .bind(item_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found(format!("shopping item {item_id}")))?;

    touch_list(&mut tx, list_id).await?;
    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Production & comparison ---

#[derive(Debug, Serialize, ToSchema)]
pub struct AddProductionResponse {
    pub list_id: Uuid,
    pub product_type_id: i64,
    pub product_name: String,
    pub runs: i64,
    pub me: i32,
    /// Items created or increased by this call
    pub items: Vec<ShoppingItem>,
}

/// Add the materials of a manufacturing job to a list
///
/// Material quantities are ME-adjusted for the requested runs and merged
/// into open items of the same type.
#[utoipa::path(
    post,
    path = "/api/shopping/lists/{id}/add-production/{type_id}",
    params(
        ("id" = Uuid, Path, description = "List id"),
        ("type_id" = i64, Path, description = "Product type id"),
        JobParams
    ),
    responses(
        (status = 200, description = "Materials merged", body = AddProductionResponse),
        (status = 400, description = "Invalid runs or ME", body = ApiError),
        (status = 404, description = "List not found or type not manufacturable", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn add_production(
    State(state): State<AppState>,
    Path((list_id, type_id)): Path<(Uuid, i64)>,
    AppQuery(params): AppQuery<JobParams>,
) -> Result<Json<AddProductionResponse>, AppError> {
    let mut tx = state.db.begin().await?;
    fetch_list(&mut tx, list_id, true).await?;

    let blueprint = load_blueprint(&mut tx, type_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("blueprint for type {type_id}")))?;
    let requirements = material_requirements(&blueprint.materials, params.runs, params.me)?;

    let additions: Vec<ItemAddition> = requirements
        .into_iter()
        .map(|m| ItemAddition {
            type_id: m.type_id,
            type_name: m.type_name,
            quantity: m.quantity,
        })
        .collect();

    let items = apply_additions(
        &mut tx,
        list_id,
        &additions,
        &production_source(type_id),
        None,
    )
    .await?;
    tx.commit().await?;

    tracing::info!(
        list_id = %list_id,
        product_type_id = type_id,
        runs = params.runs,
        me = params.me,
        items = items.len(),
        "production materials added to shopping list"
    );

    Ok(Json(AddProductionResponse {
        list_id,
        product_type_id: blueprint.product_type_id,
        product_name: blueprint.product_name,
        runs: params.runs,
        me: params.me,
        items,
    }))
}

/// Compare the cost of a list's open items across regions
#[utoipa::path(
    get,
    path = "/api/shopping/lists/{id}/compare",
    params(("id" = Uuid, Path, description = "List id")),
    responses(
        (status = 200, description = "Per-region totals and cheapest source per item", body = ListComparison),
        (status = 404, description = "List not found", body = ApiError)
    ),
    tag = "shopping"
)]
pub async fn compare(
    State(state): State<AppState>,
    Path(list_id): Path<Uuid>,
) -> Result<Json<ListComparison>, AppError> {
    let mut conn = state.db.acquire().await?;
    fetch_list(&mut conn, list_id, false).await?;
    let items = fetch_items(&mut conn, list_id).await?;

    let type_ids: Vec<i64> = items
        .iter()
        .filter(|i| !i.is_purchased)
        .map(|i| i.type_id)
        .collect();
    let prices = load_prices(&mut *conn, &type_ids).await?;

    Ok(Json(compare_list(&items, &prices)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[test]
    fn name_is_trimmed_and_bounded() {
        assert_eq!(validate_name("  Rifter fleet ").unwrap(), "Rifter fleet");
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"x".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn quantity_and_price_validation() {
        assert!(validate_quantity(1).is_ok());
        match validate_quantity(0) {
            Err(AppError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("quantity"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(validate_quantity(MAX_ITEM_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_ITEM_QUANTITY + 1).is_err());
        assert!(validate_target_price(None).is_ok());
        assert!(validate_target_price(Some(5.5)).is_ok());
        assert!(validate_target_price(Some(-0.01)).is_err());
        assert!(validate_target_price(Some(f64::INFINITY)).is_err());
    }

    async fn db_pool_if_available() -> Option<sqlx::PgPool> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .ok()
    }

    #[tokio::test]
    async fn repeated_additions_merge_into_one_open_row() {
        let Some(pool) = db_pool_if_available().await else {
            return;
        };

        sqlx::migrate!("../migrations")
            .run(&pool)
            .await
            .expect("migrations should run");

        let list_id = Uuid::now_v7();
        sqlx::query("INSERT INTO shopping_lists (id, name) VALUES ($1, 'merge test')")
            .bind(list_id)
            .execute(&pool)
            .await
            .expect("insert list");

        let add = |q| ItemAddition {
            type_id: 34,
            type_name: "Tritanium".to_string(),
            quantity: q,
        };

        let mut tx = pool.begin().await.expect("begin");
        apply_additions(&mut tx, list_id, &[add(100)], SOURCE_MANUAL, None)
            .await
            .expect("first add");
        let touched = apply_additions(&mut tx, list_id, &[add(50)], "production:587", None)
            .await
            .expect("second add");
        tx.commit().await.expect("commit");

        assert_eq!(touched.len(), 1);
        assert_eq!(touched[0].quantity, 150);

        let mut conn = pool.acquire().await.expect("acquire");
        let items = fetch_items(&mut conn, list_id).await.expect("items");
        assert_eq!(items.len(), 1);

        let mut tx = pool.begin().await.expect("begin");
        match apply_additions(&mut tx, list_id, &[add(MAX_ITEM_QUANTITY)], SOURCE_MANUAL, None).await
        {
            Err(AppError::Validation { field, .. }) => {
                assert_eq!(field.as_deref(), Some("quantity"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
        tx.rollback().await.expect("rollback");

        // check constraint surfaces as a 400, not a 500
        let err = sqlx::query("UPDATE shopping_list_items SET quantity = -1 WHERE list_id = $1")
            .bind(list_id)
            .execute(&pool)
            .await
            .expect_err("check constraint");
        let response = axum::response::IntoResponse::into_response(AppError::from(err));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        sqlx::query("DELETE FROM shopping_lists WHERE id = $1")
            .bind(list_id)
            .execute(&pool)
            .await
            .expect("cleanup");
    }
}
