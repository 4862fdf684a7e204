use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use eve_copilot_core::error::ApiError;
use eve_copilot_core::production::{BlueprintMaterial, MaterialRequirement, material_requirements};

use crate::error::AppError;
use crate::extract::AppQuery;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/production/{type_id}/materials", get(get_materials))
}

#[derive(sqlx::FromRow)]
struct ProductRow {
    type_id: i64,
    name: String,
    produced_quantity: i64,
}

#[derive(sqlx::FromRow)]
struct MaterialRow {
    material_type_id: i64,
    name: String,
    quantity: i64,
}

pub(crate) struct Blueprint {
    pub product_type_id: i64,
    pub product_name: String,
    pub produced_quantity: i64,
    pub materials: Vec<BlueprintMaterial>,
}

/// Blueprint of a manufacturable type, or `None` when nothing produces it.
pub(crate) async fn load_blueprint(
    conn: &mut sqlx::PgConnection,
    type_id: i64,
) -> Result<Option<Blueprint>, sqlx::Error> {
    let product = sqlx::query_as::<_, ProductRow>(
        r#"
        SELECT t.type_id, t.name, bp.produced_quantity
        FROM blueprint_products bp
        JOIN item_types t ON t.type_id = bp.product_type_id
        WHERE bp.product_type_id = $1
        "#,
    )
    .bind(type_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(product) = product else {
        return Ok(None);
    };

    let materials = sqlx::query_as::<_, MaterialRow>(
        r#"
        SELECT m.material_type_id, t.name, m.quantity
        FROM blueprint_materials m
        JOIN item_types t ON t.type_id = m.material_type_id
        WHERE m.product_type_id = $1
        ORDER BY m.material_type_id
        "#,
    )
    .bind(type_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Blueprint {
        product_type_id: product.type_id,
        product_name: product.name,
        produced_quantity: product.produced_quantity,
        materials: materials
            .into_iter()
            .map(|m| BlueprintMaterial {
                type_id: m.material_type_id,
                type_name: m.name,
                quantity: m.quantity,
            })
            .collect(),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct JobParams {
    /// Number of manufacturing runs (default 1)
    #[serde(default = "default_runs")]
    pub runs: i64,
    /// Blueprint material efficiency, 0-10 (default 0)
    #[serde(default)]
    pub me: i32,
}

fn default_runs() -> i64 {
    1
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MaterialsResponse {
    pub product_type_id: i64,
    pub product_name: String,
    pub runs: i64,
    pub me: i32,
    /// Units produced by all runs
    pub output_quantity: i64,
    pub materials: Vec<MaterialRequirement>,
}

/// Materials needed to manufacture an item
///
/// Applies the blueprint's material efficiency and never drops below one
/// unit per run.
#[utoipa::path(
    get,
    path = "/api/production/{type_id}/materials",
    params(("type_id" = i64, Path, description = "Product type id"), JobParams),
    responses(
        (status = 200, description = "Material bill", body = MaterialsResponse),
        (status = 400, description = "Invalid runs or ME", body = ApiError),
        (status = 404, description = "Type is not manufacturable", body = ApiError)
    ),
    tag = "production"
)]
pub async fn get_materials(
    State(state): State<AppState>,
    Path(type_id): Path<i64>,
    AppQuery(params): AppQuery<JobParams>,
) -> Result<Json<MaterialsResponse>, AppError> {
    let mut conn = state.db.acquire().await?;
    let blueprint = load_blueprint(&mut conn, type_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("blueprint for type {type_id}")))?;

    let materials = material_requirements(&blueprint.materials, params.runs, params.me)?;

    Ok(Json(MaterialsResponse {
        product_type_id: blueprint.product_type_id,
        product_name: blueprint.product_name,
        runs: params.runs,
        me: params.me,
        output_quantity: blueprint.produced_quantity * params.runs,
        materials,
    }))
}
