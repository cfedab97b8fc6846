use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::{DailyAggregate, VisitorDayRecord};
use crate::tracking::engine::{clamp_page_size, clamp_trend_days};

use super::{ApiError, ApiResult, AppState};

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Serialize)]
pub struct VisitListResponse {
    pub success: bool,
    pub data: Vec<VisitorDayRecord>,
    pub total: i64,
    pub next_cursor: Option<String>,
}

#[derive(Deserialize)]
pub struct TrendQuery {
    #[serde(default)]
    pub days: Option<i64>,
}

#[derive(Serialize)]
pub struct TrendResponse {
    pub success: bool,
    pub data: Vec<DailyAggregate>,
}

#[derive(Serialize)]
pub struct DailyResponse {
    pub success: bool,
    pub data: DailyAggregate,
}

fn validate_date(date: &str) -> ApiResult<()> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{}', expected YYYY-MM-DD", date)))
}

/// List visitor-day records, newest first
pub async fn list_visits(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<VisitListResponse>> {
    let date = query.date.as_deref().filter(|d| !d.is_empty());
    if let Some(date) = date {
        validate_date(date)?;
    }

    let after = match query.cursor.as_deref().filter(|c| !c.is_empty()) {
        Some(cursor) => Some(
            state
                .cursor
                .verify(cursor)
                .map_err(|_| ApiError::BadRequest("Invalid cursor".to_string()))?,
        ),
        None => None,
    };

    let page = state
        .engine
        .visits(date, after, clamp_page_size(query.limit))
        .await?;

    let next_cursor = page
        .next
        .map(|position| state.cursor.sign(position))
        .transpose()?;

    Ok(Json(VisitListResponse {
        success: true,
        data: page.records,
        total: page.total,
        next_cursor,
    }))
}

pub async fn trend(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendQuery>,
) -> ApiResult<Json<TrendResponse>> {
    let days = clamp_trend_days(query.days);
    let data = state.engine.trend(days, chrono::Utc::now()).await?;

    Ok(Json(TrendResponse {
        success: true,
        data,
    }))
}

pub async fn daily(
    State(state): State<Arc<AppState>>,
    Path(date): Path<String>,
) -> ApiResult<Json<DailyResponse>> {
    validate_date(&date)?;
    let data = state.engine.daily(&date).await?;

    Ok(Json(DailyResponse {
        success: true,
        data,
    }))
}
