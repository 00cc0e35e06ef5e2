//! Diff aggregation over stored Results.
//!
//! Two Results are the same match when they share spec, file and raw
//! coordinates. Grouping by that key yields, per group, whether each tool
//! reported it; summing the presence flags per Spec gives the agreement
//! counts. No reconciliation happens here.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use stbench_core::SpecData;

use crate::store::{Spec, Tool};

/// Agreement of two tools on one Spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QDiff {
    pub spec: Spec,
    pub left_only: i64,
    pub both: i64,
    pub right_only: i64,
}

impl QDiff {
    pub fn left_total(&self) -> i64 {
        self.left_only + self.both
    }

    pub fn right_total(&self) -> i64 {
        self.right_only + self.both
    }

    pub fn is_empty(&self) -> bool {
        self.left_only + self.both + self.right_only == 0
    }
}

/// Per-Spec counts for every Spec carrying queries for both tools, in Spec
/// id order. Specs without any Result report zeros.
pub async fn qdiff(pool: &SqlitePool, left: &Tool, right: &Tool) -> Result<Vec<QDiff>> {
    let rows = sqlx::query(
        r#"
        WITH grouped AS (
            SELECT run.spec_id AS spec_id,
                   MAX(run.tool_id = ?1) AS lhs,
                   MAX(run.tool_id = ?2) AS rhs
            FROM result
            JOIN run ON run.id = result.run_id
            GROUP BY run.spec_id, run.file_id, result.sr, result.sc, result.er, result.ec
        )
        SELECT spec.id AS id,
               spec.data AS data,
               COALESCE(SUM(grouped.lhs AND NOT grouped.rhs), 0) AS left_only,
               COALESCE(SUM(grouped.lhs AND grouped.rhs), 0) AS both_tools,
               COALESCE(SUM(NOT grouped.lhs AND grouped.rhs), 0) AS right_only
        FROM spec
        LEFT JOIN grouped ON grouped.spec_id = spec.id
        WHERE json_extract(spec.data, '$.' || ?3) IS NOT NULL
          AND json_extract(spec.data, '$.' || ?4) IS NOT NULL
        GROUP BY spec.id
        ORDER BY spec.id
        "#,
    )
    .bind(left.id)
    .bind(right.id)
    .bind(&left.name)
    .bind(&right.name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("qdiff {} vs {}", left.name, right.name))?;

    rows.into_iter()
        .map(|row| {
            Ok(QDiff {
                spec: spec_from_row(&row)?,
                left_only: row.get("left_only"),
                both: row.get("both_tools"),
                right_only: row.get("right_only"),
            })
        })
        .collect()
}

/// Distinct matches of `tool` for every Spec carrying a query for it, in
/// Spec id order.
pub async fn qtotals(pool: &SqlitePool, tool: &Tool) -> Result<Vec<(Spec, i64)>> {
    let rows = sqlx::query(
        r#"
        WITH grouped AS (
            SELECT DISTINCT run.spec_id AS spec_id, run.file_id,
                   result.sr, result.sc, result.er, result.ec
            FROM result
            JOIN run ON run.id = result.run_id
            WHERE run.tool_id = ?1
        )
        SELECT spec.id AS id,
               spec.data AS data,
               COUNT(grouped.spec_id) AS total
        FROM spec
        LEFT JOIN grouped ON grouped.spec_id = spec.id
        WHERE json_extract(spec.data, '$.' || ?2) IS NOT NULL
        GROUP BY spec.id
        ORDER BY spec.id
        "#,
    )
    .bind(tool.id)
    .bind(&tool.name)
    .fetch_all(pool)
    .await
    .with_context(|| format!("qtotals {}", tool.name))?;

    rows.into_iter()
        .map(|row| Ok((spec_from_row(&row)?, row.get("total"))))
        .collect()
}

fn spec_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Spec> {
    let id: i64 = row.get("id");
    let data: String = row.get("data");
    let data = SpecData::from_json(&data).with_context(|| format!("Malformed spec {}", id))?;
    Ok(Spec { id, data })
}
