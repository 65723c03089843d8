//! Data-source seam for the routing lookup.
//!
//! A lookup runs two dependent statements. Each may produce several result
//! sets (control-flow statements in a procedure yield empty ones), so both
//! are exposed as a list of [`ResultSet`]s and the caller picks the first
//! row of the first set that carries data.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, Utc};
use futures::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgRow, PgTypeInfo};
use sqlx::{Column, Either, Executor, Postgres, Row, Type, TypeInfo};
use thiserror::Error;
use tracing::debug;

use crate::db::DbPool;

/// One row of an untyped result; `None` is SQL `NULL`.
pub type RawRow = Vec<Option<String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub rows: Vec<RawRow>,
}

impl ResultSet {
    pub fn new(rows: Vec<RawRow>) -> Self {
        Self { rows }
    }
}

/// Returns the first row of the first non-empty result set.
pub fn first_data_row(sets: Vec<ResultSet>) -> Option<RawRow> {
    sets.into_iter()
        .find(|set| !set.rows.is_empty())
        .and_then(|set| set.rows.into_iter().next())
}

/// Summary resolved by the first lookup stage and fed into the second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSummary {
    pub uat_number: String,
    pub mail_class: Option<String>,
    pub mail_subclass: Option<String>,
    pub window_from: Option<String>,
    pub window_to: Option<String>,
}

impl CandidateSummary {
    /// Decodes `(uat, mail class, mail subclass, window from, window to)`.
    /// Returns `None` when the UAT number is missing or blank.
    pub fn from_row(row: &RawRow) -> Option<Self> {
        let cell = |index: usize| row.get(index).cloned().flatten();
        let uat_number = cell(0).filter(|value| !value.trim().is_empty())?;
        Some(Self {
            uat_number,
            mail_class: cell(1),
            mail_subclass: cell(2),
            window_from: cell(3),
            window_to: cell(4),
        })
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl SourceError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_))
    }
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => SourceError::Unavailable(err.to_string()),
            other => SourceError::Query(other.to_string()),
        }
    }
}

/// Something that can open a lookup session against the routing data.
#[async_trait]
pub trait RouteSource: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RouteSession + '_>, SourceError>;
}

/// A single lookup's hold on the data source. Dropping it releases the
/// underlying connection.
#[async_trait]
pub trait RouteSession: Send {
    async fn candidate_sets(&mut self, tracking_number: &str)
        -> Result<Vec<ResultSet>, SourceError>;

    async fn route_sets(
        &mut self,
        candidate: &CandidateSummary,
    ) -> Result<Vec<ResultSet>, SourceError>;
}

const CANDIDATE_SQL: &str = r#"
    WITH bounds AS (
        SELECT (now() - INTERVAL '30 days')::timestamp AS dt_from,
               (now() + INTERVAL '10 days')::timestamp AS dt_to
    ),
    candidate AS (
        SELECT a.recptcl_fid AS uat_number,
               f.mail_class_cd AS mail_class,
               a.mail_subclass_fcd AS mail_subclass
          FROM l_recptcls a
          JOIN l_recptcl_events b ON a.recptcl_pid = b.recptcl_pid AND b.event_type_cd = 101
          JOIN l_consgnts x ON a.evt_consgnt_pid = x.consgnt_pid
          JOIN l_consgnt_events c ON x.consgnt_pid = c.consgnt_pid AND c.event_type_cd = 301
          JOIN l_mailitms d ON d.evt_recptcl_pid = a.recptcl_pid
          JOIN c_mail_subclasses e ON e.mail_subclass_fcd = a.mail_subclass_fcd
          JOIN c_mail_classes f ON f.mail_class_cd = e.mail_class_cd
          LEFT JOIN l_routes g ON g.route_pid = x.route_pid
          LEFT JOIN l_legs h ON h.leg_pid = g.cn_leg_pid
          CROSS JOIN bounds
         WHERE substring(a.recptcl_fid FROM 1 FOR 2) = 'PT'
           AND substring(a.recptcl_fid FROM 7 FOR 2) <> 'PT'
           AND substring(a.recptcl_fid FROM 14 FOR 2) <> 'TT'
           AND c.event_gmt_dt BETWEEN bounds.dt_from AND bounds.dt_to
           AND d.mailitm_fid = $1
         ORDER BY g.route_departure_dt DESC NULLS LAST,
                  a.recptcl_fid DESC,
                  h.arrival_dt DESC NULLS LAST
         LIMIT 1
    )
    SELECT candidate.uat_number,
           candidate.mail_class,
           candidate.mail_subclass,
           to_char(bounds.dt_from, 'YYYY-MM-DD HH24:MI:SS') AS dt_from,
           to_char(bounds.dt_to, 'YYYY-MM-DD HH24:MI:SS') AS dt_to
      FROM bounds
      LEFT JOIN candidate ON TRUE
"#;

const ROUTE_SQL: &str = r#"
    SELECT *
      FROM dbo.ctt_sp_rel_controlo_transporte_int(
               $1::timestamp,
               $2::timestamp,
               $3,
               $4,
               $5
           )
"#;

/// Postgres-backed routing source.
#[derive(Clone)]
pub struct PgRouteSource {
    pool: DbPool,
}

impl PgRouteSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RouteSource for PgRouteSource {
    async fn open(&self) -> Result<Box<dyn RouteSession + '_>, SourceError> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgRouteSession { conn }))
    }
}

struct PgRouteSession {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl RouteSession for PgRouteSession {
    async fn candidate_sets(
        &mut self,
        tracking_number: &str,
    ) -> Result<Vec<ResultSet>, SourceError> {
        let query = sqlx::query(CANDIDATE_SQL).bind(tracking_number);
        let conn: &mut PgConnection = &mut self.conn;
        let stream = conn.fetch_many(query);
        Ok(collect_result_sets(stream).await?)
    }

    async fn route_sets(
        &mut self,
        candidate: &CandidateSummary,
    ) -> Result<Vec<ResultSet>, SourceError> {
        let query = sqlx::query(ROUTE_SQL)
            .bind(candidate.window_from.as_deref())
            .bind(candidate.window_to.as_deref())
            .bind(candidate.uat_number.as_str())
            .bind(candidate.mail_class.as_deref())
            .bind(candidate.mail_subclass.as_deref());
        let conn: &mut PgConnection = &mut self.conn;
        let stream = conn.fetch_many(query);
        Ok(collect_result_sets(stream).await?)
    }
}

async fn collect_result_sets<S, D>(mut stream: S) -> Result<Vec<ResultSet>, sqlx::Error>
where
    S: futures::Stream<Item = Result<Either<D, PgRow>, sqlx::Error>> + Unpin,
{
    let mut sets = Vec::new();
    let mut current = ResultSet::default();

    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(_) => sets.push(std::mem::take(&mut current)),
            Either::Right(row) => current.rows.push(decode_row(&row)?),
        }
    }
    if !current.rows.is_empty() {
        sets.push(current);
    }

    Ok(sets)
}

fn decode_row(row: &PgRow) -> Result<RawRow, sqlx::Error> {
    (0..row.columns().len())
        .map(|index| decode_cell(row, index))
        .collect()
}

/// How a routing column is read back as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Date,
    Timestamp,
    TimestampTz,
    Text,
    /// Read as `NULL`; the normalizer never needs these columns.
    Unsupported,
}

impl CellKind {
    fn of(type_info: &PgTypeInfo) -> Self {
        match type_info.name() {
            "BOOL" => CellKind::Bool,
            "INT2" => CellKind::Int2,
            "INT4" => CellKind::Int4,
            "INT8" => CellKind::Int8,
            "FLOAT4" => CellKind::Float4,
            "FLOAT8" => CellKind::Float8,
            "DATE" => CellKind::Date,
            "TIMESTAMP" => CellKind::Timestamp,
            "TIMESTAMPTZ" => CellKind::TimestampTz,
            _ if <String as Type<Postgres>>::compatible(type_info) => CellKind::Text,
            _ => CellKind::Unsupported,
        }
    }
}

/// Renders one cell as text. Timestamps use the `YYYY-MM-DD HH:MM` shape the
/// row transformer accepts, in local time.
fn decode_cell(row: &PgRow, index: usize) -> Result<Option<String>, sqlx::Error> {
    let column = &row.columns()[index];
    let value = match CellKind::of(column.type_info()) {
        CellKind::Bool => row.try_get::<Option<bool>, _>(index)?.map(|v| v.to_string()),
        CellKind::Int2 => row.try_get::<Option<i16>, _>(index)?.map(|v| v.to_string()),
        CellKind::Int4 => row.try_get::<Option<i32>, _>(index)?.map(|v| v.to_string()),
        CellKind::Int8 => row.try_get::<Option<i64>, _>(index)?.map(|v| v.to_string()),
        CellKind::Float4 => row.try_get::<Option<f32>, _>(index)?.map(|v| v.to_string()),
        CellKind::Float8 => row.try_get::<Option<f64>, _>(index)?.map(|v| v.to_string()),
        CellKind::Date => row
            .try_get::<Option<NaiveDate>, _>(index)?
            .map(|v| v.format("%Y-%m-%d").to_string()),
        CellKind::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(|v| v.format(CELL_TIMESTAMP_FORMAT).to_string()),
        CellKind::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(local_timestamp),
        CellKind::Text => row.try_get::<Option<String>, _>(index)?,
        CellKind::Unsupported => {
            debug!(
                column = column.name(),
                index,
                type_name = column.type_info().name(),
                "column type not decoded, reading as NULL"
            );
            None
        }
    };
    Ok(value)
}

const CELL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

fn local_timestamp(value: DateTime<Utc>) -> String {
    value
        .with_timezone(&Local)
        .format(CELL_TIMESTAMP_FORMAT)
        .to_string()
}

/// In-memory source backed by canned result sets, keyed by tracking number
/// for the first stage and by UAT number for the second.
#[derive(Debug, Clone, Default)]
pub struct FixtureRouteSource {
    candidates: std::collections::HashMap<String, Vec<ResultSet>>,
    routes: std::collections::HashMap<String, Vec<ResultSet>>,
    unavailable: bool,
}

impl FixtureRouteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose every `open` fails as if the database were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn with_candidate(mut self, tracking_number: &str, sets: Vec<ResultSet>) -> Self {
        self.candidates.insert(tracking_number.to_string(), sets);
        self
    }

    pub fn with_route(mut self, uat_number: &str, sets: Vec<ResultSet>) -> Self {
        self.routes.insert(uat_number.to_string(), sets);
        self
    }
}

#[async_trait]
impl RouteSource for FixtureRouteSource {
    async fn open(&self) -> Result<Box<dyn RouteSession + '_>, SourceError> {
        if self.unavailable {
            return Err(SourceError::Unavailable(
                "fixture source marked unavailable".to_string(),
            ));
        }
        Ok(Box::new(FixtureSession { source: self }))
    }
}

struct FixtureSession<'a> {
    source: &'a FixtureRouteSource,
}

#[async_trait]
impl<'a> RouteSession for FixtureSession<'a> {
    async fn candidate_sets(
        &mut self,
        tracking_number: &str,
    ) -> Result<Vec<ResultSet>, SourceError> {
        Ok(self
            .source
            .candidates
            .get(tracking_number)
            .cloned()
            .unwrap_or_default())
    }

    async fn route_sets(
        &mut self,
        candidate: &CandidateSummary,
    ) -> Result<Vec<ResultSet>, SourceError> {
        Ok(self
            .source
            .routes
            .get(&candidate.uat_number)
            .cloned()
            .unwrap_or_default())
    }
}
