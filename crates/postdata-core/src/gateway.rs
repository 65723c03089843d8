use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::normalize::{normalize, EnrichmentResult, NormalizeError};
use crate::source::{first_data_row, CandidateSummary, RouteSource, SourceError};

/// Resolves one tracking number to its routing attributes.
#[async_trait]
pub trait Lookup: Send + Sync {
    /// `None` means the row cannot be enriched, for whatever reason.
    async fn lookup(&self, tracking_number: &str) -> Option<EnrichmentResult>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("malformed routing row: {0}")]
    Normalize(#[from] NormalizeError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::ExternalService
    }

    fn is_transient(&self) -> bool {
        match self {
            GatewayError::Source(err) => err.is_transient(),
            GatewayError::Normalize(_) => false,
        }
    }
}

pub struct LookupGateway<S> {
    source: S,
    attempts: u32,
}

impl<S: RouteSource> LookupGateway<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            attempts: 1,
        }
    }

    /// Total attempts per lookup when the source is unreachable. Query
    /// failures are never retried.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Runs both lookup stages on one session; the session (and its
    /// connection) is dropped when this returns.
    pub async fn try_lookup(
        &self,
        tracking_number: &str,
    ) -> Result<Option<EnrichmentResult>, GatewayError> {
        let mut session = self.source.open().await?;

        let Some(candidate_row) = first_data_row(session.candidate_sets(tracking_number).await?)
        else {
            debug!(tracking_number, "no candidate row");
            return Ok(None);
        };
        let Some(candidate) = CandidateSummary::from_row(&candidate_row) else {
            debug!(tracking_number, "candidate row has no UAT number");
            return Ok(None);
        };

        let Some(route_row) = first_data_row(session.route_sets(&candidate).await?) else {
            debug!(
                tracking_number,
                uat_number = %candidate.uat_number,
                "routing procedure returned no rows"
            );
            return Ok(None);
        };

        Ok(Some(normalize(&route_row)?))
    }
}

#[async_trait]
impl<S: RouteSource> Lookup for LookupGateway<S> {
    async fn lookup(&self, tracking_number: &str) -> Option<EnrichmentResult> {
        let mut attempt = 1;
        loop {
            match self.try_lookup(tracking_number).await {
                Ok(result) => return result,
                Err(err) if err.is_transient() && attempt < self.attempts => {
                    warn!(
                        tracking_number,
                        attempt,
                        error = %err,
                        "lookup failed, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    warn!(
                        tracking_number,
                        attempt,
                        kind = %err.kind(),
                        error = %err,
                        "lookup failed"
                    );
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::normalize::ROUTE_ROW_WIDTH;
    use crate::source::{FixtureRouteSource, RawRow, ResultSet, RouteSession};

    const TRACKING: &str = "RR123456785PT";
    const UAT: &str = "PTLISBDEFRAAACN40001001110001";

    fn candidate_row(uat: Option<&str>) -> RawRow {
        vec![
            uat.map(str::to_string),
            Some("U".to_string()),
            Some("UA".to_string()),
            Some("2024-02-04 10:00:00".to_string()),
            Some("2024-03-15 10:00:00".to_string()),
        ]
    }

    fn route_row() -> RawRow {
        let mut row = vec![None; ROUTE_ROW_WIDTH];
        row[0] = Some(UAT.to_string());
        row[3] = Some("DEFRAA".to_string());
        row[18] = Some("TP1234".to_string());
        row[29] = Some("2024-03-05 14:30".to_string());
        row
    }

    #[tokio::test]
    async fn resolves_through_both_stages() {
        let source = FixtureRouteSource::new()
            .with_candidate(
                TRACKING,
                vec![
                    ResultSet::default(),
                    ResultSet::new(vec![candidate_row(Some(UAT))]),
                ],
            )
            .with_route(
                UAT,
                vec![ResultSet::default(), ResultSet::new(vec![route_row()])],
            );
        let gateway = LookupGateway::new(source);

        let result = gateway.lookup(TRACKING).await.expect("enrichment");
        assert_eq!(result.uat_number, UAT);
        assert_eq!(result.flight, "TP1234");
        assert_eq!(result.arrival_port, "DEFRAA");
    }

    #[tokio::test]
    async fn missing_candidate_is_not_found() {
        let gateway = LookupGateway::new(FixtureRouteSource::new());
        assert!(gateway.lookup(TRACKING).await.is_none());
    }

    struct CountingSource {
        inner: FixtureRouteSource,
        route_calls: AtomicU32,
    }

    impl CountingSource {
        fn new(inner: FixtureRouteSource) -> Self {
            Self {
                inner,
                route_calls: AtomicU32::new(0),
            }
        }
    }

    struct CountingSession<'a> {
        inner: Box<dyn RouteSession + 'a>,
        route_calls: &'a AtomicU32,
    }

    #[async_trait]
    impl RouteSource for CountingSource {
        async fn open(&self) -> Result<Box<dyn RouteSession + '_>, SourceError> {
            let inner = self.inner.open().await?;
            Ok(Box::new(CountingSession {
                inner,
                route_calls: &self.route_calls,
            }))
        }
    }

    #[async_trait]
    impl<'a> RouteSession for CountingSession<'a> {
        async fn candidate_sets(
            &mut self,
            tracking_number: &str,
        ) -> Result<Vec<ResultSet>, SourceError> {
            self.inner.candidate_sets(tracking_number).await
        }

        async fn route_sets(
            &mut self,
            candidate: &CandidateSummary,
        ) -> Result<Vec<ResultSet>, SourceError> {
            self.route_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.route_sets(candidate).await
        }
    }

    async fn route_calls_for(candidate_sets: Vec<ResultSet>) -> (Option<EnrichmentResult>, u32) {
        let source = FixtureRouteSource::new()
            .with_candidate(TRACKING, candidate_sets)
            .with_route("", vec![ResultSet::new(vec![route_row()])])
            .with_route("  ", vec![ResultSet::new(vec![route_row()])])
            .with_route(UAT, vec![ResultSet::new(vec![route_row()])]);
        let gateway = LookupGateway::new(CountingSource::new(source));
        let result = gateway.try_lookup(TRACKING).await.expect("no fault");
        (result, gateway.source.route_calls.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn null_uat_skips_second_stage() {
        let (result, calls) =
            route_calls_for(vec![ResultSet::new(vec![candidate_row(None)])]).await;
        assert_eq!(result, None);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn blank_uat_skips_second_stage() {
        let (result, calls) =
            route_calls_for(vec![ResultSet::new(vec![candidate_row(Some("  "))])]).await;
        assert_eq!(result, None);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn empty_candidate_result_skips_second_stage() {
        let (result, calls) =
            route_calls_for(vec![ResultSet::default(), ResultSet::default()]).await;
        assert_eq!(result, None);
        assert_eq!(calls, 0);

        let (result, calls) = route_calls_for(Vec::new()).await;
        assert_eq!(result, None);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn found_candidate_runs_second_stage_once() {
        let (result, calls) =
            route_calls_for(vec![ResultSet::new(vec![candidate_row(Some(UAT))])]).await;
        assert!(result.is_some());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn missing_route_row_is_not_found() {
        let source = FixtureRouteSource::new()
            .with_candidate(TRACKING, vec![ResultSet::new(vec![candidate_row(Some(UAT))])])
            .with_route(UAT, vec![ResultSet::default(), ResultSet::default()]);
        let gateway = LookupGateway::new(source);
        assert!(gateway.lookup(TRACKING).await.is_none());
    }

    #[tokio::test]
    async fn malformed_route_row_is_not_found() {
        let source = FixtureRouteSource::new()
            .with_candidate(TRACKING, vec![ResultSet::new(vec![candidate_row(Some(UAT))])])
            .with_route(UAT, vec![ResultSet::new(vec![vec![None; 5]])]);
        let gateway = LookupGateway::new(source);

        let err = gateway.try_lookup(TRACKING).await.expect_err("short row");
        assert!(matches!(err, GatewayError::Normalize(_)));
        assert!(gateway.lookup(TRACKING).await.is_none());
    }

    #[tokio::test]
    async fn unavailable_source_is_not_found() {
        let gateway = LookupGateway::new(FixtureRouteSource::unavailable()).with_attempts(3);
        assert!(gateway.lookup(TRACKING).await.is_none());
    }

    struct FlakySource {
        failures_left: AtomicU32,
        opened: AtomicU32,
        inner: FixtureRouteSource,
    }

    #[async_trait]
    impl RouteSource for FlakySource {
        async fn open(&self) -> Result<Box<dyn RouteSession + '_>, SourceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(SourceError::Unavailable("connection refused".to_string()));
            }
            self.inner.open().await
        }
    }

    fn flaky(failures: u32) -> FlakySource {
        FlakySource {
            failures_left: AtomicU32::new(failures),
            opened: AtomicU32::new(0),
            inner: FixtureRouteSource::new()
                .with_candidate(TRACKING, vec![ResultSet::new(vec![candidate_row(Some(UAT))])])
                .with_route(UAT, vec![ResultSet::new(vec![route_row()])]),
        }
    }

    #[tokio::test]
    async fn retries_connection_faults_within_budget() {
        let gateway = LookupGateway::new(flaky(2)).with_attempts(3);
        assert!(gateway.lookup(TRACKING).await.is_some());
        assert_eq!(gateway.source.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_last_attempt() {
        let gateway = LookupGateway::new(flaky(5)).with_attempts(2);
        assert!(gateway.lookup(TRACKING).await.is_none());
        assert_eq!(gateway.source.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn single_attempt_by_default() {
        let gateway = LookupGateway::new(flaky(1));
        assert!(gateway.lookup(TRACKING).await.is_none());
        assert_eq!(gateway.source.opened.load(Ordering::SeqCst), 1);
    }
}
