//! Portfolio fetch seam.

use std::sync::Arc;

use aiguard_core::{CallError, PortfolioSnapshot};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ReadinessError, ReadinessResult};
use crate::machine::ReadinessStateMachine;
use crate::state::{ReadinessEvent, ReadinessState};

/// Source of portfolio snapshots (exchange proxy, fixture, ...).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PortfolioSource: Send + Sync {
    /// Fetch a fresh snapshot.
    async fn fetch_portfolio(&self) -> Result<PortfolioSnapshot, CallError>;
}

/// Drive one fetch cycle through the machine.
///
/// Enters FETCHING (INIT from IDLE, REFRESH from READY/UNSTABLE), awaits the
/// source, then dispatches FETCH_SUCCESS or FETCH_FAIL. A snapshot that fails
/// validation is treated as a failed fetch.
pub async fn refresh(
    machine: &ReadinessStateMachine,
    source: &dyn PortfolioSource,
) -> ReadinessResult<Arc<PortfolioSnapshot>> {
    match machine.state() {
        ReadinessState::Idle => {
            machine.dispatch(ReadinessEvent::Init)?;
        }
        ReadinessState::Fetching => {}
        _ => {
            machine.dispatch(ReadinessEvent::Refresh)?;
        }
    }

    let result = source.fetch_portfolio().await;

    let snapshot = match result {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, kind = %e.kind(), "Portfolio fetch failed");
            fail(machine, e.to_string());
            return Err(ReadinessError::Fetch(e));
        }
    };

    if let Err(e) = snapshot.validate() {
        warn!(error = %e, "Portfolio snapshot rejected");
        fail(machine, e.to_string());
        return Err(e.into());
    }

    let snapshot = Arc::new(snapshot);
    machine.dispatch(ReadinessEvent::FetchSuccess(Arc::clone(&snapshot)))?;
    debug!(
        positions = snapshot.positions().len(),
        total_usd = %snapshot.total_usd_value(),
        "Portfolio snapshot stored"
    );
    Ok(snapshot)
}

fn fail(machine: &ReadinessStateMachine, reason: String) {
    // The machine may have left FETCHING while the call was in flight.
    if let Err(e) = machine.dispatch(ReadinessEvent::FetchFail(reason)) {
        debug!(error = %e, "FETCH_FAIL not applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::ReadinessConfig;
    use aiguard_core::{now_ms, PortfolioPosition};
    use rust_decimal_macros::dec;

    fn machine() -> ReadinessStateMachine {
        ReadinessStateMachine::new(ReadinessConfig::default()).0
    }

    fn good_snapshot() -> PortfolioSnapshot {
        PortfolioSnapshot::from_positions(
            vec![PortfolioPosition {
                currency: "BTC".into(),
                balance: dec!(0.5),
                available: dec!(0.5),
                usd_value: dec!(21000),
            }],
            dec!(1000),
            now_ms(),
        )
    }

    #[tokio::test]
    async fn test_refresh_from_idle_reaches_ready() {
        let m = machine();
        let mut source = MockPortfolioSource::new();
        source
            .expect_fetch_portfolio()
            .times(1)
            .returning(|| Ok(good_snapshot()));

        let snapshot = refresh(&m, &source).await.unwrap();
        assert_eq!(snapshot.total_usd_value(), dec!(22000));
        assert_eq!(m.state(), ReadinessState::Ready);
        assert!(m.can_simulate());
    }

    #[tokio::test]
    async fn test_refresh_failure_goes_unstable() {
        let m = machine();
        let mut source = MockPortfolioSource::new();
        source
            .expect_fetch_portfolio()
            .times(2)
            .returning(|| Err(CallError::Timeout(10_000)));

        let err = refresh(&m, &source).await.unwrap_err();
        assert!(matches!(err, ReadinessError::Fetch(CallError::Timeout(_))));
        assert_eq!(m.state(), ReadinessState::Unstable);

        // Unstable → REFRESH → FETCHING → FETCH_FAIL again.
        tokio_test::assert_err!(refresh(&m, &source).await);
        assert_eq!(m.status().retry_count, 2);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_is_a_failed_fetch() {
        let m = machine();
        let mut source = MockPortfolioSource::new();
        source.expect_fetch_portfolio().returning(|| {
            Ok(PortfolioSnapshot::from_positions(
                vec![PortfolioPosition {
                    currency: "ETH".into(),
                    balance: dec!(1),
                    available: dec!(2),
                    usd_value: dec!(3000),
                }],
                dec!(0),
                now_ms(),
            ))
        });

        let err = refresh(&m, &source).await.unwrap_err();
        assert!(matches!(err, ReadinessError::InvalidSnapshot(_)));
        assert_eq!(m.state(), ReadinessState::Unstable);
        assert!(m.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rejected_while_simulating() {
        let m = machine();
        let mut source = MockPortfolioSource::new();
        source
            .expect_fetch_portfolio()
            .times(1)
            .returning(|| Ok(good_snapshot()));

        refresh(&m, &source).await.unwrap();
        m.dispatch(ReadinessEvent::StartSimulation).unwrap();

        let err = refresh(&m, &source).await.unwrap_err();
        assert!(matches!(err, ReadinessError::InvalidTransition { .. }));
        assert_eq!(m.state(), ReadinessState::SimRunning);
    }
}
