//! Multi-line stock allocation with rollback.
//!
//! The service works on inventory items the caller already holds in memory.
//! Loading and persisting them is the coordinator's concern.

use chrono::Duration;
use common::{Clock, CorrelationId, LockId, SystemClock};
use domain::{Aggregate, InventoryError, InventoryItem};
use rust_decimal::Decimal;

use crate::config::AllocationConfig;
use crate::events::{
    AllocationCompensatedData, AllocationCompletedData, AllocationFailedData,
    AllocationPartialData, AllocationReleasedData,
};
use crate::{
    AllocationError, AllocationEvent, AllocationLineResult, AllocationPreview, AllocationRequest,
    AllocationResult, AllocationState, CompensationResult, PreviewLine, ReleaseLineResult,
    ReleaseResult, Result,
};

/// Locks several inventory lines for one source document, all or nothing.
///
/// Lines are locked in request order. If some lines fail, every lock taken by
/// this call is released again, in the order the locks were taken.
pub struct StockAllocationService<C = SystemClock> {
    clock: C,
    default_lock_duration: Duration,
}

impl StockAllocationService<SystemClock> {
    /// Creates a service on the system clock with the default lock duration.
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn from_config(config: &AllocationConfig) -> Self {
        Self::new().with_default_lock_duration(config.lock_duration())
    }
}

impl Default for StockAllocationService<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> StockAllocationService<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            default_lock_duration: AllocationConfig::default().lock_duration(),
        }
    }

    /// Sets the lock duration used when a request has no override.
    /// Non-positive durations are ignored.
    pub fn with_default_lock_duration(mut self, duration: Duration) -> Self {
        if duration > Duration::zero() {
            self.default_lock_duration = duration;
        }
        self
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn default_lock_duration(&self) -> Duration {
        self.default_lock_duration
    }

    /// Locks every line of `request` against `items`.
    ///
    /// Validation errors reject the request before anything is locked. Lines
    /// that cannot be locked are reported in the result, not as errors.
    #[tracing::instrument(
        skip(self, items, request),
        fields(
            source_type = %request.source_type,
            source_id = %request.source_id,
            lines = request.lines.len()
        )
    )]
    pub fn allocate_stock(
        &self,
        items: &mut [InventoryItem],
        request: &AllocationRequest,
    ) -> Result<AllocationResult> {
        let positions = request.resolve(items)?;

        let correlation_id = CorrelationId::new();
        let duration = request
            .effective_lock_duration()
            .unwrap_or(self.default_lock_duration);
        let expire_at = self
            .clock
            .now()
            .checked_add_signed(duration)
            .ok_or(AllocationError::LockDurationOutOfRange)?;

        let mut lines = Vec::with_capacity(request.lines.len());
        let mut held: Vec<(usize, LockId)> = Vec::new();
        let mut failed_lines = Vec::new();
        let mut total_allocated = Decimal::ZERO;

        for (index, (line, &position)) in request.lines.iter().zip(&positions).enumerate() {
            let item = &mut items[position];
            let locked = if item.can_fulfill(line.quantity) {
                item.lock_stock(
                    line.quantity,
                    &request.source_type,
                    &request.source_id,
                    expire_at,
                )
            } else {
                Err(InventoryError::InsufficientStock {
                    available: item.available_quantity(),
                    requested: line.quantity,
                })
            };

            match locked {
                Ok(lock) => {
                    total_allocated += line.quantity;
                    held.push((position, lock.id()));
                    lines.push(AllocationLineResult::locked(index, item, line, &lock));
                }
                Err(error) => {
                    tracing::debug!(index, key = %line.key, %error, "allocation line failed");
                    failed_lines.push(index);
                    lines.push(AllocationLineResult::failed(index, item, line, error));
                }
            }
        }

        let mut result = AllocationResult {
            correlation_id,
            source_type: request.source_type.clone(),
            source_id: request.source_id.clone(),
            state: AllocationState::Pending,
            lines,
            total_requested: request.total_quantity(),
            total_allocated,
            success: false,
            partial_success: false,
            compensated: false,
            compensation_results: Vec::new(),
            failed_lines,
            expire_at,
            events: Vec::new(),
        };

        if result.failed_lines.is_empty() {
            self.complete(&mut result);
        } else if !held.is_empty() {
            self.compensate(items, &held, &mut result);
        } else {
            self.fail(&mut result);
        }

        Ok(result)
    }

    /// Reports per-line availability without locking anything.
    pub fn preview_allocation(
        &self,
        items: &[InventoryItem],
        request: &AllocationRequest,
    ) -> Result<AllocationPreview> {
        let positions = request.resolve(items)?;

        let lines: Vec<PreviewLine> = request
            .lines
            .iter()
            .zip(positions)
            .enumerate()
            .map(|(index, (line, position))| {
                let item = &items[position];
                let available = item.available_quantity();
                let can_fulfill = item.can_fulfill(line.quantity);
                PreviewLine {
                    index,
                    item_id: item.id(),
                    key: line.key,
                    requested_quantity: line.quantity,
                    available_quantity: available,
                    can_fulfill,
                    shortage_quantity: if can_fulfill {
                        Decimal::ZERO
                    } else {
                        line.quantity - available
                    },
                }
            })
            .collect();

        let shortage_lines: Vec<usize> = lines
            .iter()
            .filter(|line| !line.can_fulfill)
            .map(|line| line.index)
            .collect();

        Ok(AllocationPreview {
            source_type: request.source_type.clone(),
            source_id: request.source_id.clone(),
            total_requested: request.total_quantity(),
            total_available: lines
                .iter()
                .map(|line| line.available_quantity)
                .fold(Decimal::ZERO, Decimal::saturating_add),
            can_fulfill_all: shortage_lines.is_empty(),
            shortage_lines,
            lines,
        })
    }

    /// Releases every active lock on `items` held by the given source.
    ///
    /// Items without matching locks are skipped. One release event is emitted
    /// even when nothing matched.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub fn release_allocation(
        &self,
        items: &mut [InventoryItem],
        source_type: &str,
        source_id: &str,
    ) -> Result<ReleaseResult> {
        if items.is_empty() {
            return Err(AllocationError::NoItemsToRelease);
        }
        if source_type.trim().is_empty() {
            return Err(AllocationError::MissingSourceType);
        }
        if source_id.trim().is_empty() {
            return Err(AllocationError::MissingSourceId);
        }

        let mut lines = Vec::new();
        let mut total_released = Decimal::ZERO;

        for item in items.iter_mut() {
            let matching: Vec<(LockId, Decimal)> = item
                .active_locks()
                .filter(|lock| lock.matches_source(source_type, source_id))
                .map(|lock| (lock.id(), lock.quantity()))
                .collect();

            for (lock_id, quantity) in matching {
                let outcome = item.unlock_stock(lock_id);
                if outcome.is_ok() {
                    total_released = total_released.saturating_add(quantity);
                }
                lines.push(ReleaseLineResult {
                    item_id: item.id(),
                    key: item.key(),
                    lock_id,
                    quantity,
                    success: outcome.is_ok(),
                    error_message: outcome.as_ref().err().map(ToString::to_string),
                    error: outcome.err(),
                });
            }
        }

        let success_count = lines.iter().filter(|line| line.success).count();
        let failure_count = lines.len() - success_count;
        let correlation_id = CorrelationId::new();

        let event = AllocationEvent::StockAllocationReleased(AllocationReleasedData {
            correlation_id,
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            releases: lines.clone(),
            total_released,
            release_count: lines.len(),
            success_count,
            failure_count,
            occurred_at: self.clock.now(),
        });

        tracing::info!(
            %correlation_id,
            released = success_count,
            failed = failure_count,
            %total_released,
            "allocation released"
        );

        Ok(ReleaseResult {
            correlation_id,
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            success: failure_count == 0,
            lines,
            total_released,
            events: vec![event],
        })
    }

    fn complete(&self, result: &mut AllocationResult) {
        result.state = AllocationState::Completed;
        result.success = true;
        result.events.push(AllocationEvent::StockAllocationCompleted(
            AllocationCompletedData {
                correlation_id: result.correlation_id,
                source_type: result.source_type.clone(),
                source_id: result.source_id.clone(),
                lines: result.lines.clone(),
                total_quantity: result.total_allocated,
                line_count: result.lines.len(),
                occurred_at: self.clock.now(),
            },
        ));

        tracing::info!(
            correlation_id = %result.correlation_id,
            total = %result.total_allocated,
            "allocation completed"
        );
    }

    /// Releases the locks in `held`, in order, after a partial allocation.
    /// A failed release is recorded and the remaining ones still run.
    fn compensate(
        &self,
        items: &mut [InventoryItem],
        held: &[(usize, LockId)],
        result: &mut AllocationResult,
    ) {
        let failure_count = result.failed_lines.len();
        let pending_quantity: Decimal = result
            .lines
            .iter()
            .filter(|line| !line.success)
            .map(|line| line.quantity)
            .sum();

        result.partial_success = true;
        result.events.push(AllocationEvent::StockAllocationPartial(
            AllocationPartialData {
                correlation_id: result.correlation_id,
                source_type: result.source_type.clone(),
                source_id: result.source_id.clone(),
                lines: result.lines.clone(),
                failed_lines: result.failed_lines.clone(),
                success_count: held.len(),
                failure_count,
                total_quantity: result.total_requested,
                locked_quantity: result.total_allocated,
                pending_quantity,
                occurred_at: self.clock.now(),
            },
        ));

        tracing::warn!(
            correlation_id = %result.correlation_id,
            locked = held.len(),
            failed = failure_count,
            "partial allocation, rolling back"
        );

        for &(position, lock_id) in held {
            let item = &mut items[position];
            let outcome = item.unlock_stock(lock_id);
            if let Err(error) = &outcome {
                tracing::warn!(%lock_id, key = %item.key(), %error, "failed to release lock");
            }
            result.compensation_results.push(CompensationResult {
                item_id: item.id(),
                key: item.key(),
                lock_id,
                success: outcome.is_ok(),
                error_message: outcome.as_ref().err().map(ToString::to_string),
                error: outcome.err(),
            });
        }

        let released = result
            .compensation_results
            .iter()
            .filter(|c| c.success)
            .count();

        result.state = AllocationState::Compensated;
        result.compensated = true;
        result.events.push(AllocationEvent::StockAllocationCompensated(
            AllocationCompensatedData {
                correlation_id: result.correlation_id,
                source_type: result.source_type.clone(),
                source_id: result.source_id.clone(),
                compensations: result.compensation_results.clone(),
                total_compensated: result.compensation_results.len(),
                success_count: released,
                failure_count: result.compensation_results.len() - released,
                occurred_at: self.clock.now(),
            },
        ));
    }

    fn fail(&self, result: &mut AllocationResult) {
        result.state = AllocationState::Failed;
        result.events.push(AllocationEvent::StockAllocationFailed(
            AllocationFailedData {
                correlation_id: result.correlation_id,
                source_type: result.source_type.clone(),
                source_id: result.source_id.clone(),
                lines: result.lines.clone(),
                failed_lines: result.failed_lines.clone(),
                total_quantity: result.total_requested,
                failure_count: result.failed_lines.len(),
                occurred_at: self.clock.now(),
            },
        ));

        tracing::warn!(
            correlation_id = %result.correlation_id,
            failed = result.failed_lines.len(),
            "allocation failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use common::{FixedClock, ProductId, WarehouseId};
    use domain::DomainEvent;
    use rust_decimal_macros::dec;

    fn service() -> StockAllocationService<FixedClock> {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        StockAllocationService::with_clock(FixedClock::new(now))
    }

    fn stocked(quantity: Decimal) -> InventoryItem {
        let mut item = InventoryItem::new(WarehouseId::new(), ProductId::new()).unwrap();
        if quantity > Decimal::ZERO {
            item.increase_stock(quantity, dec!(1), None).unwrap();
        }
        item.take_events();
        item
    }

    #[test]
    fn test_all_lines_locked() {
        let service = service();
        let mut items = vec![stocked(dec!(10)), stocked(dec!(5))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-1")
            .line(items[0].key(), dec!(4))
            .line(items[1].key(), dec!(5));

        let result = service.allocate_stock(&mut items, &request).unwrap();

        assert_eq!(result.state, AllocationState::Completed);
        assert!(result.success);
        assert!(!result.partial_success);
        assert_eq!(result.total_requested, dec!(9));
        assert_eq!(result.total_allocated, dec!(9));
        assert_eq!(result.held_locks().len(), 2);
        assert_eq!(
            result.expire_at,
            service.clock().now() + Duration::minutes(30)
        );
        assert_eq!(items[0].locked_quantity(), dec!(4));
        assert_eq!(items[1].available_quantity(), dec!(0));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].event_type(), "StockAllocationCompleted");
    }

    #[test]
    fn test_request_lock_duration_overrides_default() {
        let service = service().with_default_lock_duration(Duration::minutes(5));
        let mut items = vec![stocked(dec!(10))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-1")
            .line(items[0].key(), dec!(1))
            .with_lock_duration(Duration::hours(2));

        let result = service.allocate_stock(&mut items, &request).unwrap();
        assert_eq!(result.expire_at, service.clock().now() + Duration::hours(2));

        let lock = items[0].active_locks().next().unwrap();
        assert_eq!(lock.expire_at(), result.expire_at);
    }

    #[test]
    fn test_non_positive_default_duration_is_ignored() {
        let service = service().with_default_lock_duration(Duration::zero());
        assert_eq!(service.default_lock_duration(), Duration::minutes(30));
    }

    #[test]
    fn test_lock_expiry_past_calendar_is_rejected() {
        let service = service();
        let mut items = vec![stocked(dec!(10))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-1")
            .line(items[0].key(), dec!(1))
            .with_lock_duration(Duration::days(365 * 1_000_000));

        assert!(matches!(
            service.allocate_stock(&mut items, &request),
            Err(AllocationError::LockDurationOutOfRange)
        ));
        assert_eq!(items[0].locked_quantity(), Decimal::ZERO);
    }

    #[test]
    fn test_partial_allocation_is_rolled_back() {
        let service = service();
        let mut items = vec![stocked(dec!(10)), stocked(dec!(2)), stocked(dec!(8))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-2")
            .line(items[0].key(), dec!(5))
            .line(items[1].key(), dec!(3))
            .line(items[2].key(), dec!(8));

        let result = service.allocate_stock(&mut items, &request).unwrap();

        assert_eq!(result.state, AllocationState::Compensated);
        assert!(!result.success);
        assert!(result.partial_success);
        assert!(result.compensated);
        assert_eq!(result.failed_lines, vec![1]);
        assert_eq!(result.total_allocated, dec!(13));
        assert!(result.held_locks().is_empty());
        assert!(matches!(
            result.lines[1].error,
            Some(InventoryError::InsufficientStock { .. })
        ));

        let first_lock = result.lines[0].lock_id.unwrap();
        let third_lock = result.lines[2].lock_id.unwrap();
        let rolled_back: Vec<LockId> = result
            .compensation_results
            .iter()
            .map(|c| c.lock_id)
            .collect();
        assert_eq!(rolled_back, vec![first_lock, third_lock]);
        assert!(result.compensation_results.iter().all(|c| c.success));

        for (item, expected) in items.iter().zip([dec!(10), dec!(2), dec!(8)]) {
            assert_eq!(item.available_quantity(), expected);
            assert_eq!(item.locked_quantity(), Decimal::ZERO);
        }

        let types: Vec<&str> = result.events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            types,
            vec!["StockAllocationPartial", "StockAllocationCompensated"]
        );
        match &result.events[0] {
            AllocationEvent::StockAllocationPartial(data) => {
                assert_eq!(data.success_count, 2);
                assert_eq!(data.failure_count, 1);
                assert_eq!(data.locked_quantity, dec!(13));
                assert_eq!(data.pending_quantity, dec!(3));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_nothing_locked_fails() {
        let service = service();
        let mut items = vec![stocked(dec!(1)), stocked(Decimal::ZERO)];
        let request = AllocationRequest::new("SALES_ORDER", "SO-3")
            .line(items[0].key(), dec!(2))
            .line(items[1].key(), dec!(1));

        let result = service.allocate_stock(&mut items, &request).unwrap();

        assert_eq!(result.state, AllocationState::Failed);
        assert!(!result.success);
        assert!(!result.partial_success);
        assert!(!result.compensated);
        assert_eq!(result.total_allocated, Decimal::ZERO);
        assert_eq!(result.failed_lines, vec![0, 1]);
        assert!(items.iter().all(|item| item.pending_events().is_empty()));
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.events[0].event_type(), "StockAllocationFailed");
    }

    #[test]
    fn test_repeated_item_draws_down_availability() {
        let service = service();
        let mut items = vec![stocked(dec!(5))];
        let key = items[0].key();
        let request = AllocationRequest::new("SALES_ORDER", "SO-4")
            .line(key, dec!(3))
            .line(key, dec!(3));

        let result = service.allocate_stock(&mut items, &request).unwrap();

        assert_eq!(result.state, AllocationState::Compensated);
        assert_eq!(result.failed_lines, vec![1]);
        assert_eq!(items[0].available_quantity(), dec!(5));
    }

    #[test]
    fn test_validation_rejects_before_locking() {
        let service = service();
        let mut items = vec![stocked(dec!(5))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-5")
            .line(items[0].key(), dec!(1))
            .line(items[0].key(), dec!(-1));

        let result = service.allocate_stock(&mut items, &request);
        assert!(matches!(
            result,
            Err(AllocationError::InvalidLineQuantity { index: 1, .. })
        ));
        assert_eq!(items[0].locked_quantity(), Decimal::ZERO);
        assert!(items[0].pending_events().is_empty());
    }

    #[test]
    fn test_preview_reports_shortages() {
        let service = service();
        let items = vec![stocked(dec!(10)), stocked(dec!(2))];
        let request = AllocationRequest::new("SALES_ORDER", "SO-6")
            .line(items[0].key(), dec!(4))
            .line(items[1].key(), dec!(5));

        let preview = service.preview_allocation(&items, &request).unwrap();

        assert!(!preview.can_fulfill_all);
        assert_eq!(preview.shortage_lines, vec![1]);
        assert_eq!(preview.total_requested, dec!(9));
        assert_eq!(preview.total_available, dec!(12));
        assert_eq!(preview.lines[0].shortage_quantity, Decimal::ZERO);
        assert_eq!(preview.lines[1].shortage_quantity, dec!(3));
        assert!(items.iter().all(|item| item.locks().is_empty()));
    }

    #[test]
    fn test_release_only_touches_matching_source() {
        let service = service();
        let mut items = vec![stocked(dec!(10)), stocked(dec!(10))];
        let ours = AllocationRequest::new("SALES_ORDER", "SO-7")
            .line(items[0].key(), dec!(2))
            .line(items[1].key(), dec!(3));
        let theirs = AllocationRequest::new("SALES_ORDER", "SO-8").line(items[0].key(), dec!(4));
        service.allocate_stock(&mut items, &ours).unwrap();
        service.allocate_stock(&mut items, &theirs).unwrap();

        let released = service
            .release_allocation(&mut items, "SALES_ORDER", "SO-7")
            .unwrap();

        assert!(released.success);
        assert_eq!(released.lines.len(), 2);
        assert_eq!(released.total_released, dec!(5));
        assert_eq!(items[0].locked_quantity(), dec!(4));
        assert_eq!(items[1].locked_quantity(), Decimal::ZERO);
        match &released.events[0] {
            AllocationEvent::StockAllocationReleased(data) => {
                assert_eq!(data.release_count, 2);
                assert_eq!(data.success_count, 2);
                assert_eq!(data.failure_count, 0);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_release_validation() {
        let service = service();
        let mut none: Vec<InventoryItem> = Vec::new();
        assert!(matches!(
            service.release_allocation(&mut none, "SALES_ORDER", "SO-1"),
            Err(AllocationError::NoItemsToRelease)
        ));

        let mut items = vec![stocked(dec!(1))];
        assert!(matches!(
            service.release_allocation(&mut items, "", "SO-1"),
            Err(AllocationError::MissingSourceType)
        ));
        assert!(matches!(
            service.release_allocation(&mut items, "SALES_ORDER", " "),
            Err(AllocationError::MissingSourceId)
        ));
    }

    #[test]
    fn test_release_without_matches_succeeds_empty() {
        let service = service();
        let mut items = vec![stocked(dec!(1))];
        let released = service
            .release_allocation(&mut items, "SALES_ORDER", "SO-404")
            .unwrap();

        assert!(released.success);
        assert!(released.lines.is_empty());
        assert_eq!(released.total_released, Decimal::ZERO);
        assert_eq!(released.events.len(), 1);
    }
}
