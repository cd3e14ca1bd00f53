//! Owner actor: buys chairs and audits what the service reports about them.

use crate::chair::Chair;
use crate::guard::TickGuard;
use crate::region::RegionState;
use crate::registry::OwnerId;
use crate::request::Request;
use crate::world::World;
use ridebench_core::{ChairModel, CodeError, ErrorCode, ModelRotation};
use ridebench_env::{OwnerChair, OwnerClient, OwnerSales};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace};

/// Minute of the hour the chair roster is audited.
pub const CHAIR_AUDIT_MINUTE: i64 = 30;

/// Minute of the hour sales are audited.
pub const SALES_AUDIT_MINUTE: i64 = 59;

/// Counts an operation in flight for as long as it is held.
#[derive(Debug)]
pub struct InFlight {
    counter: Arc<AtomicI64>,
}

impl InFlight {
    fn begin(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct Owner {
    pub id: OwnerId,
    pub server_id: String,
    pub name: String,
    pub region: Arc<RegionState>,
    pub chair_register_token: String,

    client: Arc<dyn OwnerClient>,
    rotation: ModelRotation,
    chairs: RwLock<Vec<Arc<Chair>>>,
    completed: Mutex<Vec<Arc<Request>>>,

    /// Models handed out so far, for the round-robin rotation
    models_taken: AtomicI64,

    /// Chairs bought out of sales, including registrations that failed
    growth_tries: AtomicI64,

    registrations: Arc<AtomicI64>,
    settlements: Arc<AtomicI64>,
    guard: TickGuard,
}

impl Owner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: OwnerId,
        server_id: String,
        name: String,
        region: Arc<RegionState>,
        chair_register_token: String,
        client: Arc<dyn OwnerClient>,
        models: &BTreeMap<i32, Vec<ChairModel>>,
    ) -> Self {
        Self {
            id,
            server_id,
            name,
            region,
            chair_register_token,
            client,
            rotation: ModelRotation::new(models),
            chairs: RwLock::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            models_taken: AtomicI64::new(0),
            growth_tries: AtomicI64::new(0),
            registrations: Arc::new(AtomicI64::new(0)),
            settlements: Arc::new(AtomicI64::new(0)),
            guard: TickGuard::default(),
        }
    }

    pub fn chairs(&self) -> Vec<Arc<Chair>> {
        self.chairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn add_chair(&self, chair: Arc<Chair>) {
        self.chairs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(chair);
    }

    /// Reserves the next model to buy.
    pub(crate) fn next_model(&self) -> Option<ChairModel> {
        let n = self.models_taken.fetch_add(1, Ordering::AcqRel);
        self.rotation.nth(usize::try_from(n).unwrap_or_default())
    }

    /// Chairs the owner can afford on top of what it already bought out of
    /// sales. The initial fleet is not paid for by sales.
    pub(crate) fn affordable_chairs(&self, sales_per_chair: i64) -> i64 {
        if sales_per_chair <= 0 {
            return 0;
        }
        let earned = self.total_sales() / sales_per_chair;
        (earned - self.growth_tries.load(Ordering::Acquire)).max(0)
    }

    /// Reserves the model for one chair bought out of sales.
    pub(crate) fn next_growth_model(&self) -> Option<ChairModel> {
        self.growth_tries.fetch_add(1, Ordering::AcqRel);
        self.next_model()
    }

    /// Chairs bought out of sales so far.
    pub fn growth_tries(&self) -> i64 {
        self.growth_tries.load(Ordering::Acquire)
    }

    /// Marks a chair registration in flight; the roster audit waits it out.
    pub(crate) fn begin_registration(&self) -> InFlight {
        InFlight::begin(&self.registrations)
    }

    /// Marks a fare settlement in flight; the sales audit waits it out.
    pub(crate) fn begin_settlement(&self) -> InFlight {
        InFlight::begin(&self.settlements)
    }

    pub(crate) fn record_completed(&self, request: Arc<Request>) {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    pub fn completed_requests(&self) -> Vec<Arc<Request>> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn total_sales(&self) -> i64 {
        self.completed_requests().iter().map(|r| r.sales()).sum()
    }

    /// Contribution to the world score.
    pub fn sub_score(&self) -> i64 {
        self.completed_requests().iter().map(|r| r.sales() / 100).sum()
    }

    pub(crate) fn guard(&self) -> &TickGuard {
        &self.guard
    }

    pub async fn tick(&self, world: &World) -> Result<(), CodeError> {
        match world.clock().minute_of_hour() {
            CHAIR_AUDIT_MINUTE => self.audit_chairs(world.config().distance_tolerance_ms).await,
            SALES_AUDIT_MINUTE => self.audit_sales().await,
            _ => Ok(()),
        }
    }

    async fn audit_chairs(&self, tolerance_ms: i64) -> Result<(), CodeError> {
        if self.registrations.load(Ordering::Acquire) > 0 {
            debug!(owner = %self.id, "Chair registrations in flight, skipping roster audit");
            return Ok(());
        }

        let reported = self
            .client
            .get_chairs()
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToGetOwnerChairs, e))?;
        let chairs = self.chairs();

        if reported.len() != chairs.len() {
            return Err(incorrect_chairs(format!(
                "owner {} has {} chairs, service lists {}",
                self.id,
                chairs.len(),
                reported.len()
            )));
        }

        let by_id: HashMap<&str, &OwnerChair> =
            reported.iter().map(|c| (c.id.as_str(), c)).collect();
        for chair in &chairs {
            let Some(listed) = by_id.get(chair.server_id.as_str()) else {
                return Err(incorrect_chairs(format!(
                    "chair {} ({}) missing from the roster",
                    chair.id, chair.server_id
                )));
            };
            if listed.name != chair.name || listed.model != chair.model.name {
                return Err(incorrect_chairs(format!(
                    "chair {}: expected {} / {}, listed as {} / {}",
                    chair.id, chair.name, chair.model.name, listed.name, listed.model
                )));
            }
            self.audit_distance(chair, listed, tolerance_ms)?;
        }

        trace!(owner = %self.id, chairs = chairs.len(), "Chair roster consistent");
        Ok(())
    }

    fn audit_distance(
        &self,
        chair: &Chair,
        listed: &OwnerChair,
        tolerance_ms: i64,
    ) -> Result<(), CodeError> {
        let location = chair.location();
        let Some(updated_at) = listed.total_distance_updated_at else {
            if listed.total_distance != 0 {
                return Err(incorrect_chairs(format!(
                    "chair {} has distance {} without any recorded position",
                    chair.id, listed.total_distance
                )));
            }
            return Ok(());
        };
        let Some(acknowledged) = location.last_acknowledged_at() else {
            // the first report has not come back yet
            return Ok(());
        };
        if updated_at > acknowledged {
            return Ok(());
        }
        if acknowledged - updated_at > tolerance_ms {
            return Err(incorrect_chairs(format!(
                "chair {}: distance checkpoint at {updated_at} lags the last position at {acknowledged}",
                chair.id
            )));
        }

        let expected = location.total_travel_distance_until(updated_at);
        if listed.total_distance != expected {
            return Err(incorrect_chairs(format!(
                "chair {}: travelled {expected} until {updated_at}, service says {}",
                chair.id, listed.total_distance
            )));
        }
        Ok(())
    }

    async fn audit_sales(&self) -> Result<(), CodeError> {
        if self.settlements.load(Ordering::Acquire) > 0 {
            debug!(owner = %self.id, "Settlements in flight, skipping sales audit");
            return Ok(());
        }

        let completed = self.completed_requests();
        let Some(until) = completed
            .iter()
            .filter_map(|r| r.with_state(|s| s.server_completed_at))
            .max()
        else {
            return Ok(());
        };

        let reported = self
            .client
            .get_sales(Some(until))
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToGetOwnerSales, e))?;
        let expected = self.expected_sales(&completed);
        compare_sales(self.id, &expected, &reported)?;

        trace!(owner = %self.id, total = expected.total, "Sales consistent");
        Ok(())
    }

    fn expected_sales(&self, completed: &[Arc<Request>]) -> ExpectedSales {
        let mut expected = ExpectedSales::default();
        // every chair is listed, idle ones with zero
        for chair in self.chairs() {
            expected.chairs.entry(chair.server_id.clone()).or_default();
            expected.models.entry(chair.model.name.to_owned()).or_default();
        }
        for request in completed {
            let Some(chair) = request.with_state(|s| s.chair.clone()) else {
                continue;
            };
            let sales = request.sales();
            expected.total += sales;
            *expected.chairs.entry(chair.server_id).or_default() += sales;
            *expected.models.entry(chair.model.to_owned()).or_default() += sales;
        }
        expected
    }
}

#[derive(Debug, Default)]
struct ExpectedSales {
    total: i64,
    chairs: BTreeMap<String, i64>,
    models: BTreeMap<String, i64>,
}

fn compare_sales(owner: OwnerId, expected: &ExpectedSales, reported: &OwnerSales) -> Result<(), CodeError> {
    let mismatch = |what: String| CodeError::new(ErrorCode::SalesMismatched, format!("owner {owner}: {what}"));

    if reported.total_sales != expected.total {
        return Err(mismatch(format!(
            "total sales {} != expected {}",
            reported.total_sales, expected.total
        )));
    }
    for chair in &reported.chairs {
        let want = expected.chairs.get(&chair.id).copied().unwrap_or_default();
        if chair.sales != want {
            return Err(mismatch(format!(
                "chair {} sales {} != expected {want}",
                chair.id, chair.sales
            )));
        }
    }
    for model in &reported.models {
        let want = expected.models.get(&model.model).copied().unwrap_or_default();
        if model.sales != want {
            return Err(mismatch(format!(
                "model {} sales {} != expected {want}",
                model.model, model.sales
            )));
        }
    }
    Ok(())
}

fn incorrect_chairs(message: String) -> CodeError {
    CodeError::new(ErrorCode::IncorrectOwnerChairsData, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridebench_env::{ChairSales, ModelSales};

    fn sales(total: i64, chairs: &[(&str, i64)], models: &[(&str, i64)]) -> OwnerSales {
        OwnerSales {
            total_sales: total,
            chairs: chairs
                .iter()
                .map(|(id, sales)| ChairSales {
                    id: (*id).to_owned(),
                    name: format!("name-{id}"),
                    sales: *sales,
                })
                .collect(),
            models: models
                .iter()
                .map(|(model, sales)| ModelSales {
                    model: (*model).to_owned(),
                    sales: *sales,
                })
                .collect(),
        }
    }

    fn expected() -> ExpectedSales {
        ExpectedSales {
            total: 3000,
            chairs: [("c1".to_owned(), 3000), ("c2".to_owned(), 0)].into(),
            models: [("SitEase".to_owned(), 3000)].into(),
        }
    }

    #[test]
    fn test_matching_sales_pass() {
        let reported = sales(3000, &[("c1", 3000), ("c2", 0)], &[("SitEase", 3000)]);
        assert!(compare_sales(OwnerId(1), &expected(), &reported).is_ok());
    }

    #[test]
    fn test_total_mismatch_is_reported() {
        let reported = sales(2500, &[("c1", 2500), ("c2", 0)], &[("SitEase", 2500)]);
        let err = compare_sales(OwnerId(1), &expected(), &reported).unwrap_err();
        assert_eq!(err.code, ErrorCode::SalesMismatched);
        assert!(err.is_critical());
    }

    #[test]
    fn test_per_chair_mismatch_is_reported() {
        let reported = sales(3000, &[("c1", 1000), ("c2", 2000)], &[("SitEase", 3000)]);
        let err = compare_sales(OwnerId(1), &expected(), &reported).unwrap_err();
        assert!(err.message.contains("chair c1"));
    }

    #[test]
    fn test_in_flight_counter_releases_on_drop() {
        let counter = Arc::new(AtomicI64::new(0));
        let first = InFlight::begin(&counter);
        let second = InFlight::begin(&counter);
        assert_eq!(counter.load(Ordering::Acquire), 2);
        drop(first);
        drop(second);
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
