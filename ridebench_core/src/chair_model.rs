//! Chair model catalog, grouped by speed tier.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// A purchasable chair model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChairModel {
    pub name: &'static str,
    pub speed: i32,
}

const fn model(name: &'static str, speed: i32) -> ChairModel {
    ChairModel { name, speed }
}

/// Every model the benchmark knows about.
pub const CHAIR_MODELS: [ChairModel; 16] = [
    model("SitEase", 2),
    model("LiteLine", 2),
    model("EasySit", 2),
    model("ComfortBasic", 2),
    model("StyleSit", 3),
    model("AeroSeat", 3),
    model("ErgoFlex", 3),
    model("BalancePro", 3),
    model("Infinity Seat", 5),
    model("LuxeThrone", 5),
    model("Titanium Line", 5),
    model("ZenComfort", 5),
    model("ShadowEdition", 7),
    model("Phoenix Ultra", 7),
    model("Legacy Chair", 7),
    model("Aurora Glow", 7),
];

/// How many models an owner stocks per speed tier.
pub const MODELS_PER_TIER: usize = 3;

/// Looks up a model by its name.
pub fn find_model(name: &str) -> Option<ChairModel> {
    CHAIR_MODELS.iter().copied().find(|m| m.name == name)
}

/// Randomly picks the models an owner will buy, keyed by speed.
pub fn pick_models<R: Rng + ?Sized>(rng: &mut R) -> BTreeMap<i32, Vec<ChairModel>> {
    let mut tiers: BTreeMap<i32, Vec<ChairModel>> = BTreeMap::new();
    for m in CHAIR_MODELS {
        tiers.entry(m.speed).or_default().push(m);
    }
    for models in tiers.values_mut() {
        models.shuffle(rng);
        models.truncate(MODELS_PER_TIER);
    }
    tiers
}

/// Round-robin selector over speed tiers, then over the models in each tier.
#[derive(Debug, Clone)]
pub struct ModelRotation {
    tiers: Vec<Vec<ChairModel>>,
}

impl ModelRotation {
    pub fn new(tiers: &BTreeMap<i32, Vec<ChairModel>>) -> Self {
        Self {
            tiers: tiers.values().filter(|m| !m.is_empty()).cloned().collect(),
        }
    }

    /// Model for the `n`-th chair the owner buys.
    pub fn nth(&self, n: usize) -> Option<ChairModel> {
        let tier = self.tiers.get(n % self.tiers.len().max(1))?;
        tier.get((n / self.tiers.len()) % tier.len()).copied()
    }
}
