use std::collections::HashMap;

use crate::config::Config;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PlanId {
    Week,
    Month,
    Year,
}

impl PlanId {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanId::Week => "week",
            PlanId::Month => "month",
            PlanId::Year => "year",
        }
    }

    pub fn parse(plan: &str) -> Option<Self> {
        match plan.trim().to_ascii_lowercase().as_str() {
            "week" => Some(PlanId::Week),
            "month" => Some(PlanId::Month),
            "year" => Some(PlanId::Year),
            _ => None,
        }
    }
}

/// Maps internal plan identifiers to Stripe price ids.
#[derive(Clone, Debug, Default)]
pub struct PlanCatalog {
    price_by_plan: HashMap<PlanId, String>,
}

impl PlanCatalog {
    pub fn from_config(config: &Config) -> Self {
        let mut catalog = Self::default();
        catalog.insert(PlanId::Week, config.stripe_price_weekly.clone());
        catalog.insert(PlanId::Month, config.stripe_price_monthly.clone());
        catalog.insert(PlanId::Year, config.stripe_price_yearly.clone());
        catalog
    }

    pub fn with_price(mut self, plan_id: PlanId, price_id: impl Into<String>) -> Self {
        self.insert(plan_id, Some(price_id.into()));
        self
    }

    /// Resolves a user-supplied plan name to its canonical id and price.
    /// Plans without a configured price do not resolve.
    pub fn resolve(&self, plan: &str) -> Option<(PlanId, &str)> {
        let plan_id = PlanId::parse(plan)?;
        self.price_by_plan
            .get(&plan_id)
            .map(|price_id| (plan_id, price_id.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.price_by_plan.is_empty()
    }

    fn insert(&mut self, plan_id: PlanId, price_id: Option<String>) {
        if let Some(price_id) = price_id.map(|v| v.trim().to_string()) {
            if !price_id.is_empty() {
                self.price_by_plan.insert(plan_id, price_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_lookup_is_case_insensitive() {
        let catalog = PlanCatalog::default()
            .with_price(PlanId::Week, "price_week")
            .with_price(PlanId::Year, "price_year");

        assert_eq!(catalog.resolve("week"), Some((PlanId::Week, "price_week")));
        assert_eq!(catalog.resolve(" YEAR "), Some((PlanId::Year, "price_year")));
        assert_eq!(catalog.resolve("month"), None);
        assert_eq!(catalog.resolve("pro"), None);
    }

    #[test]
    fn blank_price_ids_are_skipped() {
        let catalog = PlanCatalog::default().with_price(PlanId::Month, "   ");
        assert!(catalog.is_empty());
    }
}
