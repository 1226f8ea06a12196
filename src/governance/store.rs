use crate::models::governance::{Budget, Customer, RateLimit, Team, VirtualKey};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// In-memory index of virtual keys, teams, customers, budgets and rate
/// limits, rebuilt from the configuration store at startup and mutated
/// transactionally thereafter. Lookups are O(1) by VK value; each map is its
/// own `DashMap`, giving fine-grained per-entity locking instead of one
/// store-wide lock, matching the sharded-lock shape `RateLimitStorage::Memory`
/// uses for its per-dimension maps.
pub struct GovernanceStore {
    virtual_keys: DashMap<String, VirtualKey>,
    teams: DashMap<Uuid, Team>,
    customers: DashMap<Uuid, Customer>,
    budgets: DashMap<Uuid, Budget>,
    rate_limits: DashMap<Uuid, RateLimit>,
}

impl GovernanceStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            virtual_keys: DashMap::new(),
            teams: DashMap::new(),
            customers: DashMap::new(),
            budgets: DashMap::new(),
            rate_limits: DashMap::new(),
        })
    }

    pub fn upsert_virtual_key(&self, vk: VirtualKey) {
        self.virtual_keys.insert(vk.value.clone(), vk);
    }

    pub fn upsert_team(&self, team: Team) {
        self.teams.insert(team.id, team);
    }

    pub fn upsert_customer(&self, customer: Customer) {
        self.customers.insert(customer.id, customer);
    }

    pub fn upsert_budget(&self, budget: Budget) {
        self.budgets.insert(budget.id, budget);
    }

    pub fn upsert_rate_limit(&self, rate_limit: RateLimit) {
        self.rate_limits.insert(rate_limit.id, rate_limit);
    }

    pub fn get_virtual_key(&self, value: &str) -> Option<VirtualKey> {
        self.virtual_keys.get(value).map(|v| v.clone())
    }

    pub fn get_team(&self, id: Uuid) -> Option<Team> {
        self.teams.get(&id).map(|v| v.clone())
    }

    pub fn get_customer(&self, id: Uuid) -> Option<Customer> {
        self.customers.get(&id).map(|v| v.clone())
    }

    pub fn get_budget(&self, id: Uuid) -> Option<Budget> {
        self.budgets.get(&id).map(|v| v.clone())
    }

    pub fn get_rate_limit(&self, id: Uuid) -> Option<RateLimit> {
        self.rate_limits.get(&id).map(|v| v.clone())
    }

    /// Walks VK budget → team budget → customer budget for the chain a VK
    /// touches. Order matters: callers charge the chain in this order.
    pub fn budget_chain(&self, vk: &VirtualKey) -> Vec<Uuid> {
        let mut chain = Vec::new();
        if let Some(budget_id) = vk.budget_id {
            chain.push(budget_id);
        }
        match &vk.owner {
            crate::models::governance::OwnerRef::Team(team_id) => {
                if let Some(team) = self.get_team(*team_id) {
                    if let Some(budget_id) = team.budget_id {
                        chain.push(budget_id);
                    }
                    if let Some(customer_id) = team.customer_id {
                        if let Some(customer) = self.get_customer(customer_id) {
                            if let Some(budget_id) = customer.budget_id {
                                chain.push(budget_id);
                            }
                        }
                    }
                }
            }
            crate::models::governance::OwnerRef::Customer(customer_id) => {
                if let Some(customer) = self.get_customer(*customer_id) {
                    if let Some(budget_id) = customer.budget_id {
                        chain.push(budget_id);
                    }
                }
            }
            crate::models::governance::OwnerRef::None => {}
        }
        chain
    }

    /// Applies `f` to the budget with the given id, if present, under the
    /// map's per-entry lock. Returns the value `f` produced, or `None` if the
    /// entity doesn't exist.
    pub fn with_budget_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut Budget) -> R) -> Option<R> {
        self.budgets.get_mut(&id).map(|mut entry| f(&mut entry))
    }

    pub fn with_rate_limit_mut<R>(&self, id: Uuid, f: impl FnOnce(&mut RateLimit) -> R) -> Option<R> {
        self.rate_limits.get_mut(&id).map(|mut entry| f(&mut entry))
    }

    pub fn all_budget_ids(&self) -> Vec<Uuid> {
        self.budgets.iter().map(|e| *e.key()).collect()
    }

    pub fn all_rate_limit_ids(&self) -> Vec<Uuid> {
        self.rate_limits.iter().map(|e| *e.key()).collect()
    }

    pub fn list_virtual_keys(&self) -> Vec<VirtualKey> {
        self.virtual_keys.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_teams(&self) -> Vec<Team> {
        self.teams.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_customers(&self) -> Vec<Customer> {
        self.customers.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_budgets(&self) -> Vec<Budget> {
        self.budgets.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_rate_limits(&self) -> Vec<RateLimit> {
        self.rate_limits.iter().map(|e| e.value().clone()).collect()
    }

    pub fn remove_virtual_key(&self, value: &str) -> Option<VirtualKey> {
        self.virtual_keys.remove(value).map(|(_, v)| v)
    }

    pub fn remove_team(&self, id: Uuid) -> Option<Team> {
        self.teams.remove(&id).map(|(_, v)| v)
    }

    pub fn remove_customer(&self, id: Uuid) -> Option<Customer> {
        self.customers.remove(&id).map(|(_, v)| v)
    }

    pub fn remove_budget(&self, id: Uuid) -> Option<Budget> {
        self.budgets.remove(&id).map(|(_, v)| v)
    }

    pub fn remove_rate_limit(&self, id: Uuid) -> Option<RateLimit> {
        self.rate_limits.remove(&id).map(|(_, v)| v)
    }
}
