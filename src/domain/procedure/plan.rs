use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::domain::errors::{Result, WorkflowError};
use crate::domain::procedure_step::ProcedureStepKind;
use super::value_objects::ProcedureType;

// ============================================================================
// Procedure Plans
// ============================================================================
//
// A plan lists the steps a procedure type materialises on first scheduling.
// Plans may inherit from a base plan, whose steps come first.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub kind: ProcedureStepKind,
    pub modality: Option<String>,
}

impl PlanStep {
    pub fn new(kind: ProcedureStepKind) -> Self {
        Self { kind, modality: None }
    }

    pub fn modality(modality: impl Into<String>) -> Self {
        Self { kind: ProcedureStepKind::Modality, modality: Some(modality.into()) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedurePlan {
    pub base: Option<String>,
    pub steps: Vec<PlanStep>,
}

impl ProcedurePlan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { base: None, steps }
    }

    pub fn inheriting(base: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self { base: Some(base.into()), steps }
    }
}

/// Yields the steps to create for a procedure type.
pub trait PlanProvider {
    fn plan_steps(&self, procedure_type: &ProcedureType) -> Result<Vec<PlanStep>>;
}

/// Plans keyed by procedure type id. Built once and handed to callers.
#[derive(Debug, Clone, Default)]
pub struct PlanRegistry {
    plans: HashMap<String, ProcedurePlan>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: impl Into<String>, plan: ProcedurePlan) -> &mut Self {
        self.plans.insert(key.into(), plan);
        self
    }

    pub fn with_plan(mut self, key: impl Into<String>, plan: ProcedurePlan) -> Self {
        self.register(key, plan);
        self
    }

    /// Flattens `key` and its base chain, base steps first.
    pub fn resolve(&self, key: &str) -> Result<Vec<PlanStep>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = Some(key.to_string());

        while let Some(k) = current {
            if !seen.insert(k.clone()) {
                tracing::warn!(plan = %key, base = %k, "cyclic plan inheritance");
                break;
            }
            let plan = self
                .plans
                .get(&k)
                .ok_or_else(|| WorkflowError::not_found("procedure plan", &k))?;
            chain.push(plan);
            current = plan.base.clone();
        }

        Ok(chain.into_iter().rev().flat_map(|p| p.steps.iter().cloned()).collect())
    }
}

impl PlanProvider for PlanRegistry {
    fn plan_steps(&self, procedure_type: &ProcedureType) -> Result<Vec<PlanStep>> {
        self.resolve(&procedure_type.id)
    }
}
