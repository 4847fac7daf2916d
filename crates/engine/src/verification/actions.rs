use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::VerificationService;
use crate::template::lookup_path;
use crate::workflow::{ActionHandler, ActionRegistry, ActionRequest, ActionResult};

/// Steps to jump to depending on how many records matched. An unset route
/// leaves the choice to the step's own transitions.
#[derive(Debug, Clone, Default)]
pub struct SearchRoutes {
    pub none: Option<String>,
    pub single: Option<String>,
    pub multiple: Option<String>,
}

/// Search the registry by name.
///
/// Reads the `name` param (or the raw input) and stores
/// `dgi = { count, results, match }`, where `match` is the record when
/// exactly one was found.
pub struct SearchTaxpayerAction {
    service: Arc<dyn VerificationService>,
    routes: SearchRoutes,
}

impl SearchTaxpayerAction {
    pub fn new(service: Arc<dyn VerificationService>) -> Self {
        Self {
            service,
            routes: SearchRoutes::default(),
        }
    }

    pub fn with_routes(mut self, routes: SearchRoutes) -> Self {
        self.routes = routes;
        self
    }
}

#[async_trait]
impl ActionHandler for SearchTaxpayerAction {
    async fn call(&self, request: ActionRequest) -> Result<ActionResult> {
        let name = request
            .param_str("name")
            .unwrap_or(request.raw_input.as_str())
            .trim()
            .to_string();
        if name.is_empty() {
            return Err(anyhow::anyhow!("no name to search for"));
        }

        let results = self.service.search(&name).await?;
        info!("Taxpayer search for {} returned {} result(s)", name, results.len());

        let matched = match results.as_slice() {
            [only] => serde_json::to_value(only)?,
            _ => Value::Null,
        };
        let route = match results.len() {
            0 => self.routes.none.as_deref(),
            1 => self.routes.single.as_deref(),
            _ => self.routes.multiple.as_deref(),
        };

        let mut result = ActionResult::ok().with_data(
            "dgi",
            json!({
                "count": results.len(),
                "results": results,
                "match": matched,
            }),
        );
        if let Some(step) = route {
            result = result.goto(step);
        }
        Ok(result)
    }
}

/// Verify a taxpayer identifier.
///
/// Uses the `nif` param, falling back to the single search match. Stores
/// `verification = { verified, record, reason }`; a refused identifier is a
/// successful call with `verified: false`.
pub struct VerifyTaxpayerAction {
    service: Arc<dyn VerificationService>,
}

impl VerifyTaxpayerAction {
    pub fn new(service: Arc<dyn VerificationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl ActionHandler for VerifyTaxpayerAction {
    async fn call(&self, request: ActionRequest) -> Result<ActionResult> {
        let nif = request
            .param_str("nif")
            .or_else(|| lookup_path(&request.variables, "dgi.match.nif").and_then(Value::as_str))
            .map(|nif| nif.trim().to_string())
            .filter(|nif| !nif.is_empty())
            .ok_or_else(|| anyhow::anyhow!("no taxpayer identifier to verify"))?;

        let outcome = self.service.verify(&nif).await?;
        if outcome.verified {
            info!("Taxpayer {} verified", nif);
        } else {
            warn!("Taxpayer {} not verified: {:?}", nif, outcome.reason);
        }

        Ok(ActionResult::ok().with_data("verification", serde_json::to_value(&outcome)?))
    }
}

/// Register `search_dgi` and `verify_dgi` for every workflow.
pub fn register_actions(
    registry: &mut ActionRegistry,
    service: Arc<dyn VerificationService>,
    routes: SearchRoutes,
) {
    registry.register_shared(
        "search_dgi",
        Arc::new(SearchTaxpayerAction::new(service.clone()).with_routes(routes)),
    );
    registry.register_shared("verify_dgi", Arc::new(VerifyTaxpayerAction::new(service)));
}
