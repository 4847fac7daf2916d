//! Taxpayer Verification
//!
//! The tax registry lookup is slow and fallible. Workflows reach it only
//! through the actions in this module, which wrap a [`VerificationService`].

mod actions;
mod directory;
mod http;

pub use actions::{register_actions, SearchRoutes, SearchTaxpayerAction, VerifyTaxpayerAction};
pub use directory::StaticDirectory;
pub use http::HttpVerificationService;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One registry entry as returned by a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxpayerRecord {
    pub nif: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<TaxpayerRecord>,
    /// Why verification was refused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VerificationService: Send + Sync {
    /// Records whose name matches `name`
    async fn search(&self, name: &str) -> Result<Vec<TaxpayerRecord>>;

    /// Check a taxpayer identifier
    async fn verify(&self, nif: &str) -> Result<VerificationOutcome>;
}
