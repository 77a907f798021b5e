//! Testing utilities for the twin workspace
//!
//! Shared fixtures: tenants, crawled records, matching target resources,
//! and a scripted target scan source.

#![allow(missing_docs)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use twin_graph::ResourceRecord;
use twin_identity::{TenantId, Value};
use twin_reconcile::{ScanError, TargetResource, TargetScanSource};

pub const STORAGE_TYPE: &str = "Microsoft.Storage/storageAccounts";
pub const SOURCE_SUBSCRIPTION: &str = "S1";
pub const TARGET_SUBSCRIPTION: &str = "S2";

pub fn tenant(name: &str) -> TenantId {
    TenantId::new(name).unwrap()
}

pub fn storage_id(subscription: &str, name: &str) -> String {
    format!("/subscriptions/{subscription}/resourceGroups/rg/providers/{STORAGE_TYPE}/{name}")
}

/// Storage account in the source subscription, eastus, tagged `env=prod`
pub fn storage_record(name: &str) -> ResourceRecord {
    ResourceRecord::new(storage_id(SOURCE_SUBSCRIPTION, name), STORAGE_TYPE)
        .with_name(name)
        .with_location("eastus")
        .with_resource_group("rg")
        .with_subscription(SOURCE_SUBSCRIPTION)
        .with_tag("env", "prod")
        .with_properties(Value::from(json!({
            "sku": {"name": "Standard_LRS"},
            "accessTier": "Hot",
            "identity": {"principalId": "7f1c0000-0000-0000-0000-00000000abcd"}
        })))
}

pub fn storage_records(count: usize) -> Vec<ResourceRecord> {
    (0..count).map(|i| storage_record(&format!("acct{i}"))).collect()
}

/// Physical twin of `record` in the target subscription
pub fn target_for(record: &ResourceRecord) -> TargetResource {
    let id = record.real_id.replacen(SOURCE_SUBSCRIPTION, TARGET_SUBSCRIPTION, 1);
    let mut target = TargetResource::new(id, record.resource_type.clone())
        .with_properties(json!({"sku": {"name": "Standard_LRS"}, "accessTier": "Hot"}).into());
    target.name = record.name.clone();
    target.location = record.location.clone();
    target.tags = record.tags.clone();
    target.subscription_id = Some(TARGET_SUBSCRIPTION.to_string());
    target.resource_group = record.resource_group.clone();
    target
}

/// Target source answering from a fixed scope table
#[derive(Debug, Default)]
pub struct StaticScanSource {
    scopes: HashMap<String, Result<Vec<TargetResource>, String>>,
    delay: Duration,
}

impl StaticScanSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: &str, resources: Vec<TargetResource>) -> Self {
        self.scopes.insert(scope.to_string(), Ok(resources));
        self
    }

    pub fn with_failing_scope(mut self, scope: &str, error: &str) -> Self {
        self.scopes.insert(scope.to_string(), Err(error.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TargetScanSource for StaticScanSource {
    async fn scan(&self, scope: &str) -> Result<Vec<TargetResource>, ScanError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.scopes.get(scope) {
            Some(Ok(resources)) => Ok(resources.clone()),
            Some(Err(error)) => Err(ScanError::Failed(error.clone())),
            None => Ok(Vec::new()),
        }
    }
}
