//! Built-in invoice creation executor.

use crate::error::{DispatchError, DispatchResult};
use crate::materialize::fill_struct;
use crate::task::{Envelope, TaskExecutor};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// Parameters of a [`TaskId::CREATE_INVOICE`](crate::task::TaskId::CREATE_INVOICE) task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CreateInvoiceParams {
    /// Billing account the invoice is raised against
    #[serde(rename = "AccountId")]
    pub account_id: String,
    /// Amount in minor currency units (cents)
    #[serde(rename = "Amount")]
    pub amount: i64,
    /// ISO 4217 currency code
    #[serde(rename = "Currency")]
    pub currency: String,
    /// Invoice line description
    #[serde(rename = "Description")]
    pub description: String,
}

crate::materialize!(CreateInvoiceParams {
    "AccountId" => account_id,
    "Amount" => amount,
    "Currency" => currency,
    "Description" => description,
});

impl CreateInvoiceParams {
    fn validate(&self) -> DispatchResult<()> {
        if self.account_id.trim().is_empty() {
            return Err(DispatchError::execution("invoice has no account"));
        }
        if self.amount <= 0 {
            return Err(DispatchError::execution(format!(
                "invoice amount must be positive, got {}",
                self.amount
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(DispatchError::execution("invoice has no currency"));
        }
        Ok(())
    }
}

/// Billing provider integration.
#[async_trait]
pub trait InvoiceCreator: Send + Sync {
    /// Raise an invoice.
    async fn create_invoice(&self, params: &CreateInvoiceParams) -> DispatchResult<()>;
}

/// Creator that only records the request in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInvoiceCreator;

#[async_trait]
impl InvoiceCreator for LogInvoiceCreator {
    async fn create_invoice(&self, params: &CreateInvoiceParams) -> DispatchResult<()> {
        tracing::info!(
            account_id = %params.account_id,
            amount = params.amount,
            currency = %params.currency,
            "Invoice requested"
        );
        Ok(())
    }
}

/// Executor for [`TaskId::CREATE_INVOICE`](crate::task::TaskId::CREATE_INVOICE).
#[derive(Clone)]
pub struct BillingExecutor {
    creator: Arc<dyn InvoiceCreator>,
}

impl BillingExecutor {
    /// Executor that hands validated invoices to `creator`.
    pub fn new(creator: Arc<dyn InvoiceCreator>) -> Self {
        Self { creator }
    }
}

impl Default for BillingExecutor {
    fn default() -> Self {
        Self::new(Arc::new(LogInvoiceCreator))
    }
}

#[async_trait]
impl TaskExecutor for BillingExecutor {
    async fn execute(&self, envelope: &Envelope) -> DispatchResult<()> {
        let params: CreateInvoiceParams = fill_struct(&envelope.payload)?;
        params.validate()?;
        self.creator.create_invoice(&params).await
    }

    fn name(&self) -> &'static str {
        "billing"
    }
}
