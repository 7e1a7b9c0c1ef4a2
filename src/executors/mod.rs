//! Executors wired into every subscriber.
//!
//! [`EmailExecutor`] handles [`TaskId::SEND_EMAIL`](crate::task::TaskId::SEND_EMAIL)
//! and [`BillingExecutor`] handles
//! [`TaskId::CREATE_INVOICE`](crate::task::TaskId::CREATE_INVOICE). Both take
//! their provider as a trait object so hosts can plug in real integrations.

pub mod billing;
pub mod email;

pub use billing::{BillingExecutor, CreateInvoiceParams, InvoiceCreator, LogInvoiceCreator};
pub use email::{
    EmailExecutor, LogMailer, Mailer, SendEmailParams, SmtpMailer, UnconfiguredMailer,
    html_to_text,
};
