pub mod allocation;
pub mod billing_settings;
pub mod dispatch;
pub mod invoice_generator;
pub mod mpesa;
pub mod overdue;
pub mod reconciler;
pub mod reminder_scheduler;
pub mod scheduler;
pub mod settlement;
pub mod verification;
