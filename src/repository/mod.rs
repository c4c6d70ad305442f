pub mod invoices;
pub mod leases;
pub mod payments;
pub mod reminders;
pub mod settings;
