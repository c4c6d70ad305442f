pub mod invoice;
pub mod lease;
pub mod payment;
pub mod period;
pub mod reminder;
pub mod settings;
