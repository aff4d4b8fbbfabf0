pub mod health;
pub mod key_handlers;
pub mod pdf_handlers;
pub mod usage_handlers;
