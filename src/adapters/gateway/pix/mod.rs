//! PIX Automático (recurring PIX debit) gateway.

mod adapter;
mod wire;

pub use adapter::{ApprovalError, PixAdapter, PIX_SIGNATURE_HEADER};
pub use wire::{Devolucao, Recurrence, RecurrenceList, RecurrenceStatus, WebhookRegistration};
