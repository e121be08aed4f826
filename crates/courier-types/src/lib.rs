// ============================================================================
// Courier Types - Core Data Types
// ============================================================================
//
// Domain types shared by the courier server. No dependencies on business
// logic, databases or external services.
//
// Contents:
// - Accounts, devices and their delivery channels
// - Envelopes and the JSON submission body
// - Unidentified access keys (sealed-sender capability tokens)
// - The condensed multi-recipient wire format
//
// ============================================================================

pub mod access_key;
pub mod account;
pub mod envelope;
pub mod message;
pub mod multi_recipient;
mod serde_base64;

pub use access_key::*;
pub use account::*;
pub use envelope::*;
pub use message::*;
pub use multi_recipient::*;
