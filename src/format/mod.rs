//! Deterministic signing formats.
//!
//! | Format | Signs | Output |
//! |--------|-------|--------|
//! | OSM-1 | length-prefixed canonical JSON of an arbitrary payload | [`SignedMessage`] |
//! | OTX-1 | compact JSON of the six consensus fields of a transfer | [`SignedTransaction`] |

pub mod osm1;
pub mod otx1;

pub use osm1::{
    build_payload, canonical_json, canonicalize, sign_payload, signing_message, verify_signed_message,
    MessageInput, Osm1Verification, SignedMessage, VerifyOptions, OSM1_VERSION,
};
pub use otx1::{
    micro_to_oct, micro_to_oct_string, oct_to_micro, ou_for_amount, SignedTransaction, Transaction,
    TransactionRequest,
};
