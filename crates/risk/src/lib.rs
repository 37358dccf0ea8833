pub mod protection;
pub mod ratchet;

pub use protection::{
    FlattenReason, ProtectionAction, ProtectionConfig, ProtectionManager, ProtectionState,
    MAX_HOLD_MINUTES,
};
pub use ratchet::StopRatchet;
